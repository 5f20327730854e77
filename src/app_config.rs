use config::{Config, ConfigError};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::env;

/// Google OAuth client, read from `config/client_secret.toml`
/// (the downloadable client secret, converted to TOML).
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_uri: String,
    pub scopes: Vec<String>,
}

impl GoogleClientConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        builder.try_deserialize()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Seconds between ticks, applied after success and failure alike.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Gmail label to watch. The tracker only cares about outgoing mail.
    #[serde(default = "default_mailbox_label")]
    pub mailbox_label: String,
    /// File holding the id of the last fully processed message.
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: String,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_mailbox_label() -> String {
    "SENT".to_string()
}

fn default_checkpoint_path() -> String {
    "last_processed.txt".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct SheetConfigFile {
    range: String,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    poll: PollConfig,
    model: ModelConfig,
    sheet: SheetConfigFile,
}

#[derive(Debug, Clone)]
pub struct SheetTarget {
    pub spreadsheet_id: String,
    /// Full read range in A1 notation, e.g. "Hold Grid!A:F".
    pub range: String,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct GoogleAuthConfig {
    pub client: GoogleClientConfig,
    pub refresh_token: String,
}

#[derive(Debug)]
pub struct AppConfig {
    pub poll: PollConfig,
    pub model: ModelConfig,
    pub sheet: SheetTarget,
    pub api: ApiConfig,
    pub google: GoogleAuthConfig,
}

// Secrets stay out of the startup banner.
impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bookingclerk Config:\n{:?}\n\nModel: {:?}\n\nSheet: {:?}\n\nGoogle client id: {}",
            self.poll, self.model, self.sheet, self.google.client.client_id,
        )
    }
}

lazy_static! {
    pub static ref cfg: AppConfig = {
        let root = env::var("APP_DIR").unwrap_or_else(|_| {
            let dir =
                env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR or APP_DIR is required");
            format!("{dir}/config")
        });
        let path = format!("{root}/client_secret.toml");
        let google_client =
            GoogleClientConfig::from_file(&path).expect("client_secret.toml is required");
        let path = format!("{root}/config.toml");
        let cfg_file: ConfigFile = Config::builder()
            .add_source(config::File::with_name(&path))
            .build()
            .expect("config.toml is required")
            .try_deserialize()
            .expect("config.toml is invalid");

        let ConfigFile { poll, model, sheet } = cfg_file;

        AppConfig {
            poll,
            model,
            sheet: SheetTarget {
                spreadsheet_id: env::var("SPREADSHEET_ID").expect("SPREADSHEET_ID is required"),
                range: sheet.range,
            },
            api: ApiConfig {
                key: env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY is required"),
            },
            google: GoogleAuthConfig {
                client: google_client,
                refresh_token: env::var("GOOGLE_REFRESH_TOKEN")
                    .expect("GOOGLE_REFRESH_TOKEN is required"),
            },
        }
    };
}
