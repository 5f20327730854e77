//! Poll loop controller.
//!
//! One tick: latest sent id -> dedup against the checkpoint -> full
//! fetch -> decode -> extract -> append -> checkpoint. Every step is
//! tagged so a failure reports exactly where the tick died, and a
//! failed tick leaves the checkpoint alone so the same message is
//! retried on the next interval until it succeeds or a newer message
//! supersedes it.

use derive_more::derive::Display;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointStore;
use crate::email::client::EmailClient;
use crate::email::sent_message;
use crate::error::{AppError, AppResult};
use crate::prompt::ExtractionClient;
use crate::sheets::tracker::{BookingRow, TrackingSheet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PipelineStep {
    #[display("fetching")]
    Fetching,
    #[display("decoding")]
    Decoding,
    #[display("extracting")]
    Extracting,
    #[display("appending")]
    Appending,
    #[display("checkpointing")]
    Checkpointing,
}

/// A tick failure, pinned to the step that produced it.
#[derive(Debug, Display)]
#[display("{step} failed: {error}")]
pub struct StepError {
    pub step: PipelineStep,
    pub error: AppError,
}

impl std::error::Error for StepError {}

fn at_step<T>(step: PipelineStep, result: AppResult<T>) -> Result<T, StepError> {
    result.map_err(|error| StepError { step, error })
}

#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing new under the watched label, or the latest message is
    /// the one already recorded.
    Skipped,
    Processed(String),
}

pub struct SentMessagePoller {
    email_client: EmailClient,
    extraction_client: ExtractionClient,
    sheet: TrackingSheet,
    checkpoint: CheckpointStore,
    last_processed: Option<String>,
    tick_interval: Duration,
}

impl SentMessagePoller {
    pub fn new(
        email_client: EmailClient,
        extraction_client: ExtractionClient,
        sheet: TrackingSheet,
        checkpoint: CheckpointStore,
    ) -> AppResult<Self> {
        use crate::app_config::cfg;

        let last_processed = checkpoint.load()?;
        match &last_processed {
            Some(id) => tracing::info!("Resuming after message {}", id),
            None => tracing::info!("No checkpoint found, starting fresh"),
        }

        Ok(Self {
            email_client,
            extraction_client,
            sheet,
            checkpoint,
            last_processed,
            tick_interval: Duration::from_secs(cfg.poll.interval_secs),
        })
    }

    #[cfg(test)]
    fn for_test(
        email_client: EmailClient,
        extraction_client: ExtractionClient,
        sheet: TrackingSheet,
        checkpoint: CheckpointStore,
    ) -> AppResult<Self> {
        let last_processed = checkpoint.load()?;
        Ok(Self {
            email_client,
            extraction_client,
            sheet,
            checkpoint,
            last_processed,
            tick_interval: Duration::from_secs(1),
        })
    }

    /// Runs until cancelled. Tick errors are logged and absorbed; the
    /// interval applies after success and failure alike.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = interval(self.tick_interval);

        tracing::info!(
            "Sent-mail poller started (interval: {}s)",
            self.tick_interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Sent-mail poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(TickOutcome::Skipped) => {
                            tracing::debug!("No new sent message");
                        }
                        Ok(TickOutcome::Processed(id)) => {
                            tracing::info!("Recorded sent message {}", id);
                        }
                        Err(e) => {
                            tracing::error!("Tick failed while {}: {}", e.step, e.error);
                        }
                    }
                }
            }
        }
    }

    pub async fn tick(&mut self) -> Result<TickOutcome, StepError> {
        let latest = at_step(
            PipelineStep::Fetching,
            self.email_client.latest_sent_id().await,
        )?;

        let Some(id) = latest else {
            return Ok(TickOutcome::Skipped);
        };
        if self.last_processed.as_deref() == Some(id.as_str()) {
            return Ok(TickOutcome::Skipped);
        }

        tracing::info!("Processing new sent message {}", id);

        let message = at_step(PipelineStep::Fetching, self.email_client.get_message(&id).await)?;

        let to_email = at_step(PipelineStep::Decoding, sent_message::recipient(&message))?;
        let body = at_step(PipelineStep::Decoding, sent_message::decode_body(&message))?;

        let fields = at_step(
            PipelineStep::Extracting,
            self.extraction_client.extract_fields(&body).await,
        )?;
        tracing::debug!(
            "Extracted fields for {}: contact {} in {}",
            id,
            fields.email,
            fields.city
        );

        // The row records who we wrote to, not whatever address the
        // model pulled out of the body.
        let row = BookingRow {
            email: to_email,
            city: fields.city,
            venue: fields.venue,
            dates: fields.dates,
        };

        at_step(PipelineStep::Appending, self.sheet.append_booking(row).await)?;

        at_step(PipelineStep::Checkpointing, self.checkpoint.save(&id))?;
        self.last_processed = Some(id.clone());

        Ok(TickOutcome::Processed(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionProvider;
    use crate::sheets::client::SheetsClient;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use std::sync::Arc;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SPREADSHEET_ID: &str = "sheet123";
    const RANGE: &str = "Hold Grid!A:F";

    /// Poller pointed entirely at one mock server, with its checkpoint
    /// in a fresh temp dir.
    fn poller(server: &MockServer, dir: &TempDir) -> SentMessagePoller {
        let http = reqwest::Client::new();
        let session = Arc::new(SessionProvider::with_static_token("test-token"));

        let email_client = EmailClient::with_base_url(http.clone(), session.clone(), &server.uri(), "SENT");
        let extraction_client = ExtractionClient::with_endpoint(
            http.clone(),
            &format!("{}/v1/chat/completions", server.uri()),
        );
        let sheet = TrackingSheet::with_target(
            SheetsClient::with_base_url(http, session, &server.uri()),
            SPREADSHEET_ID,
            RANGE,
        );
        let checkpoint = CheckpointStore::new(dir.path().join("last_processed.txt"));

        SentMessagePoller::for_test(email_client, extraction_client, sheet, checkpoint).unwrap()
    }

    async fn mount_latest_sent(server: &MockServer, id: &str) {
        Mock::given(method("GET"))
            .and(path("/users/me/messages"))
            .and(query_param("labelIds", "SENT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{ "id": id }],
                "resultSizeEstimate": 1
            })))
            .mount(server)
            .await;
    }

    async fn mount_full_message(server: &MockServer, id: &str, to: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/users/me/messages/{id}")))
            .and(query_param("format", "full"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": id,
                "payload": {
                    "headers": [{ "name": "To", "value": to }],
                    "body": { "data": URL_SAFE_NO_PAD.encode(body), "size": body.len() }
                }
            })))
            .mount(server)
            .await;
    }

    async fn mount_extraction(server: &MockServer, content: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": content },
                    "finish_reason": "stop"
                }]
            })))
            .mount(server)
            .await;
    }

    async fn mount_sheet_read(server: &MockServer, values: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!(
                "/{SPREADSHEET_ID}/values/{}",
                urlencoding::encode(RANGE)
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "range": "Hold Grid!A1:F1000",
                "majorDimension": "ROWS",
                "values": values
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_noop_tick_when_latest_matches_checkpoint() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("last_processed.txt"), "msg_1").unwrap();

        mount_latest_sent(&server, "msg_1").await;

        // Nothing past the id listing may be touched on a no-op tick.
        Mock::given(method("GET"))
            .and(path("/users/me/messages/msg_1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut poller = poller(&server, &dir);
        assert_eq!(poller.tick().await.unwrap(), TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_empty_mailbox_skips() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("GET"))
            .and(path("/users/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resultSizeEstimate": 0
            })))
            .mount(&server)
            .await;

        let mut poller = poller(&server, &dir);
        assert_eq!(poller.tick().await.unwrap(), TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_new_message_is_processed_end_to_end() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        mount_latest_sent(&server, "msg_2").await;
        mount_full_message(
            &server,
            "msg_2",
            "client@example.com",
            "Hello, need venue in Austin for Oct 1-3",
        )
        .await;
        mount_extraction(
            &server,
            "{\"email\":\"client@example.com\",\"city\":\"Austin\",\"venue\":\"TBD\",\"dates\":\"Oct 1-3\"}",
        )
        .await;
        mount_sheet_read(
            &server,
            serde_json::json!([["Email", "City", "Venue", "Dates", "Status"]]),
        )
        .await;

        Mock::given(method("PUT"))
            .and(path(format!(
                "/{SPREADSHEET_ID}/values/{}",
                urlencoding::encode("Hold Grid!A2:E2")
            )))
            .and(query_param("valueInputOption", "USER_ENTERED"))
            .and(body_json(serde_json::json!({
                "values": [["client@example.com", "Austin", "TBD", "Oct 1-3", "CONTACTED"]]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "updatedCells": 5
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut poller = poller(&server, &dir);
        assert_eq!(
            poller.tick().await.unwrap(),
            TickOutcome::Processed("msg_2".to_string())
        );

        let saved = std::fs::read_to_string(dir.path().join("last_processed.txt")).unwrap();
        assert_eq!(saved, "msg_2");

        // The same message again is a no-op: append happened exactly once.
        assert_eq!(poller.tick().await.unwrap(), TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_append_failure_leaves_checkpoint_untouched() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("last_processed.txt"), "msg_1").unwrap();

        mount_latest_sent(&server, "msg_2").await;
        mount_full_message(&server, "msg_2", "client@example.com", "body text").await;
        mount_extraction(
            &server,
            "{\"email\":\"client@example.com\",\"city\":\"Austin\",\"venue\":\"TBD\",\"dates\":\"Oct 1-3\"}",
        )
        .await;
        mount_sheet_read(&server, serde_json::json!([["Email"]])).await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "Internal error" }
            })))
            .mount(&server)
            .await;

        let mut poller = poller(&server, &dir);
        let err = poller.tick().await.unwrap_err();
        assert_eq!(err.step, PipelineStep::Appending);
        assert!(matches!(err.error, AppError::Append(_)));

        // Checkpoint still points at the previous message, so msg_2 is
        // retried on the next tick.
        let saved = std::fs::read_to_string(dir.path().join("last_processed.txt")).unwrap();
        assert_eq!(saved, "msg_1");
        assert_eq!(poller.last_processed.as_deref(), Some("msg_1"));
    }

    #[tokio::test]
    async fn test_missing_to_header_stops_before_any_write() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        mount_latest_sent(&server, "msg_2").await;

        Mock::given(method("GET"))
            .and(path("/users/me/messages/msg_2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_2",
                "payload": {
                    "headers": [{ "name": "From", "value": "me@example.com" }],
                    "body": { "data": URL_SAFE_NO_PAD.encode("body"), "size": 4 }
                }
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut poller = poller(&server, &dir);
        let err = poller.tick().await.unwrap_err();
        assert_eq!(err.step, PipelineStep::Decoding);
        assert!(matches!(err.error, AppError::MissingHeader(_)));
        assert!(!dir.path().join("last_processed.txt").exists());
    }

    #[tokio::test]
    async fn test_malformed_model_output_writes_nothing() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        mount_latest_sent(&server, "msg_2").await;
        mount_full_message(&server, "msg_2", "client@example.com", "body text").await;
        // `dates` key missing: the whole tick must fail, no partial row.
        mount_extraction(
            &server,
            "{\"email\":\"client@example.com\",\"city\":\"Austin\",\"venue\":\"TBD\"}",
        )
        .await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut poller = poller(&server, &dir);
        let err = poller.tick().await.unwrap_err();
        assert_eq!(err.step, PipelineStep::Extracting);
        assert!(matches!(err.error, AppError::ParseResponse(_)));
    }
}
