use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::auth::SessionProvider;
use crate::error::{AppError, AppResult};
use crate::HttpClient;

pub const SHEETS_ENDPOINT: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Serde mirror of the Sheets `values` resource. Reads and writes both
/// go through it; extra response fields are dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    #[serde(default)]
    pub values: Vec<Vec<String>>,
}

/// Thin Sheets REST client over the shared `reqwest` client. Both
/// operations surface as append failures since the tracker only ever
/// touches the sheet to append.
#[derive(Clone)]
pub struct SheetsClient {
    http_client: HttpClient,
    session: Arc<SessionProvider>,
    base_url: String,
}

impl SheetsClient {
    pub fn new(http_client: HttpClient, session: Arc<SessionProvider>) -> Self {
        Self {
            http_client,
            session,
            base_url: SHEETS_ENDPOINT.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(
        http_client: HttpClient,
        session: Arc<SessionProvider>,
        base_url: &str,
    ) -> Self {
        Self {
            http_client,
            session,
            base_url: base_url.to_string(),
        }
    }

    fn values_url(&self, spreadsheet_id: &str, range: &str) -> String {
        format!(
            "{}/{}/values/{}",
            self.base_url,
            spreadsheet_id,
            urlencoding::encode(range)
        )
    }

    pub async fn read_range(&self, spreadsheet_id: &str, range: &str) -> AppResult<ValueRange> {
        let token = self.session.access_token().await?;
        let resp = self
            .http_client
            .get(self.values_url(spreadsheet_id, range))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Append(e.into()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Append(anyhow!(
                "sheet read of {range} failed ({status}): {body}"
            )));
        }

        resp.json::<ValueRange>()
            .await
            .map_err(|e| AppError::Append(e.into()))
    }

    /// Single update call with user-entered input semantics, matching
    /// what a manual edit of the sheet would do.
    pub async fn write_range(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> AppResult<()> {
        let token = self.session.access_token().await?;
        let resp = self
            .http_client
            .put(self.values_url(spreadsheet_id, range))
            .query(&[("valueInputOption", "USER_ENTERED")])
            .bearer_auth(token)
            .json(&ValueRange { values })
            .send()
            .await
            .map_err(|e| AppError::Append(e.into()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Append(anyhow!(
                "sheet update of {range} failed ({status}): {body}"
            )));
        }

        Ok(())
    }
}
