//! Field extraction via a chat-completion model.
//!
//! The surrounding contract is ours; the model itself is a
//! collaborator. There is no retry here (a failed extraction is retried
//! by the poll loop on its next tick) and no semantic validation of the
//! extracted values.

use anyhow::anyhow;
use indoc::formatdoc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::HttpClient;

pub const AI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Multiple date ranges are collapsed into one cell with this join.
pub const DATE_RANGE_SEPARATOR: &str = " & ";

fn system_prompt() -> &'static str {
    "You are a helpful assistant that extracts specific information from emails."
}

fn user_prompt(email_content: &str) -> String {
    formatdoc! {r#"
        Extract the following information from this email:
        1. Email address
        2. City (if mentioned, otherwise extract from venue location)
        3. Venue name
        4. Requested dates (if multiple dates are given, include all)

        Email content:
        {email_content}

        Return the information in JSON format with keys: email, city, venue, dates
        Note: If there are multiple date ranges, combine them into a single string separated by '{separator}'"#,
        separator = DATE_RANGE_SEPARATOR,
    }
}

/// The structured result of one extraction. All four keys are required;
/// a response missing any of them is a parse failure, never a partial
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub email: String,
    pub city: String,
    pub venue: String,
    pub dates: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatApiResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatApiErrorDetail {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatApiError {
    pub error: ChatApiErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ChatApiResponseOrError {
    Response(ChatApiResponse),
    Error(ChatApiError),
}

pub struct ExtractionClient {
    http_client: HttpClient,
    endpoint: String,
    api_key: String,
    model_id: String,
    temperature: f64,
}

impl ExtractionClient {
    pub fn new(http_client: HttpClient) -> Self {
        use crate::app_config::cfg;

        Self {
            http_client,
            endpoint: AI_ENDPOINT.to_string(),
            api_key: cfg.api.key.clone(),
            model_id: cfg.model.id.clone(),
            temperature: cfg.model.temperature,
        }
    }

    #[cfg(test)]
    pub fn with_endpoint(http_client: HttpClient, endpoint: &str) -> Self {
        Self {
            http_client,
            endpoint: endpoint.to_string(),
            api_key: "test-key".to_string(),
            model_id: "test-model".to_string(),
            temperature: 0.0,
        }
    }

    pub async fn extract_fields(&self, email_content: &str) -> AppResult<ExtractedFields> {
        tracing::debug!("Sending extraction prompt ({} chars)", email_content.len());

        let resp = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model_id,
                "temperature": self.temperature,
                "messages": [
                    { "role": "system", "content": system_prompt() },
                    { "role": "user", "content": user_prompt(email_content) }
                ],
                "response_format": { "type": "json_object" }
            }))
            .send()
            .await
            .map_err(|e| AppError::Extraction(e.into()))?;

        let resp = resp
            .json::<serde_json::Value>()
            .await
            .map_err(|e| AppError::Extraction(e.into()))?;

        let parsed = serde_json::from_value::<ChatApiResponseOrError>(resp.clone())
            .map_err(|_| AppError::Extraction(anyhow!("could not parse chat response: {resp}")))?;

        let parsed = match parsed {
            ChatApiResponseOrError::Error(e) => {
                return Err(AppError::Extraction(anyhow!(
                    "chat API error: {}",
                    e.error.message
                )));
            }
            ChatApiResponseOrError::Response(parsed) => parsed,
        };

        let choice = parsed
            .choices
            .first()
            .ok_or_else(|| AppError::Extraction(anyhow!("no choices in response")))?;

        parse_extraction_response(&choice.message.content)
    }
}

fn parse_extraction_response(content: &str) -> AppResult<ExtractedFields> {
    serde_json::from_str(content)
        .map_err(|e| AppError::ParseResponse(format!("{e}; raw response: {content}")))
}
