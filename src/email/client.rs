use std::sync::Arc;

use anyhow::anyhow;

use crate::auth::SessionProvider;
use crate::error::{AppError, AppResult};
use crate::HttpClient;

use super::sent_message::{ListMessagesResponse, Message};

pub const GMAIL_ENDPOINT: &str = "https://www.googleapis.com/gmail/v1";

/// Thin Gmail REST client. Read-only: the tracker never mutates the
/// mailbox.
#[derive(Clone)]
pub struct EmailClient {
    http_client: HttpClient,
    session: Arc<SessionProvider>,
    base_url: String,
    mailbox_label: String,
}

impl EmailClient {
    pub fn new(http_client: HttpClient, session: Arc<SessionProvider>) -> Self {
        use crate::app_config::cfg;

        Self {
            http_client,
            session,
            base_url: GMAIL_ENDPOINT.to_string(),
            mailbox_label: cfg.poll.mailbox_label.clone(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(
        http_client: HttpClient,
        session: Arc<SessionProvider>,
        base_url: &str,
        mailbox_label: &str,
    ) -> Self {
        Self {
            http_client,
            session,
            base_url: base_url.to_string(),
            mailbox_label: mailbox_label.to_string(),
        }
    }

    /// Id of the single most recent message under the watched label, or
    /// `None` when the mailbox has no such messages.
    pub async fn latest_sent_id(&self) -> AppResult<Option<String>> {
        let token = self.session.access_token().await?;
        let resp = self
            .http_client
            .get(format!("{}/users/me/messages", self.base_url))
            .query(&[
                ("labelIds", self.mailbox_label.as_str()),
                ("maxResults", "1"),
            ])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Fetch(e.into()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Fetch(anyhow!(
                "gmail message list failed ({status}): {body}"
            )));
        }

        let data = resp
            .json::<ListMessagesResponse>()
            .await
            .map_err(|e| AppError::Fetch(e.into()))?;

        Ok(data
            .messages
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|m| m.id))
    }

    /// Full message, headers and body payload included.
    pub async fn get_message(&self, message_id: &str) -> AppResult<Message> {
        let token = self.session.access_token().await?;
        let resp = self
            .http_client
            .get(format!("{}/users/me/messages/{}", self.base_url, message_id))
            .query(&[("format", "full")])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Fetch(e.into()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Fetch(anyhow!(
                "gmail message get for {message_id} failed ({status}): {body}"
            )));
        }

        resp.json::<Message>()
            .await
            .map_err(|e| AppError::Fetch(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> EmailClient {
        EmailClient::with_base_url(
            reqwest::Client::new(),
            Arc::new(SessionProvider::with_static_token("test-token")),
            &server.uri(),
            "SENT",
        )
    }

    #[tokio::test]
    async fn test_latest_sent_id_returns_most_recent_message() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/me/messages"))
            .and(query_param("labelIds", "SENT"))
            .and(query_param("maxResults", "1"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{ "id": "msg_2", "threadId": "t_2" }],
                "resultSizeEstimate": 1
            })))
            .mount(&server)
            .await;

        let latest = client(&server).latest_sent_id().await.unwrap();
        assert_eq!(latest, Some("msg_2".to_string()));
    }

    #[tokio::test]
    async fn test_latest_sent_id_is_none_for_empty_mailbox() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resultSizeEstimate": 0
            })))
            .mount(&server)
            .await;

        let latest = client(&server).latest_sent_id().await.unwrap();
        assert_eq!(latest, None);
    }

    #[tokio::test]
    async fn test_get_message_requests_full_format() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/me/messages/msg_2"))
            .and(query_param("format", "full"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_2",
                "payload": {
                    "headers": [{ "name": "To", "value": "client@example.com" }],
                    "body": { "data": "aGVsbG8", "size": 5 }
                }
            })))
            .mount(&server)
            .await;

        let msg = client(&server).get_message("msg_2").await.unwrap();
        assert_eq!(msg.id, "msg_2");
    }

    #[tokio::test]
    async fn test_vanished_message_is_a_fetch_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/users/me/messages/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": { "code": 404, "message": "Not Found" }
            })))
            .mount(&server)
            .await;

        let err = client(&server).get_message("gone").await.unwrap_err();
        assert!(matches!(err, AppError::Fetch(_)));
    }
}
