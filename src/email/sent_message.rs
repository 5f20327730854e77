//! Wire types for the Gmail `users.messages` resources, plus the two
//! readers the pipeline needs: the plain-text body and the recipient.
//! Only the fields we actually consume are modelled; serde drops the
//! rest.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesResponse {
    #[serde(default)]
    pub messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub headers: Vec<Header>,
    pub body: Option<MessagePartBody>,
    pub parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePartBody {
    /// base64url-encoded payload bytes.
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Decodes the message body to plain text: the direct payload when one
/// exists, otherwise the first part of a multipart message.
pub fn decode_body(msg: &Message) -> AppResult<String> {
    let payload = msg
        .payload
        .as_ref()
        .ok_or_else(|| AppError::Decode(format!("message {} has no payload", msg.id)))?;

    let data = payload
        .body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .or_else(|| {
            payload
                .parts
                .as_ref()
                .and_then(|parts| parts.first())
                .and_then(|part| part.body.as_ref())
                .and_then(|b| b.data.as_deref())
        })
        .ok_or_else(|| {
            AppError::Decode(format!(
                "message {} has neither a direct body nor any parts with data",
                msg.id
            ))
        })?;

    // Gmail is inconsistent about padding, so strip it before decoding.
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|e| AppError::Decode(format!("invalid base64url body in message {}: {e}", msg.id)))?;

    String::from_utf8(bytes)
        .map_err(|e| AppError::Decode(format!("body of message {} is not valid UTF-8: {e}", msg.id)))
}

/// First header named `to`, case-insensitively, in original order.
/// A message without one cannot be recorded in the sheet at all.
pub fn recipient(msg: &Message) -> AppResult<String> {
    msg.payload
        .as_ref()
        .map(|p| p.headers.as_slice())
        .unwrap_or_default()
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("to"))
        .map(|h| h.value.clone())
        .ok_or_else(|| AppError::MissingHeader(format!("message {} has no `to` header", msg.id)))
}
