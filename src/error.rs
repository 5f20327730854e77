use derive_more::derive::Display;
use reqwest::StatusCode;

use crate::auth::AuthError;

pub type AppResult<T> = Result<T, AppError>;

/// Every failure the pipeline can hit, one variant per step boundary.
/// All variants except `Checkpoint` and `Oauth2` at startup are
/// recovered by the poller: logged, checkpoint untouched, next tick
/// retries the same message.
#[derive(Debug, Display)]
pub enum AppError {
    #[display("fetch error: {_0}")]
    Fetch(anyhow::Error),
    #[display("decode error: {_0}")]
    Decode(String),
    #[display("missing header: {_0}")]
    MissingHeader(String),
    #[display("extraction error: {_0}")]
    Extraction(anyhow::Error),
    #[display("unparseable model response: {_0}")]
    ParseResponse(String),
    #[display("append error: {_0}")]
    Append(anyhow::Error),
    #[display("checkpoint error: {_0}")]
    Checkpoint(anyhow::Error),
    #[display("oauth error: {_0}")]
    Oauth2(AuthError),
    RequestTimeout,
    TooManyRequests,
    #[display("internal error: {_0}")]
    Internal(anyhow::Error),
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return AppError::RequestTimeout;
        }
        match error.status() {
            Some(StatusCode::REQUEST_TIMEOUT) => AppError::RequestTimeout,
            Some(StatusCode::TOO_MANY_REQUESTS) => AppError::TooManyRequests,
            _ => AppError::Internal(error.into()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        AppError::Oauth2(error)
    }
}
