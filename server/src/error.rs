//! Errors surfaced to clients by the request dispatcher.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

use crate::auth::TokenError;
use crate::engine::EngineError;
use crate::session::SessionStoreError;

/// Why a dispatched request produced no visualization.
#[derive(Debug)]
pub enum DispatchError {
    /// The request did not come from one of our own pages, or its session
    /// token is not one we issued. Nothing was changed.
    InvalidOrigin,
    /// The session named by the token has expired, was never built, or its
    /// id now belongs to a different session.
    SessionExpiredOrMissing,
    /// The build source could not be staged. No session was created.
    UploadFailure(String),
    /// The engine did not produce a tree. Session state is unchanged.
    EngineInvocationFailure(EngineError),
    /// Every sampled session id was taken.
    CapacityExhausted,
    /// The session store failed.
    Store(SessionStoreError),
    /// A token could not be issued for a freshly built session.
    Token(TokenError),
}

impl DispatchError {
    /// HTTP status reported to the client.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidOrigin | Self::UploadFailure(_) => StatusCode::BAD_REQUEST,
            Self::SessionExpiredOrMissing => StatusCode::GONE,
            Self::CapacityExhausted => StatusCode::SERVICE_UNAVAILABLE,
            Self::EngineInvocationFailure(_) | Self::Store(_) | Self::Token(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show the client. Internal detail stays in the logs.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidOrigin => "This request did not come from the visualizer pages.".to_string(),
            Self::SessionExpiredOrMissing => {
                "Your tree has expired or no longer exists. Please build a new one.".to_string()
            }
            Self::UploadFailure(reason) => format!("The input could not be used: {reason}."),
            Self::EngineInvocationFailure(_) => {
                "The tree engine failed to process this request.".to_string()
            }
            Self::CapacityExhausted => {
                "The server is busy with other trees. Please try again in a few minutes."
                    .to_string()
            }
            Self::Store(_) | Self::Token(_) => "An internal error occurred.".to_string(),
        }
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOrigin => write!(f, "invalid request origin"),
            Self::SessionExpiredOrMissing => write!(f, "session expired or missing"),
            Self::UploadFailure(reason) => write!(f, "upload failure: {reason}"),
            Self::EngineInvocationFailure(e) => write!(f, "engine invocation failed: {e}"),
            Self::CapacityExhausted => write!(f, "session capacity exhausted"),
            Self::Store(e) => write!(f, "session store error: {e}"),
            Self::Token(e) => write!(f, "token error: {e}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::EngineInvocationFailure(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Token(e) => Some(e),
            _ => None,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let body = crate::pages::error_page(&self.user_message());
        (self.status_code(), Html(body)).into_response()
    }
}

impl From<SessionStoreError> for DispatchError {
    fn from(e: SessionStoreError) -> Self {
        match e {
            SessionStoreError::Exhausted { .. } => Self::CapacityExhausted,
            SessionStoreError::NotLive(_) => Self::SessionExpiredOrMissing,
            other => Self::Store(other),
        }
    }
}

impl From<EngineError> for DispatchError {
    fn from(e: EngineError) -> Self {
        Self::EngineInvocationFailure(e)
    }
}
