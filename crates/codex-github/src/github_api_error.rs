use thiserror::Error;

const ERROR_BODY_MAX_CHARS: usize = 800;

#[derive(Debug, Error)]
/// Enumerates supported `GithubApiError` values.
pub enum GithubApiError {
    #[error("github api {operation} failed with status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("github api {operation} request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decode github {operation}: {message}")]
    Decode { operation: String, message: String },
    #[error("github app authentication failed: {0}")]
    Auth(String),
}

impl GithubApiError {
    /// Non-success response; the body is cut to keep error chains loggable.
    pub fn from_status(operation: &str, status: u16, body: &str) -> Self {
        let body = match body.char_indices().nth(ERROR_BODY_MAX_CHARS) {
            Some((cut, _)) => format!("{}...", &body[..cut]),
            None => body.to_string(),
        };
        Self::Status {
            operation: operation.to_string(),
            status,
            body,
        }
    }

    /// HTTP status carried by the error, when GitHub answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { source, .. } => source.status().map(|status| status.as_u16()),
            Self::Decode { .. } | Self::Auth(_) => None,
        }
    }
}
