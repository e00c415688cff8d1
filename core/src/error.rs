use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{source_name} returned HTTP {status}")]
    UpstreamStatus { source_name: String, status: u16 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("parse error from {source_name}: {details}")]
    Parse { source_name: String, details: String },

    #[error("ingest error from {source_name}: {details}")]
    Ingest { source_name: String, details: String },

    #[error("rate limit exceeded, retry after {retry_after_secs} seconds")]
    RateLimit { retry_after_secs: u64 },

    #[error("authentication failed for {site}: {reason}")]
    Auth { site: String, reason: String },

    #[error("session expired for {site} - login required")]
    SessionExpired { site: String },

    #[error("action outcome unclear: {0}")]
    ActionAmbiguous(String),

    #[error("browser automation error: {0}")]
    Browser(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn parse(source_name: impl Into<String>, details: impl Into<String>) -> Self {
        Error::Parse {
            source_name: source_name.into(),
            details: details.into(),
        }
    }

    pub fn ingest(source_name: impl Into<String>, details: impl Into<String>) -> Self {
        Error::Ingest {
            source_name: source_name.into(),
            details: details.into(),
        }
    }

    pub fn auth(site: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Auth {
            site: site.into(),
            reason: reason.into(),
        }
    }

    /// Transient-network class: the only errors the retry policy re-attempts.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => {
                if e.is_decode() || e.is_builder() || e.is_redirect() {
                    return false;
                }
                e.status()
                    .map_or(true, |s| s.is_server_error() || s.as_u16() == 429)
            }
            Error::UpstreamStatus { status, .. } => *status >= 500 || *status == 429,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            Error::RateLimit { .. } | Error::Io(_) => true,
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_classification() {
        let server = Error::UpstreamStatus {
            source_name: "goldin".into(),
            status: 503,
        };
        let throttled = Error::UpstreamStatus {
            source_name: "goldin".into(),
            status: 429,
        };
        let missing = Error::UpstreamStatus {
            source_name: "goldin".into(),
            status: 404,
        };

        assert!(server.is_retryable());
        assert!(throttled.is_retryable());
        assert!(!missing.is_retryable());
    }

    #[test]
    fn parse_and_auth_errors_are_not_retried() {
        assert!(!Error::parse("rea", "missing title").is_retryable());
        assert!(!Error::auth("goldin", "wrong password").is_retryable());
        assert!(!Error::SessionExpired { site: "goldin".into() }.is_retryable());
        assert!(Error::Config("missing url".into()).is_fatal());
    }
}
