use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("config error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<TrackerError>,
    },

    #[error("unexpected error: {0}")]
    Other(String),
}

pub type TrackerResult<T> = Result<T, TrackerError>;

impl TrackerError {
    /// Server-provided hint for how long to wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TrackerError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_basic_variants() {
        let _ = TrackerError::Config("missing key".to_string());
        let _ = TrackerError::Malformed("missing 'symbols'".to_string());
        let _ = TrackerError::Other("unexpected".to_string());
    }

    #[test]
    fn exhausted_wraps_last_error() {
        let err = TrackerError::Exhausted {
            attempts: 5,
            last: Box::new(TrackerError::Status {
                status: 503,
                body: "unavailable".to_string(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("5 attempts"), "{msg}");
        assert!(msg.contains("503"), "{msg}");
    }

    #[test]
    fn retry_after_only_set_for_rate_limits() {
        let limited = TrackerError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(TrackerError::Malformed("x".to_string()).retry_after(), None);
    }
}
