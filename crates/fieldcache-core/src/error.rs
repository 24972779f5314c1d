use thiserror::Error;

/// Failure of the fetch primitive itself.
///
/// A response with a non-2xx status is not an error at this level; only the
/// inability to obtain a response is.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The host could not be reached or did not answer in time.
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited - gave up after {0} retries")]
    RateLimited(u32),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl FetchError {
    /// Truncate a response body to avoid logging excessive data
    pub fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_body_unchanged() {
        assert_eq!(FetchError::truncate_body("offline"), "offline");
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "x".repeat(600);
        let truncated = FetchError::truncate_body(&body);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 600 total bytes)"));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let body = format!("{}é{}", "a".repeat(499), "b".repeat(100));
        let truncated = FetchError::truncate_body(&body);
        assert!(truncated.starts_with(&"a".repeat(499)));
        assert!(!truncated.contains('é'));
    }
}
