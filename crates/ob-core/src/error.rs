use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("API error: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Tool error: {tool} - {message}")]
    Tool { tool: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Agent {agent} exceeded max iterations ({max})")]
    MaxIterations { agent: String, max: usize },

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Error {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::RateLimit(_) | Error::Timeout(_)
        )
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    /// Input was rejected locally, before any external call.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::InvalidRequest(_))
    }

    /// An external collaborator (threat service, completion provider,
    /// chat platform) failed or could not be reached.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::Api { .. }
                | Error::Auth(_)
                | Error::RateLimit(_)
                | Error::Network(_)
                | Error::Serialization(_)
                | Error::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::api(400, "Bad request");
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("Bad request"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::network("connection reset").is_retryable());
        assert!(Error::rate_limit("too many requests").is_retryable());
        assert!(Error::timeout("threat lookup").is_retryable());
        assert!(!Error::auth("invalid key").is_retryable());
    }

    #[test]
    fn test_classification() {
        assert!(Error::validation("bad uuid").is_validation());
        assert!(!Error::validation("bad uuid").is_upstream());
        assert!(Error::api(502, "bad gateway").is_upstream());
        assert!(Error::timeout("completion").is_upstream());
        let exhausted = Error::MaxIterations {
            agent: "orchestrator".into(),
            max: 6,
        };
        assert!(!exhausted.is_upstream());
        assert!(!exhausted.is_validation());
        assert!(exhausted.to_string().contains("6"));
    }
}
