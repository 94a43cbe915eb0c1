//! Error types for Fanout

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FanoutError>;

#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Database(#[from] DbError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl FanoutError {
    /// Returns the appropriate process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            FanoutError::InvalidInput(_) => 3,
            FanoutError::Publish(PublishError::CredentialsMissing(_)) => 2,
            FanoutError::Publish(_) => 1,
            FanoutError::Config(_) => 1,
            FanoutError::Database(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Classified publish failures.
///
/// Every error crossing the adapter boundary is one of these kinds plus a
/// human-readable message; raw transport or API errors never leak past it.
/// `Clone` is required so the queue's retry machinery can keep the original
/// classification while the lifecycle records its own copy.
#[derive(Error, Debug, Clone)]
pub enum PublishError {
    #[error("credentials missing: {0}")]
    CredentialsMissing(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("unsupported platform: {0}")]
    Unsupported(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl PublishError {
    /// Stable machine-readable tag for this classification
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::CredentialsMissing(_) => "credentials_missing",
            PublishError::PermissionDenied(_) => "permission_denied",
            PublishError::RateLimited(_) => "rate_limited",
            PublishError::Network(_) => "transient_network",
            PublishError::Unsupported(_) => "unsupported_platform",
            PublishError::NotFound(_) => "not_found",
        }
    }

    /// Whether a retry of the same request can reasonably succeed.
    ///
    /// Drives the job queue's attempt/backoff decision; permanent
    /// classifications burn the job immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PublishError::Network(_) | PublishError::RateLimited(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_invalid_input() {
        let error = FanoutError::InvalidInput("empty content".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn exit_code_credentials_missing() {
        let error = FanoutError::Publish(PublishError::CredentialsMissing(
            "no facebook token".to_string(),
        ));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn exit_code_other_publish_errors() {
        for error in [
            PublishError::PermissionDenied("t".to_string()),
            PublishError::RateLimited("t".to_string()),
            PublishError::Network("t".to_string()),
            PublishError::Unsupported("t".to_string()),
            PublishError::NotFound("t".to_string()),
        ] {
            assert_eq!(FanoutError::Publish(error).exit_code(), 1);
        }
    }

    #[test]
    fn exit_code_config_and_database() {
        let config = FanoutError::Config(ConfigError::MissingField("database.path".to_string()));
        assert_eq!(config.exit_code(), 1);

        let db = FanoutError::Database(DbError::Corrupt("bad summary json".to_string()));
        assert_eq!(db.exit_code(), 1);
    }

    #[test]
    fn publish_error_kinds_cover_taxonomy() {
        assert_eq!(
            PublishError::CredentialsMissing("x".into()).kind(),
            "credentials_missing"
        );
        assert_eq!(
            PublishError::PermissionDenied("x".into()).kind(),
            "permission_denied"
        );
        assert_eq!(PublishError::RateLimited("x".into()).kind(), "rate_limited");
        assert_eq!(PublishError::Network("x".into()).kind(), "transient_network");
        assert_eq!(
            PublishError::Unsupported("x".into()).kind(),
            "unsupported_platform"
        );
        assert_eq!(PublishError::NotFound("x".into()).kind(), "not_found");
    }

    #[test]
    fn transient_classification() {
        assert!(PublishError::Network("timeout".into()).is_transient());
        assert!(PublishError::RateLimited("slow down".into()).is_transient());

        assert!(!PublishError::CredentialsMissing("x".into()).is_transient());
        assert!(!PublishError::PermissionDenied("x".into()).is_transient());
        assert!(!PublishError::Unsupported("x".into()).is_transient());
        assert!(!PublishError::NotFound("x".into()).is_transient());
    }

    #[test]
    fn error_messages_keep_context() {
        let error = FanoutError::Publish(PublishError::PermissionDenied(
            "facebook: page publish not granted".to_string(),
        ));
        let message = format!("{}", error);
        assert!(message.contains("permission denied"));
        assert!(message.contains("page publish not granted"));
    }

    #[test]
    fn conversion_from_publish_error() {
        let publish: FanoutError = PublishError::RateLimited("burst".to_string()).into();
        assert!(matches!(publish, FanoutError::Publish(_)));
    }
}
