use thiserror::Error;

#[derive(Debug, Error)]
pub enum TidemarkError {
    #[error("configuration error: {message}")]
    Config { message: String },
    #[error("schema contract error: {message}")]
    SchemaContract { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
}

impl TidemarkError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn schema_contract(message: impl Into<String>) -> Self {
        Self::SchemaContract {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Configuration errors are never retried or recovered automatically.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

pub type TidemarkResult<T> = Result<T, TidemarkError>;

impl From<sea_orm::DbErr> for TidemarkError {
    fn from(value: sea_orm::DbErr) -> Self {
        TidemarkError::storage(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::TidemarkError;

    #[test]
    fn helper_constructors_set_variants() {
        let err = TidemarkError::config("missing database");
        assert!(matches!(err, TidemarkError::Config { .. }));
        assert!(err.is_fatal());
        let err = TidemarkError::schema_contract("no shared columns");
        assert!(matches!(err, TidemarkError::SchemaContract { .. }));
        let err = TidemarkError::storage("disk");
        assert!(matches!(err, TidemarkError::Storage { .. }));
        assert!(!err.is_fatal());
        let err = TidemarkError::not_found("missing");
        assert!(matches!(err, TidemarkError::NotFound { .. }));
        let err = TidemarkError::invalid("bad");
        assert!(matches!(err, TidemarkError::Validation { .. }));
    }

    #[test]
    fn display_includes_category() {
        let err = TidemarkError::storage("connection reset");
        assert_eq!(err.to_string(), "storage error: connection reset");
    }
}
