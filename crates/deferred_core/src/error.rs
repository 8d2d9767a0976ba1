use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeferredError {
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("staging store error: {message}")]
    Staging { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
}

impl DeferredError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn staging(message: impl Into<String>) -> Self {
        Self::Staging {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

pub type DeferredResult<T> = Result<T, DeferredError>;

impl From<sea_orm::DbErr> for DeferredError {
    fn from(value: sea_orm::DbErr) -> Self {
        DeferredError::storage(value.to_string())
    }
}

impl From<serde_json::Error> for DeferredError {
    fn from(value: serde_json::Error) -> Self {
        DeferredError::validation(value.to_string())
    }
}
