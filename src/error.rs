use derive_more::Display;

pub type Result<T> = std::result::Result<T, BrokerSimError>;

#[derive(Debug, Display, Serialize, Deserialize, Clone, Hash, PartialEq, Eq)]
pub enum BrokerSimError {
    /// A caller supplied a value that violates a topology or governance rule.
    #[display(fmt = "invalid {}: {}", field, error_msg)]
    Validation { field: String, error_msg: String },
    #[display(fmt = "{} not found: {}", kind, name)]
    NotFound { kind: String, name: String },
    #[display(fmt = "configuration error in {}: {}", file_path, error_msg)]
    ConfigError {
        file_path: String,
        error_msg: String,
    },
    #[display(fmt = "internal error: {}", error_msg)]
    Internal { error_msg: String },
}

impl BrokerSimError {
    pub fn validation(field: &str, error_msg: impl Into<String>) -> Self {
        BrokerSimError::Validation {
            field: field.to_string(),
            error_msg: error_msg.into(),
        }
    }

    pub fn not_found(kind: &str, name: impl ToString) -> Self {
        BrokerSimError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    /// The field a validation error was raised for, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            BrokerSimError::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl std::error::Error for BrokerSimError {}

impl From<std::io::Error> for BrokerSimError {
    fn from(err: std::io::Error) -> Self {
        BrokerSimError::Internal {
            error_msg: err.to_string(),
        }
    }
}

impl From<serde_json::error::Error> for BrokerSimError {
    fn from(err: serde_json::error::Error) -> Self {
        BrokerSimError::Internal {
            error_msg: err.to_string(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for BrokerSimError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        BrokerSimError::Internal {
            error_msg: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for BrokerSimError {
    fn from(err: tokio::task::JoinError) -> Self {
        BrokerSimError::Internal {
            error_msg: err.to_string(),
        }
    }
}
