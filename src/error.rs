use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("wrong parameter: {0}")]
    WrongParameter(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ServiceError {
    pub fn wrong_parameter(message: impl Into<String>) -> Self {
        Self::WrongParameter(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Status a transport should report for this failure. Kept here so the
    /// kind-to-status mapping exists in exactly one place.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::WrongParameter(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) | Self::Duplicate(_) => 409,
            Self::Storage(_) => 500,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
