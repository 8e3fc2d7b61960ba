use std::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CodeboxErrorType {
    NotFound,
    AlreadyExists,
    InvalidPath,
    InvalidInput,
    UnsupportedLanguage,
    EvaluationFault,
    ProviderUnreachable,
    ProviderError,
    Busy,
    IOError,
    InternalError,
}

impl From<CodeboxErrorType> for warp::http::StatusCode {
    fn from(error_type: CodeboxErrorType) -> Self {
        match error_type {
            CodeboxErrorType::NotFound => warp::http::StatusCode::NOT_FOUND,
            CodeboxErrorType::AlreadyExists => warp::http::StatusCode::CONFLICT,
            CodeboxErrorType::InvalidPath | CodeboxErrorType::InvalidInput => {
                warp::http::StatusCode::BAD_REQUEST
            }
            CodeboxErrorType::UnsupportedLanguage | CodeboxErrorType::EvaluationFault => {
                warp::http::StatusCode::UNPROCESSABLE_ENTITY
            }
            CodeboxErrorType::ProviderError => warp::http::StatusCode::BAD_GATEWAY,
            CodeboxErrorType::ProviderUnreachable => warp::http::StatusCode::SERVICE_UNAVAILABLE,
            CodeboxErrorType::Busy => warp::http::StatusCode::CONFLICT,
            _ => warp::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CodeboxError {
    pub(crate) error_type: CodeboxErrorType,
    pub(crate) message: String,
}

impl warp::Reply for CodeboxError {
    fn into_response(self) -> warp::reply::Response {
        let status: warp::http::StatusCode = self.error_type.into();
        warp::reply::with_status(warp::reply::json(&self.message), status).into_response()
    }
}

impl CodeboxError {
    pub(crate) fn new(error_type: CodeboxErrorType, message: String) -> Self {
        Self {
            error_type,
            message,
        }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::new(CodeboxErrorType::NotFound, message.into())
    }

    pub(crate) fn already_exists(message: impl Into<String>) -> Self {
        Self::new(CodeboxErrorType::AlreadyExists, message.into())
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(CodeboxErrorType::InvalidInput, message.into())
    }
}

impl std::fmt::Display for CodeboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.message)
    }
}

impl From<std::io::Error> for CodeboxError {
    fn from(error: std::io::Error) -> Self {
        Self {
            error_type: CodeboxErrorType::IOError,
            message: error.to_string(),
        }
    }
}

impl From<sled::Error> for CodeboxError {
    fn from(error: sled::Error) -> Self {
        Self {
            error_type: CodeboxErrorType::IOError,
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for CodeboxError {
    fn from(error: serde_json::Error) -> Self {
        Self {
            error_type: CodeboxErrorType::InternalError,
            message: error.to_string(),
        }
    }
}

impl From<reqwest::Error> for CodeboxError {
    fn from(error: reqwest::Error) -> Self {
        // Anything that never produced a response is treated as an unreachable provider
        let error_type = if error.is_connect() || error.is_timeout() || error.is_request() {
            CodeboxErrorType::ProviderUnreachable
        } else {
            CodeboxErrorType::ProviderError
        };
        Self {
            error_type,
            message: error.to_string(),
        }
    }
}

impl Error for CodeboxError {}

pub(crate) type Result<T> = std::result::Result<T, CodeboxError>;
