#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn session_not_found(session_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: ApiError::new(
                ErrorCode::SessionNotFound,
                "session_id does not match a loaded session",
                Some(format!("session_id={session_id}")),
            ),
        }
    }

    fn invalid_command(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(ErrorCode::InvalidCommand, message, details),
        }
    }

    fn internal(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: ApiError::new(ErrorCode::InternalError, message, details),
        }
    }

    /// Maps a rejected command onto an HTTP status.
    fn from_api_error(error: ApiError) -> Self {
        let status = match error.error_code {
            ErrorCode::SessionNotFound | ErrorCode::UnknownContract => StatusCode::NOT_FOUND,
            ErrorCode::InsufficientFunds => StatusCode::CONFLICT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InvalidCommand | ErrorCode::ContractVersionUnsupported => {
                StatusCode::BAD_REQUEST
            }
        };
        Self { status, error }
    }

    fn from_catalog(err: CatalogError) -> Self {
        Self::invalid_command("catalog could not be loaded", Some(err.to_string()))
    }

    fn from_persistence(err: PersistenceError) -> Self {
        match err {
            PersistenceError::SessionNotFound(session_id) => Self::session_not_found(&session_id),
            PersistenceError::SessionAlreadyExists(session_id) => Self {
                status: StatusCode::CONFLICT,
                error: ApiError::new(
                    ErrorCode::InvalidCommand,
                    "session_id is already persisted; pass replace_existing=true to replace",
                    Some(format!("session_id={session_id}")),
                ),
            },
            PersistenceError::NotAttached => {
                Self::invalid_command("persistence store is not attached", None)
            }
            other => Self::internal("persistence operation failed", Some(other.to_string())),
        }
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}
