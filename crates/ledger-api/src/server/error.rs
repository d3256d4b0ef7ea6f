#[derive(Debug, thiserror::Error)]
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
    fn invalid_request(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(ErrorCode::InvalidRequest, message, details),
        }
    }

    fn internal(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: ApiError::new(ErrorCode::InternalError, message, details),
        }
    }

    fn from_ledger(err: LedgerError) -> Self {
        let status = match &err {
            LedgerError::UnknownTier(_)
            | LedgerError::OutOfRange { .. }
            | LedgerError::InvalidReferrer { .. } => StatusCode::BAD_REQUEST,
            LedgerError::UnknownUser(_) | LedgerError::UnknownInvestment(_) => {
                StatusCode::NOT_FOUND
            }
            LedgerError::InvestmentNotActive(_) | LedgerError::AlreadyRunning(_) => {
                StatusCode::CONFLICT
            }
            LedgerError::StoreWriteFailure(StoreError::Duplicate(_)) => StatusCode::CONFLICT,
            LedgerError::StoreWriteFailure(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            LedgerError::StoreWriteFailure(_) | LedgerError::JobAborted { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %err, "request failed");
        }
        Self {
            status,
            error: ApiError::new(err.code(), err.to_string(), None),
        }
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}
