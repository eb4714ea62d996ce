use atlas_store::StoreError;

/// Failures of the session/service surface. The transport maps these onto
/// HTTP statuses; everything here is rejected before the turn has had any
/// side effect.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A turn is already in flight for this session.
    #[error("session {0} already has a turn in flight")]
    SessionBusy(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Request rejected before touching session state.
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::SessionNotFound(what),
            other => Self::Store(other),
        }
    }
}
