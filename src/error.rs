/// The closed error taxonomy surfaced by every public operation.
///
/// Each public method raises a single [`ContainerError`], optionally wrapping
/// an inner error that triggered it (see [`ContainerError::context`]). The
/// taxonomy mirrors the one and only failure vocabulary the container
/// exposes to callers; nothing outside this enum escapes the crate boundary.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    // Parameter errors
    #[error("wrong parameters: {0}")]
    WrongParameters(String),
    #[error("action is forbidden: {0}")]
    ActionIsForbidden(String),
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,

    // Storage errors
    #[error("can't open container")]
    CantOpen(#[source] Option<Box<ContainerError>>),
    #[error("can't read")]
    CantRead(#[source] Option<Box<ContainerError>>),
    #[error("can't write")]
    CantWrite(#[source] Option<Box<ContainerError>>),
    #[error("can't create")]
    CantCreate(#[source] Option<Box<ContainerError>>),
    #[error("can't remove")]
    CantRemove(#[source] Option<Box<ContainerError>>),
    #[error("container is damaged")]
    IsDamaged,
    #[error("container is not valid")]
    NotValid,
    #[error("container is empty")]
    IsEmpty,

    // Resource errors
    #[error("can't allocate memory")]
    CantAllocMemory,
    #[error("owner is missing")]
    OwnerIsMissing,
    #[error("disconnected")]
    Disconnected,
    #[error("busy")]
    Busy,
    #[error("no access")]
    NoAccess,

    // Internal
    #[error("internal invariant violation: {0}")]
    Internal(String),

    /// A caller-supplied [`ProgressObserver`](crate::observer::ProgressObserver)
    /// requested a stop, or raised its own error mid-operation. The engine
    /// has already applied the current write mode's abort semantics before
    /// this is returned. `progress` carries the bytes read or written before
    /// the abort point, standing in for the source's out-parameter.
    #[error("operation aborted by observer after {progress} bytes")]
    Aborted { progress: u64, source: Option<Box<ContainerError>> },
}

impl ContainerError {
    /// Wraps `self` as the source of an outer `CantCreate`, matching the
    /// propagation policy: low-level failures get an outer context code.
    pub fn wrap_create(self) -> Self {
        ContainerError::CantCreate(Some(Box::new(self)))
    }

    pub fn wrap_open(self) -> Self {
        ContainerError::CantOpen(Some(Box::new(self)))
    }

    pub fn wrap_read(self) -> Self {
        ContainerError::CantRead(Some(Box::new(self)))
    }

    pub fn wrap_write(self) -> Self {
        ContainerError::CantWrite(Some(Box::new(self)))
    }

    pub(crate) fn aborted(progress: u64, source: Option<ContainerError>) -> Self {
        ContainerError::Aborted { progress, source: source.map(Box::new) }
    }
}

impl From<rusqlite::Error> for ContainerError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;
        match &err {
            rusqlite::Error::SqliteFailure(sql_err, _) => match sql_err.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ContainerError::Busy,
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => ContainerError::IsDamaged,
                ErrorCode::CannotOpen => ContainerError::CantOpen(None),
                ErrorCode::PermissionDenied => ContainerError::NoAccess,
                _ => ContainerError::Internal(err.to_string()),
            },
            rusqlite::Error::QueryReturnedNoRows => ContainerError::NotFound,
            _ => ContainerError::Internal(err.to_string()),
        }
    }
}

impl From<std::io::Error> for ContainerError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => ContainerError::NotFound,
            ErrorKind::AlreadyExists => ContainerError::AlreadyExists,
            ErrorKind::PermissionDenied => ContainerError::NoAccess,
            ErrorKind::UnexpectedEof => ContainerError::IsEmpty,
            _ => ContainerError::Internal(err.to_string()),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ContainerError>;
