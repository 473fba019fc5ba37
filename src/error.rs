use std::fmt::Display;

/// Error kinds surfaced by the control point core, named abstractly so the
/// filesystem bridge boundary can map them to errno-style integers.
#[derive(Debug)]
pub enum ControlPointError {
    InvalidArgument(String),
    NotFound(String),
    NotADirectory(String),
    TransportFailure(anyhow::Error),
    BadResponse(String),
    /// Allocation failure. Rust's global allocator aborts rather than
    /// returning this, so this crate never constructs it; it exists only so
    /// the errno mapping table below is total.
    OutOfMemory,
}

impl ControlPointError {
    /// Maps to the errno values named by the filesystem bridge surface.
    pub fn to_errno(&self) -> i32 {
        match self {
            ControlPointError::InvalidArgument(_) => -libc::EFAULT,
            ControlPointError::NotFound(_) => -libc::ENOENT,
            ControlPointError::NotADirectory(_) => -libc::ENOTDIR,
            ControlPointError::TransportFailure(_) => -libc::EIO,
            ControlPointError::BadResponse(_) => -libc::EIO,
            ControlPointError::OutOfMemory => -libc::ENOMEM,
        }
    }
}

impl Display for ControlPointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlPointError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            ControlPointError::NotFound(msg) => write!(f, "not found: {msg}"),
            ControlPointError::NotADirectory(msg) => write!(f, "not a directory: {msg}"),
            ControlPointError::TransportFailure(err) => write!(f, "transport failure: {err}"),
            ControlPointError::BadResponse(msg) => write!(f, "bad response: {msg}"),
            ControlPointError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for ControlPointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControlPointError::TransportFailure(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ControlPointError {
    fn from(err: anyhow::Error) -> Self {
        ControlPointError::TransportFailure(err)
    }
}
