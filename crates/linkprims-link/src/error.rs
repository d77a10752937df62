use crate::config::DriveMode;

/// Errors that can occur in link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] linkprims_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] linkprims_frame::FrameError),

    /// The operation needs an established connection.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called while the link is already running.
    #[error("link already connected or connecting")]
    AlreadyConnected,

    /// A one-shot connect gave up without establishing a stream.
    #[error("could not connect to {0}")]
    ConnectFailed(String),

    /// The operation is only available in the other drive mode.
    #[error("operation requires {expected:?} drive mode")]
    WrongDriveMode { expected: DriveMode },

    /// A background worker panicked.
    #[error("{0} worker panicked")]
    WorkerPanicked(&'static str),
}

pub type Result<T> = std::result::Result<T, LinkError>;
