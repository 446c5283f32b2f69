use trellis_types::ContainerId;

/// Misuse of a peer link.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PeerError {
    /// The container is neither side of the link.
    #[error("container {0} is not a peer of this link")]
    UnknownPeer(ContainerId),

    /// No pending reference for the object, or it was already claimed.
    #[error("no pending reference mapped for object on {0}")]
    ReferenceNotMapped(ContainerId),

    /// The link was terminated.
    #[error("peer link terminated")]
    Terminated,

    /// The peer's endpoint has been dropped.
    #[error("peer endpoint {0} is closed")]
    EndpointClosed(ContainerId),

    /// Both sides are the same container.
    #[error("cannot link container {0} to itself")]
    SameContainer(ContainerId),
}

pub type PeerResult<T> = Result<T, PeerError>;
