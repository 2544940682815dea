use shared::domain::SubmitStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("network manager must be created inside a tokio runtime")]
    NoRuntime,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The handle was obtained while the slot was available but it no longer is.
    #[error("submission unavailable while {status}")]
    Unavailable { status: SubmitStatus },
    /// The dependencies changed after the handle was handed out.
    #[error("submission handle is stale")]
    StaleHandle,
    #[error("submission controller was dropped")]
    ControllerDropped,
    #[error("submission run aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("on-connection side effect failed: {0}")]
    SideEffect(#[source] anyhow::Error),
    #[error("connection wait was interrupted before settling")]
    Interrupted,
}
