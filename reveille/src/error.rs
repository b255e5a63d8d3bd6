//! Crate-level error type.

use crate::{
    config::ConfigError, hub::HubError, scheduler::SchedulerStopped, sequencer::DispatchError,
    store::StoreError,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("alarm store: {0}")]
    Store(#[from] StoreError),

    #[error("hub: {0}")]
    Hub(#[from] HubError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerStopped),

    /// The request is valid but the sequencer has nothing to act on.
    #[error("{0}")]
    Conflict(&'static str),

    #[error("{0}")]
    Other(String),
}
