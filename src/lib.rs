//! Detect updated container images and recreate the containers that use them.
pub mod aggregator;
pub mod checker;
pub mod cli;
pub mod display;
pub mod docker;
pub mod notifications;
pub mod operator;
pub mod reconcile;
pub mod resolver;
pub mod schedule;
pub mod self_update;
pub mod types;

use bollard::errors::Error as BollardError;
use thiserror::Error;

/// Label selecting containers in label discovery mode.
pub const UPDATE_LABEL: (&str, &str) = ("watchducker.update", "true");

/// Labels marking the container watchducker itself runs in. The second one is
/// what the upstream container image documents.
pub const SELF_LABELS: [(&str, &str); 2] = [
    ("watchducker.self", "true"),
    ("naomi233.watchducker", "true"),
];

#[derive(Debug, Error)]
pub enum WatchduckerError {
    #[error("cannot resolve image reference `{reference}`: {reason}")]
    Resolution { reference: String, reason: String },
    #[error("{context}: {source}")]
    Engine {
        context: String,
        #[source]
        source: BollardError,
    },
    #[error("image `{0}` not found locally")]
    ImageNotFound(String),
    #[error("no container labelled as watchducker itself is running")]
    SelfContainerNotFound,
    #[error("self update failed while {step}: {source}")]
    SelfUpdate {
        step: String,
        #[source]
        source: Box<WatchduckerError>,
    },
    #[error("{failed} container update(s) failed, first: {first}")]
    Batch {
        failed: usize,
        first: Box<WatchduckerError>,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("cannot connect to the container engine: {0}")]
    Connect(#[source] BollardError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("notification failed: {0}")]
    Notify(String),
}

impl WatchduckerError {
    pub(crate) fn engine(context: impl Into<String>, source: BollardError) -> Self {
        Self::Engine {
            context: context.into(),
            source,
        }
    }
}

/// First twelve characters of a container id, the form docker prints.
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
