pub mod correlator;
pub mod driver;
pub mod iproute2;
pub mod kind;
pub mod memory;
pub mod orchestrator;
pub mod registry;

use serde::Serialize;

pub use crate::{
    driver::{Drivers, ResourceDriver},
    orchestrator::{ApplyError, Notification, Orchestrator, PushError, PushOptions, PushOutcome},
};

/// How an item ended up after a successful driver interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[derive(strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Created in the dataplane.
    Configured,
    /// Replaced an older value under the same identity.
    Reconfigured,
    /// Already programmed with this exact value.
    InSync,
    Deleted,
    /// Delete of a name that was never registered.
    NotFound,
    /// Left out of a full resync by a delete item.
    Omitted,
}

/// Operation an [`ApplyError`] happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[derive(strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Configure,
    Delete,
    Resync,
    Prune,
}
