//! Ephemeral session state.
//!
//! A session is one visitor's in-progress tree: a small integer id, a set of
//! block files on disk, and a last-touch time. Sessions are never deleted on
//! completion; they lapse after their TTL and are reclaimed by the sweep or
//! overwritten when their id is reallocated.

mod artifacts;
mod id;
mod store;
mod sweep;

pub use artifacts::{ARTIFACT_PREFIX, ArtifactLayout};
pub use id::{InvalidSessionId, SessionId};
pub use store::{SessionConfig, SessionGuard, SessionStore, SessionStoreError, SweepReport};
pub use sweep::{SweepConfig, spawn_sweep_task};
