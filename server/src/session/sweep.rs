//! Background reclamation of expired session artifacts.
//!
//! Liveness is still decided lazily on access. The sweep only reclaims disk
//! space for sessions that have been expired for several TTLs and were never
//! reallocated.
//!
//! # Design
//!
//! The sweep task holds a `Weak<SessionStore>` to avoid keeping the store
//! alive on its own:
//! - The server owns the store through an `Arc`
//! - The task upgrades its weak reference once per tick
//! - When the store is dropped, `Weak::upgrade()` returns `None` and the task exits

use std::sync::Weak;
use std::time::Duration;

use super::SessionStore;

/// Configuration for the sweep task.
#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// A session is reclaimed once untouched for `grace_multiple` TTLs.
    pub grace_multiple: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            grace_multiple: 2,
        }
    }
}

/// Spawn the background sweep task for a session store.
///
/// # Returns
/// A `JoinHandle` that can be used to await the task or cancel it on shutdown.
///
/// # Invariants
/// - Uses `Weak` reference to prevent keeping the store alive
/// - Exits cleanly when the store is dropped
pub fn spawn_sweep_task(
    store: Weak<SessionStore>,
    config: SweepConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        sweep_loop(store, config).await;
    })
}

async fn sweep_loop(store: Weak<SessionStore>, config: SweepConfig) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(live_store) = store.upgrade() else {
            tracing::debug!("session store dropped, sweep task exiting");
            break;
        };

        match live_store.sweep(config.grace_multiple) {
            Ok(report) if report.sessions_removed > 0 || report.orphan_files_removed > 0 => {
                tracing::info!(
                    "session sweep reclaimed {} sessions and {} orphan files",
                    report.sessions_removed,
                    report.orphan_files_removed
                );
            }
            Ok(_) => {}
            // Sweep errors must not stop the task; the next tick retries.
            Err(e) => tracing::warn!("session sweep failed: {e}"),
        }
    }
}
