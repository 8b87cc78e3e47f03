//! Host-side error taxonomy.

use crate::bridge::BridgeFault;
use sandbench_guest::Trap;
use thiserror::Error;

/// Everything that can abort a registration or an engine run.
///
/// None of these are retried anywhere: re-running timing-sensitive guest
/// code would corrupt the sample statistics, so a failure always propagates
/// to the caller with the tree left in whatever state it reached.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A guest-memory access went wrong on the host side.
    #[error("bridge fault: {0}")]
    Bridge(#[from] BridgeFault),

    /// An invoked guest function trapped. Aborts the in-progress convergence
    /// loop and the enclosing tree walk, short-circuiting remaining siblings
    /// and remaining `afterAll` hooks at every level above the failure.
    #[error("guest call failed: {0}")]
    Guest(#[from] Trap),

    /// A configurable quantity had neither an override nor a session
    /// default. Cannot happen when startup order is respected; it indicates
    /// the engine ran on a tree that never went through registration.
    #[error("no value resolvable for {quantity}: session defaults were never captured")]
    ConfigGap {
        /// Which quantity failed to resolve.
        quantity: &'static str,
    },
}
