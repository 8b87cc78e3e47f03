#![warn(missing_docs)]
//! # Sandbench
//!
//! Adaptive micro-benchmark harness for compiled, sandboxed guest modules.
//!
//! A guest module declares its benchmarks through host imports during its
//! start routine; the host collects them into a tree with hierarchical
//! configuration inheritance, then drives each benchmark through an adaptive
//! convergence loop: timed batches of guest iterations until the time budget
//! expires or the iteration floor is cleared. All guest data crosses a
//! linear-memory boundary through the [`sandbench_core::bridge`] module.
//!
//! - **Benchmark tree**: groups and benchmarks in declaration order, with
//!   per-subtree overrides resolving to the nearest ancestor, else the
//!   guest's session defaults ([`BenchTree`]).
//! - **Registration protocol**: the guest's declaration calls, including
//!   nested group re-entry through the indirect-call table
//!   ([`register_tree`]).
//! - **Adaptive engine**: per-leaf convergence loop with hook arrays pinned
//!   in guest memory for the duration of the run ([`Engine`]).
//! - **Reference guest**: an in-process [`GuestModule`] over a real linear
//!   memory, for harness development and tests ([`ReferenceGuest`]).
//!
//! ## Quick Start
//!
//! ```ignore
//! fn main() -> anyhow::Result<()> {
//!     let mut compiler = MyGuestCompiler::new();
//!     sandbench::run(&mut compiler)
//! }
//! ```

// Re-export the host side.
pub use sandbench_core::{
    bridge, register_tree, BenchNode, BenchTree, Clock, Engine, EngineError, NodeId, Overrides,
    SessionDefaults, FALLBACK_TITLE,
};

// Re-export the guest ABI and reference runtime.
pub use sandbench_guest::{
    GuestBuilder, GuestModule, HostImports, LinearMemory, ReferenceGuest, Trap, NO_CALLBACK,
    PAGE_SIZE,
};

// Re-export the CLI surface.
pub use sandbench_cli::{
    run, run_with_cli, Cli, Commands, CompiledModule, Compiler, Report, TargetReport,
};

/// Sample reductions shared by host and reference guest.
pub mod stats {
    pub use sandbench_stats::{
        maximum, mean, median, minimum, sort_samples, std_dev, variance,
    };
}
