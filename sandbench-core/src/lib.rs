#![warn(missing_docs)]
//! Sandbench Core
//!
//! The host side of the harness:
//! - benchmark tree with hierarchical configuration inheritance ([`BenchTree`]),
//! - the registration protocol that turns the guest's declaration calls into
//!   that tree ([`register_tree`]),
//! - the memory bridge for moving index arrays, strings, and samples across
//!   the guest's linear-memory boundary ([`bridge`]),
//! - the adaptive execution engine that drives each leaf's convergence loop
//!   ([`Engine`]).
//!
//! Control flow: [`register_tree`] runs the guest's start routine, which
//! calls back into the host once per declared benchmark/group; the completed
//! tree plus captured session defaults then go to [`Engine::run`], which
//! visits the tree, runs every leaf's timed batches until its convergence
//! criteria are met, and writes the results back onto the nodes.

pub mod bridge;
mod clock;
mod engine;
mod error;
mod node;
mod registry;

pub use clock::Clock;
pub use engine::Engine;
pub use error::EngineError;
pub use node::{BenchNode, BenchTree, NodeId, Overrides, SessionDefaults};
pub use registry::{register_tree, FALLBACK_TITLE};
