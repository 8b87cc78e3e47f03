#![warn(missing_docs)]
//! Sandbench Guest ABI
//!
//! This crate pins down the contract between the host harness and a compiled,
//! sandboxed guest module:
//! - [`GuestModule`] — everything the guest exports and the host calls
//!   (startup, indirect calls, session-default getters, the sample buffer,
//!   the timed-batch entry point, reductions, and raw-memory primitives).
//! - [`HostImports`] — everything the host exposes and the guest calls back
//!   during registration (node reporting, one-shot setters, hook reporting)
//!   plus the monotonic clock import used for timing.
//! - [`Trap`] — the single error type that crosses the boundary in either
//!   direction.
//!
//! It also ships [`ReferenceGuest`], an in-process guest runtime with a real
//! linear memory, indirect-call table, pin set, and sample buffer. Any
//! compiled-module binding the external compiler collaborator produces must
//! satisfy the same traits; the reference runtime is what the test suite and
//! demo programs drive.

mod abi;
mod memory;
mod runtime;

pub use abi::{GuestModule, HostImports, Trap, NO_CALLBACK};
pub use memory::{LinearMemory, PAGE_SIZE};
pub use runtime::{GuestBuilder, GuestDefaults, ReferenceGuest};
