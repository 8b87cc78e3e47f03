//! The host/guest call contract.
//!
//! Both traits are object-safe on purpose: the registration protocol is
//! re-entrant (the host's `report_node` re-enters the guest through the
//! indirect-call table while the guest's `start` is still on the stack), so
//! every crossing passes the other side as a trait object instead of holding
//! a long-lived borrow.

use thiserror::Error;

/// Sentinel callback index for nodes without an executable function.
pub const NO_CALLBACK: i32 = -1;

/// An error crossing the host/guest boundary, in either direction.
///
/// A `Trap` raised inside a guest call aborts the in-progress convergence
/// loop and the enclosing tree walk; nothing is retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Trap {
    /// An indirect call named a table index with no function behind it.
    #[error("no function at table index {0}")]
    BadTableIndex(i32),

    /// A pointer/length pair fell outside linear memory.
    #[error("pointer {ptr:#x} + {len} bytes exceeds linear memory ({size} bytes)")]
    OutOfBounds {
        /// Offending base pointer.
        ptr: u32,
        /// Byte length of the attempted access.
        len: u32,
        /// Current linear memory size in bytes.
        size: usize,
    },

    /// `pin` was called on a pointer the allocator never handed out.
    #[error("pin called on unrecognized pointer {0:#x}")]
    PinUnknown(u32),

    /// `unpin` was called on a pointer that is not currently pinned.
    #[error("unpin called on pointer {0:#x} that is not pinned")]
    UnpinUnknown(u32),

    /// The guest function itself failed (the moral equivalent of a wasm trap
    /// or an uncaught guest exception).
    #[error("guest failure: {0}")]
    Guest(String),

    /// A host import rejected the call, e.g. a registration import invoked
    /// after registration completed.
    #[error("host import rejected the call: {0}")]
    Import(String),
}

/// The guest module's export surface, as the host drives it.
///
/// Linear-memory layout conventions shared by every implementation:
/// - strings are UTF-16LE code units with a u32 byte-length header at
///   `ptr - 4`;
/// - i32 arrays are little-endian, stride 4, same `ptr - 4` header;
/// - the sample buffer is little-endian f64, stride 8.
///
/// Any slice returned by [`GuestModule::memory`] is invalidated by the next
/// guest operation that can grow linear memory; callers re-acquire it.
pub trait GuestModule {
    /// Run the guest's top-level start routine. Declaration code inside it
    /// calls back into `host` once per benchmark/group.
    fn start(&mut self, host: &mut dyn HostImports) -> Result<(), Trap>;

    /// Invoke a function through the indirect-call table.
    fn call_indirect(&mut self, index: i32, host: &mut dyn HostImports) -> Result<(), Trap>;

    /// Session default for the calculate-mean flag.
    fn default_calculate_mean(&self) -> bool;
    /// Session default for the calculate-median flag.
    fn default_calculate_median(&self) -> bool;
    /// Session default for the calculate-maximum flag.
    fn default_calculate_maximum(&self) -> bool;
    /// Session default for the calculate-minimum flag.
    fn default_calculate_minimum(&self) -> bool;
    /// Session default for the calculate-variance flag.
    fn default_calculate_variance(&self) -> bool;
    /// Session default for the calculate-stddev flag.
    fn default_calculate_std_dev(&self) -> bool;
    /// Session default for iterations per batch.
    fn default_iteration_count(&self) -> u32;
    /// Session default for the iteration-count floor.
    fn default_min_iteration_count(&self) -> u32;
    /// Session default for the per-leaf time budget, in milliseconds.
    fn default_max_runtime(&self) -> u32;

    /// Reset the sample cursor to zero and invalidate the memoized variance.
    fn reset_run_index(&mut self);

    /// Make room for at least `count` samples (grow-on-demand, amortized).
    /// May move the sample buffer; [`GuestModule::runs_ptr`] must be re-read.
    fn ensure_run_count(&mut self, count: u32) -> Result<(), Trap>;

    /// Current pointer to the f64 sample buffer in linear memory.
    fn runs_ptr(&self) -> u32;

    /// Execute exactly `iterations` timed iterations of `callback`.
    ///
    /// Each iteration runs every hook in the i32 array at `before_each`,
    /// times the callback with the host's monotonic clock, appends the
    /// duration to the sample buffer, then runs every hook at `after_each`.
    /// A zero hook pointer means no hooks. Returns the number of iterations
    /// actually executed.
    fn run_iterations(
        &mut self,
        callback: i32,
        before_each: u32,
        after_each: u32,
        iterations: u32,
        host: &mut dyn HostImports,
    ) -> Result<u32, Trap>;

    /// Mean of the collected samples.
    fn mean(&mut self) -> f64;
    /// Median of the collected samples. Sorts the sample buffer in place.
    fn median(&mut self) -> f64;
    /// Largest collected sample.
    fn maximum(&mut self) -> f64;
    /// Smallest collected sample.
    fn minimum(&mut self) -> f64;
    /// Population variance, memoized until the sample cursor resets.
    fn variance(&mut self) -> f64;
    /// Standard deviation, recomputed from the (possibly memoized) variance.
    fn std_dev(&mut self) -> f64;

    /// Allocate an i32 array of `len` elements; returns its pointer.
    fn new_i32_array(&mut self, len: u32) -> Result<u32, Trap>;
    /// Mark an allocation uncollectable.
    fn pin(&mut self, ptr: u32) -> Result<(), Trap>;
    /// Release a pin. Every `pin` must be matched by exactly one `unpin`.
    fn unpin(&mut self, ptr: u32) -> Result<(), Trap>;

    /// Borrow linear memory for reading.
    fn memory(&self) -> &[u8];
    /// Borrow linear memory for writing.
    fn memory_mut(&mut self) -> &mut [u8];
}

/// The host's import surface, as the guest calls back into it.
///
/// The registration imports are only valid while the guest's start routine
/// is on the stack; afterwards they answer with [`Trap::Import`].
pub trait HostImports {
    /// Declare a benchmark or group node under the current parent cursor.
    ///
    /// For groups the host re-enters the guest synchronously through
    /// `callback` with the cursor repointed at the new node, which is how
    /// nested declarations are discovered.
    fn report_node(
        &mut self,
        guest: &mut dyn GuestModule,
        title_ptr: u32,
        callback: i32,
        is_group: bool,
    ) -> Result<(), Trap>;

    /// Append a per-iteration hook run before every descendant iteration.
    fn report_before_each(&mut self, callback: i32) -> Result<(), Trap>;
    /// Append a per-iteration hook run after every descendant iteration.
    fn report_after_each(&mut self, callback: i32) -> Result<(), Trap>;
    /// Append a hook run once when the current group is entered.
    fn report_before_all(&mut self, callback: i32) -> Result<(), Trap>;
    /// Append a hook run once when the current group is exited.
    fn report_after_all(&mut self, callback: i32) -> Result<(), Trap>;

    /// One-shot override for the calculate-mean flag of the next node.
    fn set_calculate_mean(&mut self, value: bool) -> Result<(), Trap>;
    /// One-shot override for the calculate-median flag of the next node.
    fn set_calculate_median(&mut self, value: bool) -> Result<(), Trap>;
    /// One-shot override for the calculate-maximum flag of the next node.
    fn set_calculate_maximum(&mut self, value: bool) -> Result<(), Trap>;
    /// One-shot override for the calculate-minimum flag of the next node.
    fn set_calculate_minimum(&mut self, value: bool) -> Result<(), Trap>;
    /// One-shot override for the calculate-variance flag of the next node.
    fn set_calculate_variance(&mut self, value: bool) -> Result<(), Trap>;
    /// One-shot override for the calculate-stddev flag of the next node.
    fn set_calculate_std_dev(&mut self, value: bool) -> Result<(), Trap>;
    /// One-shot override for iterations per batch of the next node.
    fn set_iteration_count(&mut self, value: u32) -> Result<(), Trap>;
    /// One-shot override for the iteration floor of the next node.
    fn set_min_iteration_count(&mut self, value: u32) -> Result<(), Trap>;
    /// One-shot override for the time budget (ms) of the next node.
    fn set_max_runtime(&mut self, value: u32) -> Result<(), Trap>;

    /// Monotonic high-resolution clock, in float64 milliseconds.
    fn now_ms(&self) -> f64;
}
