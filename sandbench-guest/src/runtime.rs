//! Reference in-process guest runtime.
//!
//! Implements [`GuestModule`] over a real [`LinearMemory`] and an
//! indirect-call table of Rust closures. Guest programs are assembled with
//! [`GuestBuilder`]: table entries are closures over the guest state, titles
//! are interned into linear memory as UTF-16LE up front, and the start
//! routine is just another table entry.
//!
//! The sample buffer is a plain f64 array in linear memory with a cursor;
//! growth reallocates (bump allocator, the old buffer is abandoned) and so
//! moves `runs_ptr`, exactly the hazard the host-side bridge has to respect.

use crate::abi::{GuestModule, HostImports, Trap};
use crate::memory::LinearMemory;
use std::rc::Rc;

/// A function in the guest's indirect-call table.
pub type GuestFn = Rc<dyn Fn(&mut ReferenceGuest, &mut dyn HostImports) -> Result<(), Trap>>;

/// Initial sample-buffer capacity, in elements.
const INITIAL_RUN_CAPACITY: u32 = 64;

/// Session defaults baked into the guest at compile time, read by the host
/// through the default getters exactly once after registration.
#[derive(Debug, Clone, Copy)]
pub struct GuestDefaults {
    /// Collect the mean by default.
    pub calculate_mean: bool,
    /// Collect the median by default.
    pub calculate_median: bool,
    /// Collect the maximum by default.
    pub calculate_maximum: bool,
    /// Collect the minimum by default.
    pub calculate_minimum: bool,
    /// Collect the variance by default.
    pub calculate_variance: bool,
    /// Collect the standard deviation by default.
    pub calculate_std_dev: bool,
    /// Iterations per timed batch.
    pub iteration_count: u32,
    /// Iteration-count floor before the convergence loop may stop.
    pub min_iteration_count: u32,
    /// Per-leaf time budget in milliseconds.
    pub max_runtime: u32,
}

impl Default for GuestDefaults {
    fn default() -> Self {
        Self {
            calculate_mean: true,
            calculate_median: true,
            calculate_maximum: false,
            calculate_minimum: false,
            calculate_variance: false,
            calculate_std_dev: false,
            iteration_count: 1000,
            min_iteration_count: 1000,
            max_runtime: 10_000,
        }
    }
}

/// The in-process guest module.
pub struct ReferenceGuest {
    memory: LinearMemory,
    table: Vec<GuestFn>,
    start_index: Option<i32>,
    defaults: GuestDefaults,
    runs_ptr: u32,
    runs_capacity: u32,
    run_index: u32,
    cached_variance: Option<f64>,
}

impl ReferenceGuest {
    fn new(defaults: GuestDefaults) -> Self {
        Self {
            memory: LinearMemory::new(),
            table: Vec::new(),
            start_index: None,
            defaults,
            runs_ptr: 0,
            runs_capacity: 0,
            run_index: 0,
            cached_variance: None,
        }
    }

    /// Number of currently pinned allocations (test instrumentation).
    pub fn pinned_count(&self) -> usize {
        self.memory.pinned_count()
    }

    /// Copy the collected samples out of linear memory.
    pub fn samples(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.run_index as usize);
        let bytes = self.memory.bytes();
        for i in 0..self.run_index {
            let at = (self.runs_ptr + i * 8) as usize;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            out.push(f64::from_le_bytes(raw));
        }
        out
    }

    fn write_samples(&mut self, samples: &[f64]) {
        let base = self.runs_ptr;
        let bytes = self.memory.bytes_mut();
        for (i, v) in samples.iter().enumerate() {
            let at = base as usize + i * 8;
            bytes[at..at + 8].copy_from_slice(&v.to_le_bytes());
        }
    }

    fn push_sample(&mut self, value: f64) -> Result<(), Trap> {
        if self.run_index == self.runs_capacity {
            self.ensure_run_count(self.run_index + 1)?;
        }
        let at = (self.runs_ptr + self.run_index * 8) as usize;
        self.memory.bytes_mut()[at..at + 8].copy_from_slice(&value.to_le_bytes());
        self.run_index += 1;
        Ok(())
    }

    /// Decode an i32 hook array at `ptr`. Zero means no hooks.
    fn read_i32_array(&self, ptr: u32) -> Result<Vec<i32>, Trap> {
        if ptr == 0 {
            return Ok(Vec::new());
        }
        let byte_len = self.memory.header_len(ptr)?;
        self.memory.check(ptr, byte_len)?;
        let bytes = self.memory.bytes();
        let mut out = Vec::with_capacity((byte_len / 4) as usize);
        for i in (0..byte_len).step_by(4) {
            let at = (ptr + i) as usize;
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[at..at + 4]);
            out.push(i32::from_le_bytes(raw));
        }
        Ok(out)
    }
}

impl GuestModule for ReferenceGuest {
    fn start(&mut self, host: &mut dyn HostImports) -> Result<(), Trap> {
        match self.start_index {
            Some(index) => self.call_indirect(index, host),
            None => Ok(()),
        }
    }

    fn call_indirect(&mut self, index: i32, host: &mut dyn HostImports) -> Result<(), Trap> {
        let func = usize::try_from(index)
            .ok()
            .and_then(|i| self.table.get(i))
            .cloned()
            .ok_or(Trap::BadTableIndex(index))?;
        func(self, host)
    }

    fn default_calculate_mean(&self) -> bool {
        self.defaults.calculate_mean
    }
    fn default_calculate_median(&self) -> bool {
        self.defaults.calculate_median
    }
    fn default_calculate_maximum(&self) -> bool {
        self.defaults.calculate_maximum
    }
    fn default_calculate_minimum(&self) -> bool {
        self.defaults.calculate_minimum
    }
    fn default_calculate_variance(&self) -> bool {
        self.defaults.calculate_variance
    }
    fn default_calculate_std_dev(&self) -> bool {
        self.defaults.calculate_std_dev
    }
    fn default_iteration_count(&self) -> u32 {
        self.defaults.iteration_count
    }
    fn default_min_iteration_count(&self) -> u32 {
        self.defaults.min_iteration_count
    }
    fn default_max_runtime(&self) -> u32 {
        self.defaults.max_runtime
    }

    fn reset_run_index(&mut self) {
        self.run_index = 0;
        self.cached_variance = None;
    }

    fn ensure_run_count(&mut self, count: u32) -> Result<(), Trap> {
        if count <= self.runs_capacity {
            return Ok(());
        }
        let new_capacity = count.max(self.runs_capacity * 2).max(INITIAL_RUN_CAPACITY);
        let live = self.samples();
        self.runs_ptr = self.memory.alloc(new_capacity * 8);
        self.runs_capacity = new_capacity;
        self.write_samples(&live);
        Ok(())
    }

    fn runs_ptr(&self) -> u32 {
        self.runs_ptr
    }

    fn run_iterations(
        &mut self,
        callback: i32,
        before_each: u32,
        after_each: u32,
        iterations: u32,
        host: &mut dyn HostImports,
    ) -> Result<u32, Trap> {
        let before = self.read_i32_array(before_each)?;
        let after = self.read_i32_array(after_each)?;
        for _ in 0..iterations {
            for hook in &before {
                self.call_indirect(*hook, host)?;
            }
            let started = host.now_ms();
            self.call_indirect(callback, host)?;
            let duration = host.now_ms() - started;
            self.push_sample(duration)?;
            for hook in &after {
                self.call_indirect(*hook, host)?;
            }
        }
        Ok(iterations)
    }

    fn mean(&mut self) -> f64 {
        sandbench_stats::mean(&self.samples())
    }

    fn median(&mut self) -> f64 {
        // The partition-exchange sort happens on the real buffer: sort the
        // copied samples, write them back, then read off the middle.
        let mut samples = self.samples();
        let median = sandbench_stats::median(&mut samples);
        self.write_samples(&samples);
        median
    }

    fn maximum(&mut self) -> f64 {
        sandbench_stats::maximum(&self.samples())
    }

    fn minimum(&mut self) -> f64 {
        sandbench_stats::minimum(&self.samples())
    }

    fn variance(&mut self) -> f64 {
        if let Some(cached) = self.cached_variance {
            return cached;
        }
        let variance = sandbench_stats::variance(&self.samples());
        self.cached_variance = Some(variance);
        variance
    }

    fn std_dev(&mut self) -> f64 {
        self.variance().sqrt()
    }

    fn new_i32_array(&mut self, len: u32) -> Result<u32, Trap> {
        Ok(self.memory.alloc(len * 4))
    }

    fn pin(&mut self, ptr: u32) -> Result<(), Trap> {
        self.memory.pin(ptr)
    }

    fn unpin(&mut self, ptr: u32) -> Result<(), Trap> {
        self.memory.unpin(ptr)
    }

    fn memory(&self) -> &[u8] {
        self.memory.bytes()
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.bytes_mut()
    }
}

/// Assembles a [`ReferenceGuest`] from Rust closures, standing in for the
/// external compiler collaborator.
pub struct GuestBuilder {
    guest: ReferenceGuest,
}

impl GuestBuilder {
    /// Start a guest with the stock session defaults.
    pub fn new() -> Self {
        Self::with_defaults(GuestDefaults::default())
    }

    /// Start a guest with explicit session defaults.
    pub fn with_defaults(defaults: GuestDefaults) -> Self {
        Self {
            guest: ReferenceGuest::new(defaults),
        }
    }

    /// Add a function to the indirect-call table; returns its index.
    pub fn add_function<F>(&mut self, func: F) -> i32
    where
        F: Fn(&mut ReferenceGuest, &mut dyn HostImports) -> Result<(), Trap> + 'static,
    {
        self.guest.table.push(Rc::new(func));
        (self.guest.table.len() - 1) as i32
    }

    /// Install the start routine (the top-level declaration code).
    pub fn set_start<F>(&mut self, func: F) -> &mut Self
    where
        F: Fn(&mut ReferenceGuest, &mut dyn HostImports) -> Result<(), Trap> + 'static,
    {
        let index = self.add_function(func);
        self.guest.start_index = Some(index);
        self
    }

    /// Intern a title string into linear memory as UTF-16LE with the byte
    /// length in the `ptr - 4` header; returns the string pointer.
    pub fn intern(&mut self, text: &str) -> u32 {
        let units: Vec<u16> = text.encode_utf16().collect();
        let ptr = self.guest.memory.alloc((units.len() * 2) as u32);
        let bytes = self.guest.memory.bytes_mut();
        for (i, unit) in units.iter().enumerate() {
            let at = ptr as usize + i * 2;
            bytes[at..at + 2].copy_from_slice(&unit.to_le_bytes());
        }
        ptr
    }

    /// Finish and hand over the guest.
    pub fn build(self) -> ReferenceGuest {
        self.guest
    }
}

impl Default for GuestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
