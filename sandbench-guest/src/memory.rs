//! Linear memory with bump allocation and a pin set.
//!
//! Models the guest runtime's memory the way the host has to reason about
//! it: a flat byte buffer that grows in pages, allocations carrying a u32
//! byte-length header at `ptr - 4`, and a pin set marking allocations the
//! collector must not reclaim. The bump allocator never reuses space, so a
//! stale (unpinned, reallocated-over) pointer stays readable but is no
//! longer a valid pin target.

use crate::abi::Trap;
use std::collections::{HashMap, HashSet};

/// Linear memory grows in 64 KiB pages, like a wasm memory.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Payloads are 8-byte aligned so f64 sample buffers can live anywhere.
const ALIGN: usize = 8;

/// A guest linear memory: byte buffer, bump allocator, pin bookkeeping.
#[derive(Debug)]
pub struct LinearMemory {
    bytes: Vec<u8>,
    heap: usize,
    allocations: HashMap<u32, u32>,
    pins: HashSet<u32>,
}

impl LinearMemory {
    /// Create a one-page memory. Offset 0 is reserved as the null sentinel.
    pub fn new() -> Self {
        Self {
            bytes: vec![0u8; PAGE_SIZE],
            heap: ALIGN,
            allocations: HashMap::new(),
            pins: HashSet::new(),
        }
    }

    /// Allocate `len` payload bytes, writing the byte-length header at
    /// `ptr - 4`. Returns the payload pointer.
    pub fn alloc(&mut self, len: u32) -> u32 {
        // Header sits in the 4 bytes before an 8-aligned payload.
        let payload = (self.heap + 4).next_multiple_of(ALIGN);
        let end = payload + len as usize;
        self.ensure_size(end);
        self.bytes[payload - 4..payload].copy_from_slice(&len.to_le_bytes());
        self.heap = end;
        self.allocations.insert(payload as u32, len);
        payload as u32
    }

    /// Grow to at least `size` bytes, in whole pages.
    fn ensure_size(&mut self, size: usize) {
        if size > self.bytes.len() {
            let pages = size.div_ceil(PAGE_SIZE);
            self.bytes.resize(pages * PAGE_SIZE, 0);
        }
    }

    /// Bounds-check a pointer/length pair.
    pub fn check(&self, ptr: u32, len: u32) -> Result<(), Trap> {
        let end = ptr as usize + len as usize;
        if ptr == 0 || end > self.bytes.len() {
            return Err(Trap::OutOfBounds {
                ptr,
                len,
                size: self.bytes.len(),
            });
        }
        Ok(())
    }

    /// Byte length of the allocation at `ptr`, from its header.
    pub fn header_len(&self, ptr: u32) -> Result<u32, Trap> {
        if ptr < 4 {
            return Err(Trap::OutOfBounds {
                ptr,
                len: 4,
                size: self.bytes.len(),
            });
        }
        self.check(ptr - 4, 4)?;
        let at = (ptr - 4) as usize;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[at..at + 4]);
        Ok(u32::from_le_bytes(raw))
    }

    /// Mark the allocation at `ptr` uncollectable.
    pub fn pin(&mut self, ptr: u32) -> Result<(), Trap> {
        if !self.allocations.contains_key(&ptr) {
            return Err(Trap::PinUnknown(ptr));
        }
        self.pins.insert(ptr);
        Ok(())
    }

    /// Release the pin on `ptr`.
    pub fn unpin(&mut self, ptr: u32) -> Result<(), Trap> {
        if !self.pins.remove(&ptr) {
            return Err(Trap::UnpinUnknown(ptr));
        }
        Ok(())
    }

    /// Number of currently pinned allocations. The engine's acquire/release
    /// discipline should leave this at zero between leaf evaluations.
    pub fn pinned_count(&self) -> usize {
        self.pins.len()
    }

    /// The whole linear memory, for reading.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The whole linear memory, for writing.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Default for LinearMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_writes_header() {
        let mut mem = LinearMemory::new();
        let ptr = mem.alloc(24);
        assert_eq!(ptr % 8, 0);
        assert_eq!(mem.header_len(ptr).unwrap(), 24);
    }

    #[test]
    fn test_alloc_grows_pages() {
        let mut mem = LinearMemory::new();
        let ptr = mem.alloc(3 * PAGE_SIZE as u32);
        assert!(mem.bytes().len() >= ptr as usize + 3 * PAGE_SIZE);
        assert_eq!(mem.bytes().len() % PAGE_SIZE, 0);
    }

    #[test]
    fn test_pin_unknown_pointer_traps() {
        let mut mem = LinearMemory::new();
        assert_eq!(mem.pin(0x1234), Err(Trap::PinUnknown(0x1234)));
    }

    #[test]
    fn test_unpin_without_pin_traps() {
        let mut mem = LinearMemory::new();
        let ptr = mem.alloc(8);
        assert_eq!(mem.unpin(ptr), Err(Trap::UnpinUnknown(ptr)));
    }

    #[test]
    fn test_pin_unpin_roundtrip() {
        let mut mem = LinearMemory::new();
        let ptr = mem.alloc(8);
        mem.pin(ptr).unwrap();
        assert_eq!(mem.pinned_count(), 1);
        mem.unpin(ptr).unwrap();
        assert_eq!(mem.pinned_count(), 0);
    }

    #[test]
    fn test_null_pointer_out_of_bounds() {
        let mem = LinearMemory::new();
        assert!(matches!(mem.check(0, 8), Err(Trap::OutOfBounds { .. })));
    }
}
