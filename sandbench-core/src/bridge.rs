//! Memory bridge: every raw access into guest linear memory lives here.
//!
//! Pointer, length, and endianness assumptions are concentrated in this
//! module so the rest of the host never does pointer arithmetic. Layout
//! (shared with the guest runtime):
//! - u32 byte-length header at `ptr - 4` for strings and arrays;
//! - strings are UTF-16LE code units;
//! - index arrays are little-endian i32, stride 4;
//! - samples are little-endian f64, stride 8.
//!
//! Anything read out of guest memory is a bounded copy: a view would be
//! invalidated by the next guest operation that grows linear memory.

use crate::error::EngineError;
use sandbench_guest::{GuestModule, Trap};
use thiserror::Error;

/// A host-side guest-memory access went wrong. Fatal to the current run,
/// never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeFault {
    /// A pointer/length pair fell outside the guest's linear memory.
    #[error("guest pointer {ptr:#x} + {len} bytes exceeds linear memory ({size} bytes)")]
    OutOfBounds {
        /// Offending base pointer.
        ptr: u32,
        /// Byte length of the attempted access.
        len: u32,
        /// Linear memory size at the time of the fault.
        size: usize,
    },
}

fn check(memory: &[u8], ptr: u32, len: u32) -> Result<(), BridgeFault> {
    let end = ptr as usize + len as usize;
    if ptr == 0 || end > memory.len() {
        return Err(BridgeFault::OutOfBounds {
            ptr,
            len,
            size: memory.len(),
        });
    }
    Ok(())
}

/// Byte length stored in the u32 header in front of `ptr`.
fn header_len(memory: &[u8], ptr: u32) -> Result<u32, BridgeFault> {
    if ptr < 4 {
        return Err(BridgeFault::OutOfBounds {
            ptr,
            len: 4,
            size: memory.len(),
        });
    }
    check(memory, ptr - 4, 4)?;
    let at = (ptr - 4) as usize;
    Ok(u32::from_le_bytes(memory[at..at + 4].try_into().expect("4-byte slice")))
}

/// Decode a guest string. A zero pointer is the null-string sentinel and
/// yields `fallback`; otherwise the byte length comes from the `ptr - 4`
/// header and the code units are UTF-16LE.
pub fn read_string(
    guest: &dyn GuestModule,
    ptr: u32,
    fallback: &str,
) -> Result<String, BridgeFault> {
    if ptr == 0 {
        return Ok(fallback.to_string());
    }
    let memory = guest.memory();
    let byte_len = header_len(memory, ptr)?;
    check(memory, ptr, byte_len)?;
    let units: Vec<u16> = memory[ptr as usize..(ptr + byte_len) as usize]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

/// Copy `count` f64 samples out of guest memory starting at `ptr`.
pub fn read_samples(
    guest: &dyn GuestModule,
    ptr: u32,
    count: u32,
) -> Result<Vec<f64>, BridgeFault> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let memory = guest.memory();
    check(memory, ptr, count * 8)?;
    Ok(memory[ptr as usize..(ptr + count * 8) as usize]
        .chunks_exact(8)
        .map(|raw| f64::from_le_bytes(raw.try_into().expect("8-byte chunk")))
        .collect())
}

/// A pinned guest array. The creator owns the pin and must call
/// [`PinnedArray::release`] on every exit path once the guest no longer
/// needs the array.
#[derive(Debug)]
pub struct PinnedArray {
    ptr: u32,
}

impl PinnedArray {
    /// The guest pointer, zero for the empty array.
    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    /// Unpin the array. The empty sentinel releases as a no-op.
    pub fn release(self, guest: &mut dyn GuestModule) -> Result<(), Trap> {
        if self.ptr == 0 {
            return Ok(());
        }
        guest.unpin(self.ptr)
    }
}

/// Allocate an i32 array in the guest, pin it so the guest collector cannot
/// reclaim it, and write `values` through linear memory. An empty slice maps
/// to the zero-pointer sentinel (nothing allocated, nothing pinned).
pub fn write_index_array(
    guest: &mut dyn GuestModule,
    values: &[i32],
) -> Result<PinnedArray, EngineError> {
    if values.is_empty() {
        return Ok(PinnedArray { ptr: 0 });
    }
    let ptr = guest.new_i32_array(values.len() as u32)?;
    guest.pin(ptr)?;
    let memory = guest.memory_mut();
    if let Err(fault) = check(memory, ptr, (values.len() * 4) as u32) {
        // Keep the pin discipline intact even on the fault path.
        let _ = guest.unpin(ptr);
        return Err(fault.into());
    }
    let memory = guest.memory_mut();
    for (i, value) in values.iter().enumerate() {
        let at = ptr as usize + i * 4;
        memory[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }
    Ok(PinnedArray { ptr })
}
