/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! Memory Allocation
//!
//! Kernel objects get their storage in one of three ways, chosen at compile
//! time through an allocation policy (see [`policy`]):
//!
//! | Policy | Storage | Failure mode |
//! |--------|---------|--------------|
//! | [`Dynamic`] | kernel heap | heap exhausted |
//! | [`Static<N>`](Static) | inline in the wrapper | kernel invariants only |
//! | [`External<N>`](External) | caller-supplied buffer | buffer too small |
//!
//! ## Kernel heap
//!
//! The heap has a fixed budget of `TOTAL_HEAP_SIZE` bytes (see `config.rs`).
//! Every dynamic object is charged its storage plus `CONTROL_BLOCK_SIZE`
//! bytes for its control block; the charge is returned when the object is
//! deleted. Once the budget is spent, creation fails instead of aborting.

pub mod policy;

pub use policy::{Allocation, Dynamic, External, ExternalRegion, InlineRegion, Region, Static};

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{CONTROL_BLOCK_SIZE, TOTAL_HEAP_SIZE};
use crate::kernel::Error;

// =============================================================================
// Heap Statistics
// =============================================================================

/// Heap statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes of budget not charged to any object
    pub available_heap_space_bytes: usize,
    /// Lowest value `available_heap_space_bytes` has reached
    pub minimum_ever_free_bytes_remaining: usize,
    /// Number of successful allocations
    pub successful_allocations: usize,
    /// Number of successful frees
    pub successful_frees: usize,
}

static FREE_BYTES_REMAINING: AtomicUsize = AtomicUsize::new(TOTAL_HEAP_SIZE);
static MINIMUM_EVER_FREE_BYTES_REMAINING: AtomicUsize = AtomicUsize::new(TOTAL_HEAP_SIZE);
static SUCCESSFUL_ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);
static SUCCESSFUL_FREES: AtomicUsize = AtomicUsize::new(0);

/// Get free heap size (`xPortGetFreeHeapSize`)
pub fn free_heap_size() -> usize {
    FREE_BYTES_REMAINING.load(Ordering::Acquire)
}

/// Get minimum ever free heap size (`xPortGetMinimumEverFreeHeapSize`)
pub fn minimum_ever_free_heap_size() -> usize {
    MINIMUM_EVER_FREE_BYTES_REMAINING.load(Ordering::Acquire)
}

/// Get heap statistics (`vPortGetHeapStats`)
pub fn heap_stats() -> HeapStats {
    HeapStats {
        available_heap_space_bytes: free_heap_size(),
        minimum_ever_free_bytes_remaining: minimum_ever_free_heap_size(),
        successful_allocations: SUCCESSFUL_ALLOCATIONS.load(Ordering::Relaxed),
        successful_frees: SUCCESSFUL_FREES.load(Ordering::Relaxed),
    }
}

/// Takes `charge` bytes out of the budget, or fails without side effects.
fn charge(charge: usize) -> Result<(), Error> {
    let previous = FREE_BYTES_REMAINING
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |free| {
            free.checked_sub(charge)
        })
        .map_err(|free| {
            log::warn!("heap exhausted: {} bytes requested, {} free", charge, free);
            Error::OutOfMemory
        })?;
    MINIMUM_EVER_FREE_BYTES_REMAINING.fetch_min(previous - charge, Ordering::AcqRel);
    SUCCESSFUL_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

fn refund(charge: usize) {
    FREE_BYTES_REMAINING.fetch_add(charge, Ordering::AcqRel);
    SUCCESSFUL_FREES.fetch_add(1, Ordering::Relaxed);
}

// =============================================================================
// Heap blocks
// =============================================================================

/// Zeroed storage taken from the kernel heap (`pvPortMalloc` / `vPortFree`).
///
/// The block is returned to the heap, and its charge refunded, on drop.
pub struct HeapBlock {
    ptr: NonNull<u8>,
    len: usize,
    charged: usize,
}

// Safety: the block exclusively owns its allocation and only hands out raw
// pointers to it.
unsafe impl Send for HeapBlock {}
unsafe impl Sync for HeapBlock {}

impl HeapBlock {
    /// Allocates `len` bytes of object storage plus a control block.
    pub fn allocate(len: usize) -> Result<Self, Error> {
        let charged = len.checked_add(CONTROL_BLOCK_SIZE).ok_or(Error::OutOfMemory)?;
        charge(charged)?;

        let storage: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let raw = Box::into_raw(storage) as *mut u8;
        // Box never hands out a null pointer, not even for an empty slice.
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => {
                refund(charged);
                return Err(Error::OutOfMemory);
            }
        };
        Ok(Self { ptr, len, charged })
    }

    /// Usable bytes (the control block is not included).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes this block holds against the heap budget.
    pub fn charged(&self) -> usize {
        self.charged
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        // Safety: ptr/len came from Box::into_raw in allocate().
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
        refund(self.charged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_beyond_budget_fails() {
        let stats = heap_stats();
        assert_eq!(
            HeapBlock::allocate(TOTAL_HEAP_SIZE).err(),
            Some(Error::OutOfMemory)
        );
        assert_eq!(
            HeapBlock::allocate(usize::MAX).err(),
            Some(Error::OutOfMemory)
        );
        assert!(heap_stats().successful_allocations >= stats.successful_allocations);
    }

    #[test]
    fn block_is_zeroed_and_charges_control_block() {
        let block = HeapBlock::allocate(64).expect("64 bytes fit the heap");
        assert_eq!(block.len(), 64);
        assert_eq!(block.charged(), 64 + CONTROL_BLOCK_SIZE);
        let bytes = unsafe { core::slice::from_raw_parts(block.as_ptr(), block.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert!(minimum_ever_free_heap_size() <= TOTAL_HEAP_SIZE - block.charged());
    }

    #[test]
    fn zero_length_block_still_charges_control_block() {
        let block = HeapBlock::allocate(0).expect("control block fits the heap");
        assert!(block.is_empty());
        assert_eq!(block.charged(), CONTROL_BLOCK_SIZE);
    }

    #[test]
    fn frees_are_counted() {
        let before = heap_stats().successful_frees;
        drop(HeapBlock::allocate(16).expect("16 bytes fit the heap"));
        assert!(heap_stats().successful_frees > before);
    }
}
