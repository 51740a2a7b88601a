/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! Allocation policies
//!
//! Every wrapper takes its policy as a type parameter, so the choice between
//! heap, inline and caller-supplied storage is made at compile time and the
//! operations of a wrapper are the same code for all three:
//!
//! ```ignore
//! let heap = Queue::<u32, Dynamic>::new(8);         // kernel heap
//! let inline = Queue::<u32, Static<8>>::new();      // 8 slots inside the wrapper
//! let mut ext = Queue::<u32, External<8>>::new();   // not created yet
//! ext.create(buffer);                               // buffer.len() >= REQUIRED_SIZE
//! ```
//!
//! The policy only decides where the bytes live. It hands the kernel object
//! a [`Region`], and the kernel object never learns which policy built it.

use core::marker::PhantomData;
use core::mem::{size_of, MaybeUninit};
use core::ptr::NonNull;

use super::HeapBlock;
use crate::kernel::Error;

/// Storage for one kernel object.
///
/// # Safety
///
/// `base` must return a pointer valid for reads and writes of `len` bytes
/// for as long as the region is alive and not moved. Implementations must
/// not create references to the storage bytes, since the kernel writes them
/// through raw pointers while holding the object's critical section.
pub unsafe trait Region: Send + 'static {
    /// Usable bytes.
    fn len(&self) -> usize;

    /// Returns the first byte of the storage.
    ///
    /// # Safety
    ///
    /// `this` must point to a live region.
    unsafe fn base(this: *mut Self) -> *mut u8;
}

// =============================================================================
// Policy markers
// =============================================================================

/// Storage comes from the kernel heap when the wrapper is constructed.
#[derive(Clone, Copy, Debug, Default)]
pub struct Dynamic;

/// Storage lives inside the wrapper, sized by `N` at compile time.
///
/// `N` counts items for queues and bytes for ring, stream and message
/// buffers. It is the maximum count of a counting semaphore; other locks
/// need no storage and ignore it.
#[derive(Clone, Copy, Debug, Default)]
pub struct Static<const N: usize = 0>;

/// Storage is a caller-supplied buffer handed over with `create(buffer)`.
///
/// `N` has the same meaning as for [`Static`]. The buffer must be at least
/// the wrapper's `REQUIRED_SIZE` bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct External<const N: usize = 0>;

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Dynamic {}
    impl<const N: usize> Sealed for super::Static<N> {}
    impl<const N: usize> Sealed for super::External<N> {}
}

/// Maps a policy to the storage it produces for elements of type `T`.
pub trait Allocation<T>: sealed::Sealed + 'static {
    type Region: Region;
}

impl<T: Send + 'static> Allocation<T> for Dynamic {
    type Region = HeapBlock;
}

impl<T: Send + 'static, const N: usize> Allocation<T> for Static<N> {
    type Region = InlineRegion<T, N>;
}

impl<T: Send + 'static, const N: usize> Allocation<T> for External<N> {
    type Region = ExternalRegion;
}

impl Dynamic {
    pub(crate) fn region(bytes: usize) -> Result<HeapBlock, Error> {
        HeapBlock::allocate(bytes)
    }
}

impl<const N: usize> Static<N> {
    pub(crate) fn region<T>() -> InlineRegion<T, N> {
        InlineRegion::new()
    }
}

impl<const N: usize> External<N> {
    pub(crate) fn region(buffer: &'static mut [u8], required: usize) -> Result<ExternalRegion, Error> {
        ExternalRegion::new(buffer, required)
    }
}

// =============================================================================
// Regions
// =============================================================================

// Safety: the block owns a heap allocation of `len` bytes at a fixed address.
unsafe impl Region for HeapBlock {
    fn len(&self) -> usize {
        HeapBlock::len(self)
    }

    unsafe fn base(this: *mut Self) -> *mut u8 {
        (*this).as_ptr()
    }
}

/// Inline storage for `N` elements of `T`.
#[repr(transparent)]
pub struct InlineRegion<T, const N: usize>([MaybeUninit<T>; N]);

impl<T, const N: usize> InlineRegion<T, N> {
    pub const BYTES: usize = N * size_of::<T>();

    fn new() -> Self {
        // Safety: an array of MaybeUninit is valid for any bit pattern.
        Self(unsafe { MaybeUninit::<[MaybeUninit<T>; N]>::zeroed().assume_init() })
    }
}

// Safety: the storage is the array itself; repr(transparent) puts its first
// byte at the region's address.
unsafe impl<T: Send + 'static, const N: usize> Region for InlineRegion<T, N> {
    fn len(&self) -> usize {
        Self::BYTES
    }

    unsafe fn base(this: *mut Self) -> *mut u8 {
        this as *mut u8
    }
}

/// A caller-supplied buffer, borrowed for the rest of the program.
pub struct ExternalRegion {
    ptr: NonNull<u8>,
    len: usize,
    _buffer: PhantomData<&'static mut [u8]>,
}

// Safety: the region holds the only reference to the buffer.
unsafe impl Send for ExternalRegion {}

impl ExternalRegion {
    fn new(buffer: &'static mut [u8], required: usize) -> Result<Self, Error> {
        if buffer.len() < required {
            return Err(Error::BufferTooSmall {
                required,
                provided: buffer.len(),
            });
        }
        buffer.fill(0);
        Ok(Self {
            len: buffer.len(),
            ptr: NonNull::from(buffer).cast(),
            _buffer: PhantomData,
        })
    }
}

// Safety: the pointer comes from a `&'static mut [u8]` of `len` bytes.
unsafe impl Region for ExternalRegion {
    fn len(&self) -> usize {
        self.len
    }

    unsafe fn base(this: *mut Self) -> *mut u8 {
        (*this).ptr.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leak(len: usize) -> &'static mut [u8] {
        Box::leak(vec![0xAAu8; len].into_boxed_slice())
    }

    #[test]
    fn inline_region_is_sized_from_its_parameters() {
        let region = Static::<3>::region::<u32>();
        assert_eq!(Region::len(&region), 12);
        assert_eq!(core::mem::size_of::<InlineRegion<u32, 3>>(), 12);
        assert_eq!(core::mem::size_of::<InlineRegion<(), 0>>(), 0);
    }

    #[test]
    fn external_region_rejects_undersized_buffer() {
        assert_eq!(
            External::<4>::region(leak(3), 4).err(),
            Some(Error::BufferTooSmall {
                required: 4,
                provided: 3
            })
        );
        assert!(External::<0>::region(leak(0), 1).is_err());
    }

    #[test]
    fn external_region_takes_the_whole_buffer() {
        let mut region = External::<4>::region(leak(6), 4).expect("buffer is large enough");
        assert_eq!(region.len(), 6);
        let bytes = unsafe { core::slice::from_raw_parts(ExternalRegion::base(&mut region), 6) };
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
