/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! Kernel objects
//!
//! The objects every wrapper in [`crate::sync`] is built on:
//!
//! - [`queue`] - queues, semaphores and mutexes (one object type, as in
//!   FreeRTOS)
//! - [`ringbuf`] - no-split, allow-split and byte ring buffers
//! - [`stream_buffer`] - stream and message buffers
//! - [`queue_set`] - sets that let one task wait on many of the above
//! - [`registry`] - handle issuing and liveness
//!
//! Objects are generic over their storage [`Region`](crate::memory::Region)
//! and hold no pointers into it, so a wrapper that embeds its storage can be
//! moved freely. Every operation takes the object's critical section; the
//! blocking ones sleep on the port's wait lists with the section released.
//!
//! Operations return `Result<_, Error>`. The wrappers fold the error into
//! the `bool` / `Option` results of their public API.

pub mod queue;
pub mod queue_set;
pub mod registry;
pub mod ringbuf;
pub mod stream_buffer;

use thiserror::Error;

/// Errors reported by kernel objects.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A blocking call gave up before the event occurred
    #[error("timed out")]
    Timeout,

    /// No room and the caller asked not to wait
    #[error("object is full")]
    Full,

    /// Nothing to receive and the caller asked not to wait
    #[error("object is empty")]
    Empty,

    /// The kernel heap cannot cover the object
    #[error("kernel heap exhausted")]
    OutOfMemory,

    /// An external buffer is smaller than the object needs
    #[error("buffer too small: {provided} bytes provided, {required} required")]
    BufferTooSmall { required: usize, provided: usize },

    /// A length, size or count is out of range for the object
    #[error("invalid parameter")]
    InvalidParameter,

    /// A mutex was given by a task that does not hold it
    #[error("mutex is not held by the calling task")]
    NotOwner,

    /// The object is already registered with a queue set
    #[error("already a member of a queue set")]
    AlreadyMember,

    /// The object is not registered with this queue set
    #[error("not a member of this queue set")]
    NotMember,

    /// The object holds events that were never read
    #[error("object holds unread data")]
    MemberNotEmpty,

    /// Adding the object would let the set overflow
    #[error("queue set capacity exceeded: {needed} events needed, {capacity} available")]
    CapacityExceeded { needed: usize, capacity: usize },

    /// An item can never fit, whatever the buffer holds
    #[error("item too large: {size} bytes, at most {max}")]
    ItemTooLarge { size: usize, max: usize },

    /// Tasks are blocked on the object
    #[error("tasks are blocked on the object")]
    Busy,

    /// The wrapper has no kernel object behind it
    #[error("object was not created")]
    NotCreated,
}

pub type Result<T> = core::result::Result<T, Error>;
