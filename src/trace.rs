/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! Trace Hooks
//!
//! The kernel calls these hooks at key points. They forward to the `log`
//! facade under the [`TARGET`] target, so a logger filtered to that target
//! shows the life of every kernel object without touching kernel code.
//!
//! ## Categories
//!
//! - `trace_create*` / `trace_delete` - object lifecycle
//! - `trace_queue_set_*` - queue set membership and notifications
//! - `trace_yield_from_isr` - end-of-interrupt yield requests

use crate::types::Handle;

/// Log target used by every hook.
pub const TARGET: &str = "rtos_waitables::trace";

/// Kind of kernel object, for trace output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Queue,
    BinarySemaphore,
    CountingSemaphore,
    Mutex,
    RecursiveMutex,
    RingBuffer,
    StreamBuffer,
    MessageBuffer,
    QueueSet,
}

// =============================================================================
// Object lifecycle
// =============================================================================

#[inline]
pub fn trace_create(kind: ObjectKind, handle: Handle, storage_bytes: usize) {
    log::trace!(target: TARGET, "create {:?} {} ({} bytes)", kind, handle, storage_bytes);
}

#[inline]
pub fn trace_create_failed(kind: ObjectKind, reason: &dyn core::fmt::Display) {
    log::warn!(target: TARGET, "create {:?} failed: {}", kind, reason);
}

#[inline]
pub fn trace_delete(kind: ObjectKind, handle: Handle) {
    log::trace!(target: TARGET, "delete {:?} {}", kind, handle);
}

// =============================================================================
// Queue sets
// =============================================================================

#[inline]
pub fn trace_queue_set_add(set: Handle, member: Handle, cost: usize) {
    log::trace!(target: TARGET, "set {} add {} (cost {})", set, member, cost);
}

#[inline]
pub fn trace_queue_set_remove(set: Handle, member: Handle) {
    log::trace!(target: TARGET, "set {} remove {}", set, member);
}

#[inline]
pub fn trace_queue_set_send(set: Handle, member: Handle) {
    log::trace!(target: TARGET, "set {} ready {}", set, member);
}

#[inline]
pub fn trace_queue_set_select(set: Handle, member: Option<Handle>) {
    match member {
        Some(member) => log::trace!(target: TARGET, "set {} select -> {}", set, member),
        None => log::trace!(target: TARGET, "set {} select timed out", set),
    }
}

// =============================================================================
// Interrupts
// =============================================================================

#[inline]
pub fn trace_yield_from_isr() {
    log::trace!(target: TARGET, "yield requested at end of ISR");
}
