/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! Kernel configuration
//!
//! Compile-time settings for the kernel service (the `FreeRTOSConfig.h`
//! equivalent). Adjust these to match the target; the defaults suit the
//! host port.

use crate::types::TickType;

// =============================================================================
// Timing
// =============================================================================

/// Tick rate in Hz
pub const TICK_RATE_HZ: TickType = 1000;

// =============================================================================
// Memory Allocation
// =============================================================================

/// Total heap available to dynamically allocated kernel objects.
pub const TOTAL_HEAP_SIZE: usize = 512 * 1024;

/// Heap bytes charged for an object's control block on top of its storage
/// (`sizeof(StaticQueue_t)` and friends on a 32-bit target).
///
/// Externally allocated locks take their control block from the caller, so
/// this is also their `REQUIRED_SIZE`.
pub const CONTROL_BLOCK_SIZE: usize = 80;

// =============================================================================
// Ring Buffers
// =============================================================================

/// Bytes of header stored in front of every no-split / allow-split item.
pub const RINGBUF_HEADER_SIZE: usize = 8;

/// Item payloads are padded to this alignment.
pub const RINGBUF_ALIGNMENT: usize = 4;

// =============================================================================
// Message Buffers
// =============================================================================

/// Bytes used to store the length of each message in a message buffer.
pub const MESSAGE_LENGTH_PREFIX_SIZE: usize = 4;

// =============================================================================
// Debug / Assert
// =============================================================================

/// Controls whether kernel assertions are active.
pub const ASSERT_DEFINED: bool = true;

/// `configASSERT` equivalent.
#[inline(always)]
#[track_caller]
pub fn config_assert(condition: bool) {
    if ASSERT_DEFINED {
        debug_assert!(condition, "kernel assertion failed");
    }
}
