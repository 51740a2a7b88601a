/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! Core types shared by the kernel service and the wrappers.
//!
//! Tick width is selected with the `tick-16bit` / `tick-32bit` / `tick-64bit`
//! features, the same way the port selects its word size.

use core::fmt;

// =============================================================================
// Tick type (configurable width)
// =============================================================================

/// Tick counter type - 16-bit variant
#[cfg(feature = "tick-16bit")]
pub type TickType = u16;

/// Tick counter type - 32-bit variant (most common)
#[cfg(all(feature = "tick-32bit", not(feature = "tick-16bit")))]
pub type TickType = u32;

/// Tick counter type - 64-bit variant
#[cfg(all(
    feature = "tick-64bit",
    not(feature = "tick-16bit"),
    not(feature = "tick-32bit")
))]
pub type TickType = u64;

#[cfg(not(any(feature = "tick-16bit", feature = "tick-32bit", feature = "tick-64bit")))]
compile_error!("select a tick width: `tick-16bit`, `tick-32bit` or `tick-64bit`");

/// Block indefinitely.
///
/// Passing this as a timeout makes a task-context call wait until the event
/// it is waiting for occurs.
pub const MAX_DELAY: TickType = TickType::MAX;

/// Do not block at all.
pub const NO_WAIT: TickType = 0;

/// Convert milliseconds to ticks (`pdMS_TO_TICKS`).
#[inline(always)]
pub const fn ms_to_ticks(ms: TickType) -> TickType {
    ((ms as u64 * crate::config::TICK_RATE_HZ as u64) / 1000u64) as TickType
}

/// Convert ticks to milliseconds (`pdTICKS_TO_MS`).
#[inline(always)]
pub const fn ticks_to_ms(ticks: TickType) -> TickType {
    ((ticks as u64 * 1000u64) / crate::config::TICK_RATE_HZ as u64) as TickType
}

// =============================================================================
// Handles
// =============================================================================

/// Opaque identifier of a kernel-managed waitable object.
///
/// A handle is either null (the object was never created, or creation
/// failed) or refers to exactly one live kernel object. Handles are never
/// reused during the life of the process, so two handles compare equal only
/// if they name the same object. This is what a queue set relies on to
/// attribute a wake-up to the wrapper that caused it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Handle(usize);

impl Handle {
    /// The "not created" handle.
    pub const NULL: Handle = Handle(0);

    /// Returns `true` for the null handle.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub(crate) const fn from_raw(raw: usize) -> Self {
        Handle(raw)
    }

    /// The raw identifier, for logging and kernel-aware debugging.
    #[inline]
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("Handle(null)")
        } else {
            write!(f, "Handle({:#x})", self.0)
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
