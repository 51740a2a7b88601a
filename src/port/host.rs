/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! Host Port Implementation
//!
//! Maps the port interface onto the standard library so the kernel objects
//! can run, and be tested, on a development machine:
//!
//! - a task is a thread,
//! - a critical section is a [`std::sync::Mutex`] owned by the object,
//! - blocking is a [`std::sync::Condvar`] wait bounded by a tick deadline,
//! - interrupt context is a per-thread nesting counter.

use std::cell::Cell;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::config::TICK_RATE_HZ;
use crate::types::{TickType, MAX_DELAY};

/// Architecture name string for this port
pub const ARCH_NAME: &str = "Host";

// =============================================================================
// Critical Section Management
// =============================================================================

/// State protected by a critical section.
pub struct CriticalSection<T> {
    inner: Mutex<T>,
}

/// Proof that the critical section is held.
pub type CriticalGuard<'a, T> = MutexGuard<'a, T>;

impl<T> CriticalSection<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Enters the critical section.
    ///
    /// A panic inside another critical section does not make the state
    /// unusable; kernel state is updated before anything that can panic.
    pub fn enter(&self) -> CriticalGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Blocking
// =============================================================================

/// Point in time at which a blocked call gives up.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    ticks: TickType,
    at: Option<Instant>,
}

impl Deadline {
    /// Starts a timeout of `ticks` (`vTaskSetTimeOutState`).
    pub fn after(ticks: TickType) -> Self {
        let at = if ticks == MAX_DELAY {
            None
        } else {
            Some(Instant::now() + ticks_to_duration(ticks))
        };
        Self { ticks, at }
    }

    /// `true` if the caller asked not to block at all.
    pub fn is_immediate(&self) -> bool {
        self.ticks == 0
    }

    /// Time left before the deadline, `None` when waiting forever.
    fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// `true` once the deadline has passed (never for `MAX_DELAY`).
    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }
}

/// Tasks blocked on one condition of a kernel object
/// (`xTasksWaitingToSend` / `xTasksWaitingToReceive`).
pub struct WaitList {
    condvar: Condvar,
}

impl WaitList {
    pub const fn new() -> Self {
        Self {
            condvar: Condvar::new(),
        }
    }

    /// Blocks the calling task, releasing the critical section while it
    /// sleeps. Returns the re-acquired guard and `true` if the deadline
    /// passed. Spurious wake-ups are possible, so callers re-check their
    /// condition in a loop.
    pub fn wait<'a, T>(
        &self,
        guard: CriticalGuard<'a, T>,
        deadline: &Deadline,
    ) -> (CriticalGuard<'a, T>, bool) {
        crate::config::config_assert(!is_inside_interrupt());
        match deadline.remaining() {
            None => {
                let guard = self
                    .condvar
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner);
                (guard, false)
            }
            Some(left) if left.is_zero() => (guard, true),
            Some(left) => {
                let (guard, result) = self
                    .condvar
                    .wait_timeout(guard, left)
                    .unwrap_or_else(PoisonError::into_inner);
                (guard, result.timed_out())
            }
        }
    }

    /// Releases every task blocked on this list. Each re-checks its own
    /// condition, so waking all of them never loses an event.
    pub fn wake_all(&self) {
        self.condvar.notify_all();
    }
}

impl Default for WaitList {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a tick count to wall-clock time.
pub fn ticks_to_duration(ticks: TickType) -> Duration {
    Duration::from_micros(ticks as u64 * 1_000_000 / TICK_RATE_HZ as u64)
}

// =============================================================================
// Task Identity
// =============================================================================

/// Identifies the running task, for mutex ownership.
pub type TaskId = ThreadId;

/// Returns the identity of the calling task.
pub fn current_task() -> TaskId {
    thread::current().id()
}

// =============================================================================
// Interrupt Context
// =============================================================================

thread_local! {
    static ISR_NESTING: Cell<u32> = const { Cell::new(0) };
}

/// Marks the calling thread as running an interrupt handler.
pub fn enter_isr() {
    ISR_NESTING.with(|nesting| nesting.set(nesting.get() + 1));
}

/// Leaves interrupt context.
pub fn exit_isr() {
    ISR_NESTING.with(|nesting| {
        crate::config::config_assert(nesting.get() > 0);
        nesting.set(nesting.get().saturating_sub(1));
    });
}

/// Check if currently executing in an interrupt context
pub fn is_inside_interrupt() -> bool {
    ISR_NESTING.with(|nesting| nesting.get() > 0)
}

/// Yield from ISR if needed
///
/// There is no scheduler to pend on the host: woken threads are already
/// runnable, so the request is only traced.
#[inline]
pub fn yield_from_isr(switch_required: bool) {
    if switch_required {
        crate::trace::trace_yield_from_isr();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_zero_is_immediate_and_expired() {
        let deadline = Deadline::after(0);
        assert!(deadline.is_immediate());
        assert!(deadline.expired());
    }

    #[test]
    fn deadline_max_delay_never_expires() {
        let deadline = Deadline::after(MAX_DELAY);
        assert!(!deadline.is_immediate());
        assert!(!deadline.expired());
    }

    #[test]
    fn wait_times_out() {
        let section = CriticalSection::new(0u32);
        let list = WaitList::new();
        let deadline = Deadline::after(5);
        let started = Instant::now();
        let mut guard = section.enter();
        loop {
            let (g, timed_out) = list.wait(guard, &deadline);
            guard = g;
            if timed_out {
                break;
            }
        }
        assert!(started.elapsed() >= ticks_to_duration(5));
    }

    #[test]
    fn isr_nesting() {
        assert!(!is_inside_interrupt());
        enter_isr();
        enter_isr();
        assert!(is_inside_interrupt());
        exit_isr();
        assert!(is_inside_interrupt());
        exit_isr();
        assert!(!is_inside_interrupt());
    }
}
