/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! Port Layer
//!
//! The port supplies the handful of services the kernel objects are built
//! on: critical sections, blocking with a tick timeout, the identity of the
//! calling task, and interrupt-context bookkeeping. Each port implements the
//! same interface; one is selected with a Cargo feature.
//!
//! ## Available Ports
//!
//! - `port-host` - Runs on a hosted OS. Tasks are threads, critical sections
//!   are mutexes and blocking uses condition variables.

use core::marker::PhantomData;

#[cfg(feature = "port-host")]
mod host;

#[cfg(feature = "port-host")]
pub use host::*;

#[cfg(not(feature = "port-host"))]
compile_error!("no port selected: enable the `port-host` feature");

/// Interrupt service routine context.
///
/// Create one at the start of an interrupt handler and pass it to every
/// `*_from_isr` call made by that handler. Those calls never block; when one
/// of them releases a task that was waiting, the context records it. Dropping
/// the context at the end of the handler requests the yield
/// (`portYIELD_FROM_ISR`) if any task was woken.
///
/// # Example
///
/// ```ignore
/// fn uart_rx_isr(queue: &Queue<u8>, byte: u8) {
///     let mut ctx = InterruptContext::new();
///     queue.add_from_isr(byte, &mut ctx);
/// } // yields here if a reader was waiting
/// ```
pub struct InterruptContext {
    woken: bool,
    // Must be dropped by the handler that created it.
    _not_send: PhantomData<*const ()>,
}

impl InterruptContext {
    /// Enters interrupt context.
    pub fn new() -> Self {
        enter_isr();
        Self {
            woken: false,
            _not_send: PhantomData,
        }
    }

    /// Returns `true` if a call made through this context released a task.
    pub fn higher_priority_task_woken(&self) -> bool {
        self.woken
    }

    pub(crate) fn woken_flag(&mut self) -> &mut bool {
        &mut self.woken
    }
}

impl Default for InterruptContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptContext {
    fn drop(&mut self) {
        exit_isr();
        yield_from_isr(self.woken);
    }
}
