/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! # rtos-waitables
//!
//! RTOS waitable objects with a choice of storage, and queue sets to wait on
//! several of them at once.
//!
//! Every wrapper in [`sync`] takes an allocation policy as a type parameter:
//!
//! - [`Dynamic`]: storage from the kernel heap, allocated on construction;
//! - [`Static<N>`](Static): storage inside the wrapper;
//! - [`External<N>`](External): a caller buffer of at least `REQUIRED_SIZE`
//!   bytes, handed over with `create(buffer)`.
//!
//! Creation never panics. A wrapper whose creation failed reports
//! `is_created() == false` and every operation on it fails.
//!
//! ## Layers
//!
//! - `sync` - the typed wrappers (`Queue`, `Mutex`, `RingBuffer`, ...)
//! - `kernel` - the kernel objects behind them, returning `kernel::Error`
//! - `memory` - allocation policies and the kernel heap
//! - `port` - critical sections, blocking with timeouts, interrupt context
//!
//! ## Features
//!
//! - `port-host` - std-hosted port, tasks are threads (default)
//! - `tick-16bit` - 16-bit tick counter
//! - `tick-32bit` - 32-bit tick counter (default)
//! - `tick-64bit` - 64-bit tick counter

// Core modules
pub mod config;
pub mod trace;
pub mod types;

// Port layer
pub mod port;

// Memory management
pub mod memory;

// Kernel modules
pub mod kernel;

// Wrappers
pub mod sync;

pub use kernel::Error;
pub use memory::{Dynamic, External, Static};
pub use port::InterruptContext;
pub use sync::*;
pub use types::{ms_to_ticks, ticks_to_ms, Handle, TickType, MAX_DELAY, NO_WAIT};
