/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! Handle registry
//!
//! Handles are issued from a counter and never reused, so a stale handle can
//! never be mistaken for a newer object. The registry also remembers which
//! handles are live, which makes "deleted exactly once" checkable.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::config_assert;
use crate::port::CriticalSection;
use crate::types::Handle;

// 0 is the null handle.
static NEXT_HANDLE: AtomicUsize = AtomicUsize::new(1);

static LIVE: CriticalSection<BTreeSet<Handle>> = CriticalSection::new(BTreeSet::new());

/// Issues a fresh handle and marks it live.
pub(crate) fn allocate() -> Handle {
    let handle = Handle::from_raw(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed));
    LIVE.enter().insert(handle);
    handle
}

/// Marks `handle` deleted. Releasing a handle twice is a kernel bug.
pub(crate) fn release(handle: Handle) {
    let was_live = LIVE.enter().remove(&handle);
    config_assert(was_live);
}

/// Returns `true` while the object behind `handle` exists.
pub fn is_live(handle: Handle) -> bool {
    !handle.is_null() && LIVE.enter().contains(&handle)
}

/// Number of live objects.
pub fn live_count() -> usize {
    LIVE.enter().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique_and_tracked() {
        let a = allocate();
        let b = allocate();
        assert_ne!(a, b);
        assert!(!a.is_null());
        assert!(is_live(a) && is_live(b));

        release(a);
        assert!(!is_live(a));
        assert!(is_live(b));
        release(b);
    }

    #[test]
    fn null_is_never_live() {
        assert!(!is_live(Handle::NULL));
    }
}
