//! Queue set wrapper
//!
//! One task can block on several waitables at once by adding them to a
//! [`QueueSet`]. `select` returns the handle of a member that became ready;
//! compare it with the wrappers (`handle == wrapper`) to find out which one,
//! then read that member.
//!
//! # Example
//!
//! ```ignore
//! let commands = Queue::<u32, Static<4>>::new();
//! let wakeup = BinarySemaphore::<Static>::new();
//! let set = QueueSet::new(commands.event_cost() + wakeup.event_cost());
//! set.add(&commands);
//! set.add(&wakeup);
//!
//! match set.select(MAX_DELAY) {
//!     Some(member) if member == commands => { commands.pop(NO_WAIT); }
//!     Some(member) if member == wakeup => { wakeup.take(NO_WAIT); }
//!     _ => {}
//! }
//! ```
//!
//! A member must not hold unread data when it is added or removed, and it
//! can belong to one set at a time.

use crate::kernel::queue_set::QueueSetObject;
use crate::port::InterruptContext;
use crate::types::{Handle, TickType};

use super::waitable::{SetMember, Waitable};

/// A set of waitables selected on together (`xQueueCreateSet`).
///
/// Sets are always allocated on the kernel heap.
pub struct QueueSet {
    object: Option<QueueSetObject>,
}

impl QueueSet {
    /// Creates a set holding up to `capacity` pending events. The event
    /// costs of all members must add up to no more than `capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            object: QueueSetObject::create(capacity).ok(),
        }
    }

    /// Adds a member (`xQueueAddToSet`). Fails without side effects if the
    /// member is not created, already in a set, holds unread data, or does
    /// not fit in the remaining capacity.
    pub fn add(&self, member: &dyn SetMember) -> bool {
        match (&self.object, member.member()) {
            (Some(set), Some(member)) => set.add(member).is_ok(),
            _ => false,
        }
    }

    /// Removes a member of this set (`xQueueRemoveFromSet`). Fails if it is
    /// not a member or still holds unread data.
    pub fn remove(&self, member: &dyn SetMember) -> bool {
        match (&self.object, member.member()) {
            (Some(set), Some(member)) => set.remove(member).is_ok(),
            _ => false,
        }
    }

    /// Waits up to `ticks` for a member to become ready
    /// (`xQueueSelectFromSet`).
    pub fn select(&self, ticks: TickType) -> Option<Handle> {
        self.object.as_ref()?.select(ticks).ok()
    }

    /// Returns a ready member without blocking
    /// (`xQueueSelectFromSetFromISR`).
    pub fn select_from_isr(&self, _ctx: &mut InterruptContext) -> Option<Handle> {
        self.object.as_ref()?.select_from_isr().ok()
    }

    /// Index of the waitable in `candidates` that `handle` refers to.
    pub fn identify(handle: Handle, candidates: &[&dyn Waitable]) -> Option<usize> {
        candidates
            .iter()
            .position(|candidate| candidate.matches(handle))
    }

    pub fn capacity(&self) -> usize {
        self.object.as_ref().map_or(0, QueueSetObject::capacity)
    }

    /// Capacity taken by the current members.
    pub fn committed(&self) -> usize {
        self.object.as_ref().map_or(0, QueueSetObject::committed)
    }
}

impl Waitable for QueueSet {
    fn handle(&self) -> Handle {
        self.object
            .as_ref()
            .map_or(Handle::NULL, QueueSetObject::handle)
    }
}
