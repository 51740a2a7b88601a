/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! Queue sets
//!
//! A queue set is a queue of member handles. Each time a member receives an
//! event (an item, a give, a ring buffer send) the member posts its own
//! handle to the set, and `select` hands the handles out in arrival order.
//! The set only announces readiness: the caller still has to read the
//! member it was given.
//!
//! ## Capacity
//!
//! A set of capacity `C` can hold `C` pending handles. Each member declares
//! the most events it can have outstanding at once (its event cost), and
//! `add` refuses a member whose cost does not fit in what is left of `C`.
//!
//! A member never has more handles pending than units it holds (items,
//! bytes, messages or tokens). A send adds at least one unit and posts one
//! handle; a read or reset that leaves fewer units than pending handles
//! withdraws the newest extras. So no member exceeds its cost, however the
//! caller interleaves `select` with reads, and the set can never overflow.
//! If it does anyway the post trips `config_assert` and is dropped.
//!
//! ## Locking
//!
//! A member links to its set through a [`SetLink`] kept inside the member's
//! own critical section. Locks are always taken member first, then set.

use std::collections::VecDeque;
use std::sync::Arc;

use super::{registry, Error, Result};
use crate::config::config_assert;
use crate::memory::HeapBlock;
use crate::port::{CriticalSection, Deadline, WaitList};
use crate::trace::{self, ObjectKind};
use crate::types::{Handle, TickType};

/// An object that can be registered with a queue set.
pub trait Member {
    /// Handle posted to the set when this member becomes ready.
    fn handle(&self) -> Handle;

    /// Most events this member can have pending at once.
    fn event_cost(&self) -> usize;

    /// Links the member to `set`.
    ///
    /// Fails with no side effects if the member is already linked, holds
    /// unread events, or does not fit in the set's remaining capacity.
    fn attach(&self, set: &Arc<SetShared>) -> Result<()>;

    /// Unlinks the member from `set`. The member must be empty.
    fn detach(&self, set: &Arc<SetShared>) -> Result<()>;
}

struct SetState {
    events: VecDeque<Handle>,
    committed: usize,
    waiting: usize,
    closed: bool,
}

/// The part of a queue set its members hold on to.
pub struct SetShared {
    handle: Handle,
    capacity: usize,
    state: CriticalSection<SetState>,
    ready: WaitList,
}

impl SetShared {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    fn is_closed(&self) -> bool {
        self.state.enter().closed
    }

    fn register(&self, member: Handle, cost: usize) -> Result<()> {
        let mut state = self.state.enter();
        if state.closed {
            return Err(Error::NotCreated);
        }
        let needed = state.committed.saturating_add(cost);
        if needed > self.capacity {
            log::warn!(
                "queue set {}: cannot add {} (cost {}, {} of {} events committed)",
                self.handle,
                member,
                cost,
                state.committed,
                self.capacity
            );
            return Err(Error::CapacityExceeded {
                needed,
                capacity: self.capacity,
            });
        }
        state.committed = needed;
        trace::trace_queue_set_add(self.handle, member, cost);
        Ok(())
    }

    fn unregister(&self, member: Handle, cost: usize) {
        let mut state = self.state.enter();
        if state.closed {
            return;
        }
        state.committed = state.committed.saturating_sub(cost);
        state.events.retain(|&pending| pending != member);
        trace::trace_queue_set_remove(self.handle, member);
    }

    /// Drops the newest pending handles of `member` beyond the first `keep`.
    fn withdraw(&self, member: Handle, keep: usize) {
        let mut state = self.state.enter();
        let mut seen = 0;
        state.events.retain(|&pending| {
            if pending != member {
                return true;
            }
            seen += 1;
            seen <= keep
        });
    }

    /// Posts `member` to the set. Returns `true` if a task blocked in
    /// `select` was released.
    fn post(&self, member: Handle) -> bool {
        let mut state = self.state.enter();
        if state.closed {
            return false;
        }
        if state.events.len() >= self.capacity {
            config_assert(false);
            log::error!(
                "queue set {} overflowed (capacity {}), event from {} dropped",
                self.handle,
                self.capacity,
                member
            );
            return false;
        }
        state.events.push_back(member);
        trace::trace_queue_set_send(self.handle, member);
        let woken = state.waiting > 0;
        drop(state);
        self.ready.wake_all();
        woken
    }
}

/// Member-side link to a queue set.
///
/// Kept inside the member's critical section; every method expects that
/// section to be held.
#[derive(Default)]
pub struct SetLink(Option<Arc<SetShared>>);

impl SetLink {
    /// The set this member belongs to, if it is still alive.
    fn live_set(&self) -> Option<&Arc<SetShared>> {
        self.0.as_ref().filter(|set| !set.is_closed())
    }

    pub fn is_linked(&self) -> bool {
        self.live_set().is_some()
    }

    pub fn attach(
        &mut self,
        set: &Arc<SetShared>,
        member: Handle,
        cost: usize,
        holds_events: bool,
    ) -> Result<()> {
        if member.is_null() {
            return Err(Error::NotCreated);
        }
        if self.is_linked() {
            return Err(Error::AlreadyMember);
        }
        if holds_events {
            return Err(Error::MemberNotEmpty);
        }
        set.register(member, cost)?;
        self.0 = Some(Arc::clone(set));
        Ok(())
    }

    pub fn detach(
        &mut self,
        set: &Arc<SetShared>,
        member: Handle,
        cost: usize,
        holds_events: bool,
    ) -> Result<()> {
        match self.live_set() {
            Some(linked) if Arc::ptr_eq(linked, set) => {}
            _ => return Err(Error::NotMember),
        }
        if holds_events {
            return Err(Error::MemberNotEmpty);
        }
        set.unregister(member, cost);
        self.0 = None;
        Ok(())
    }

    /// Announces one event of `member`. Returns `true` if a task waiting on
    /// the set was released.
    pub fn notify(&self, member: Handle) -> bool {
        match &self.0 {
            Some(set) => set.post(member),
            None => false,
        }
    }

    /// Brings the handles `member` has pending down to the `held` units it
    /// still holds. Called after every read and reset.
    pub fn settle(&self, member: Handle, held: usize) {
        if let Some(set) = &self.0 {
            set.withdraw(member, held);
        }
    }

    /// Unlinks a member that is being deleted while still registered.
    pub fn release(&mut self, member: Handle, cost: usize) {
        if let Some(set) = self.0.take() {
            if !set.is_closed() {
                log::warn!(
                    "{} deleted while still a member of queue set {}",
                    member,
                    set.handle
                );
                set.unregister(member, cost);
            }
        }
    }
}

/// Queue set (`xQueueCreateSet`).
///
/// Sets always live on the kernel heap: the set is shared with its members,
/// which may outlive the wrapper that created it.
pub struct QueueSetObject {
    shared: Arc<SetShared>,
    _storage: HeapBlock,
}

impl QueueSetObject {
    /// Creates a set that can hold `capacity` pending events.
    pub fn create(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidParameter);
        }
        let bytes = capacity
            .checked_mul(core::mem::size_of::<Handle>())
            .ok_or(Error::OutOfMemory)?;
        let storage = HeapBlock::allocate(bytes)?;
        let handle = registry::allocate();
        trace::trace_create(ObjectKind::QueueSet, handle, bytes);
        Ok(Self {
            shared: Arc::new(SetShared {
                handle,
                capacity,
                state: CriticalSection::new(SetState {
                    events: VecDeque::with_capacity(capacity),
                    committed: 0,
                    waiting: 0,
                    closed: false,
                }),
                ready: WaitList::new(),
            }),
            _storage: storage,
        })
    }

    pub fn handle(&self) -> Handle {
        self.shared.handle
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Sum of the event costs of the current members.
    pub fn committed(&self) -> usize {
        self.shared.state.enter().committed
    }

    /// Events posted and not yet selected.
    pub fn pending(&self) -> usize {
        self.shared.state.enter().events.len()
    }

    /// Adds `member` (`xQueueAddToSet`).
    pub fn add(&self, member: &dyn Member) -> Result<()> {
        member.attach(&self.shared)
    }

    /// Removes `member` (`xQueueRemoveFromSet`).
    pub fn remove(&self, member: &dyn Member) -> Result<()> {
        member.detach(&self.shared)
    }

    /// Waits up to `ticks` for a member to become ready
    /// (`xQueueSelectFromSet`).
    pub fn select(&self, ticks: TickType) -> Result<Handle> {
        let deadline = Deadline::after(ticks);
        let mut state = self.shared.state.enter();
        let result = loop {
            if let Some(member) = state.events.pop_front() {
                break Ok(member);
            }
            if deadline.is_immediate() {
                break Err(Error::Empty);
            }
            state.waiting += 1;
            let (guard, timed_out) = self.shared.ready.wait(state, &deadline);
            state = guard;
            state.waiting -= 1;
            if timed_out && state.events.is_empty() {
                break Err(Error::Timeout);
            }
        };
        drop(state);
        trace::trace_queue_set_select(self.shared.handle, result.ok());
        result
    }

    /// Non-blocking select for interrupt handlers
    /// (`xQueueSelectFromSetFromISR`).
    pub fn select_from_isr(&self) -> Result<Handle> {
        let member = self.shared.state.enter().events.pop_front();
        trace::trace_queue_set_select(self.shared.handle, member);
        member.ok_or(Error::Empty)
    }
}

impl Drop for QueueSetObject {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.enter();
            state.closed = true;
            state.events.clear();
        }
        registry::release(self.shared.handle);
        trace::trace_delete(ObjectKind::QueueSet, self.shared.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal member holding a pending-event counter.
    struct Source {
        handle: Handle,
        cost: usize,
        state: CriticalSection<(usize, SetLink)>,
    }

    impl Source {
        fn new(cost: usize) -> Self {
            Self {
                handle: registry::allocate(),
                cost,
                state: CriticalSection::new((0, SetLink::default())),
            }
        }

        fn fire(&self) -> bool {
            let mut state = self.state.enter();
            state.0 += 1;
            state.1.notify(self.handle)
        }

        /// Consumes `units` of what the member holds.
        fn take(&self, units: usize) {
            let mut state = self.state.enter();
            state.0 -= units;
            let held = state.0;
            state.1.settle(self.handle, held);
        }

        fn drain(&self) {
            let held = self.state.enter().0;
            self.take(held);
        }
    }

    impl Member for Source {
        fn handle(&self) -> Handle {
            self.handle
        }

        fn event_cost(&self) -> usize {
            self.cost
        }

        fn attach(&self, set: &Arc<SetShared>) -> Result<()> {
            let mut state = self.state.enter();
            let pending = state.0 > 0;
            state.1.attach(set, self.handle, self.cost, pending)
        }

        fn detach(&self, set: &Arc<SetShared>) -> Result<()> {
            let mut state = self.state.enter();
            let pending = state.0 > 0;
            state.1.detach(set, self.handle, self.cost, pending)
        }
    }

    impl Drop for Source {
        fn drop(&mut self) {
            self.state.enter().1.release(self.handle, self.cost);
            registry::release(self.handle);
        }
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(QueueSetObject::create(0).err(), Some(Error::InvalidParameter));
    }

    #[test]
    fn capacity_is_enforced_at_add() {
        let set = QueueSetObject::create(4).expect("set");
        let a = Source::new(3);
        let b = Source::new(2);
        assert_eq!(set.add(&a), Ok(()));
        assert_eq!(
            set.add(&b),
            Err(Error::CapacityExceeded {
                needed: 5,
                capacity: 4
            })
        );
        assert_eq!(set.committed(), 3);
        assert_eq!(set.remove(&a), Ok(()));
        assert_eq!(set.add(&b), Ok(()));
        assert_eq!(set.committed(), 2);
    }

    #[test]
    fn membership_rules() {
        let first = QueueSetObject::create(4).expect("set");
        let second = QueueSetObject::create(4).expect("set");
        let source = Source::new(1);

        assert_eq!(first.remove(&source), Err(Error::NotMember));
        assert_eq!(first.add(&source), Ok(()));
        assert_eq!(first.add(&source), Err(Error::AlreadyMember));
        assert_eq!(second.add(&source), Err(Error::AlreadyMember));
        assert_eq!(second.remove(&source), Err(Error::NotMember));

        source.fire();
        assert_eq!(first.remove(&source), Err(Error::MemberNotEmpty));
        source.drain();
        assert_eq!(first.remove(&source), Ok(()));
        assert_eq!(first.pending(), 0, "removal purges the member's events");

        source.fire();
        assert_eq!(second.add(&source), Err(Error::MemberNotEmpty));
    }

    #[test]
    fn select_returns_events_in_arrival_order() {
        let set = QueueSetObject::create(2).expect("set");
        let a = Source::new(1);
        let b = Source::new(1);
        set.add(&a).expect("add a");
        set.add(&b).expect("add b");

        b.fire();
        a.fire();
        assert_eq!(set.select(0), Ok(b.handle()));
        assert_eq!(set.select_from_isr(), Ok(a.handle()));
        assert_eq!(set.select(0), Err(Error::Empty));
        assert_eq!(set.select(2), Err(Error::Timeout));
    }

    #[test]
    fn select_wakes_on_post_from_another_thread() {
        let set = QueueSetObject::create(1).expect("set");
        let source = Source::new(1);
        set.add(&source).expect("add");

        std::thread::scope(|s| {
            let waiter = s.spawn(|| set.select(crate::types::MAX_DELAY));
            while set.shared.state.enter().waiting == 0 {
                std::thread::yield_now();
            }
            assert!(source.fire(), "a task was blocked in select");
            assert_eq!(waiter.join().expect("waiter"), Ok(source.handle()));
        });
    }

    #[test]
    fn dropping_a_member_purges_its_events() {
        let set = QueueSetObject::create(2).expect("set");
        let keep = Source::new(1);
        set.add(&keep).expect("add");
        {
            let gone = Source::new(1);
            set.add(&gone).expect("add");
            gone.fire();
            keep.fire();
        }
        assert_eq!(set.committed(), 1);
        assert_eq!(set.select(0), Ok(keep.handle()));
    }

    #[test]
    fn members_outlive_their_set() {
        let source = Source::new(1);
        {
            let set = QueueSetObject::create(1).expect("set");
            set.add(&source).expect("add");
        }
        assert!(!source.fire());
        let other = QueueSetObject::create(1).expect("set");
        source.drain();
        assert_eq!(other.add(&source), Ok(()));
    }

    #[test]
    fn reads_withdraw_events_the_member_no_longer_holds() {
        let set = QueueSetObject::create(3).expect("set");
        let busy = Source::new(2);
        let quiet = Source::new(1);
        set.add(&busy).expect("add busy");
        set.add(&quiet).expect("add quiet");

        busy.fire();
        quiet.fire();
        busy.fire();
        assert_eq!(set.pending(), 3);
        busy.take(1);
        assert_eq!(set.pending(), 2, "the newest busy event goes");
        assert_eq!(set.select(0), Ok(busy.handle()));
        assert_eq!(set.select(0), Ok(quiet.handle()));
        assert_eq!(set.select(0), Err(Error::Empty));
        quiet.drain();
        busy.drain();

        // One select serves several sends, round after round.
        for _ in 0..5 {
            busy.fire();
            busy.fire();
            assert_eq!(set.select(0), Ok(busy.handle()));
            busy.drain();
            assert_eq!(set.pending(), 0);
        }
    }
}
