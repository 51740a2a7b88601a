/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! Queues, semaphores and mutexes
//!
//! As in FreeRTOS, one object type implements all of them. A semaphore is a
//! queue whose items have no data: its count is the number of items queued.
//! A mutex is a binary semaphore that starts full and remembers which task
//! took it.
//!
//! | Kind | Length | Item size | Initial count |
//! |------|--------|-----------|---------------|
//! | queue | `N` | `size_of::<T>()` | 0 |
//! | binary semaphore | 1 | 0 | 0 |
//! | counting semaphore | `max` | 0 | `initial` |
//! | mutex / recursive mutex | 1 | 0 | 1 |
//!
//! Items live in the object's [`Region`] as a circular array of
//! `length * item_size` bytes.

use core::cell::UnsafeCell;
use core::ptr;
use std::sync::Arc;

use super::queue_set::{Member, SetLink, SetShared};
use super::{registry, Error, Result};
use crate::config::config_assert;
use crate::memory::Region;
use crate::port::{current_task, CriticalGuard, CriticalSection, Deadline, TaskId, WaitList};
use crate::trace::{self, ObjectKind};
use crate::types::{Handle, TickType};

/// What a queue object is used as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueKind {
    Queue,
    BinarySemaphore,
    CountingSemaphore,
    Mutex,
    RecursiveMutex,
}

impl QueueKind {
    fn is_mutex(self) -> bool {
        matches!(self, QueueKind::Mutex | QueueKind::RecursiveMutex)
    }

    fn object_kind(self) -> ObjectKind {
        match self {
            QueueKind::Queue => ObjectKind::Queue,
            QueueKind::BinarySemaphore => ObjectKind::BinarySemaphore,
            QueueKind::CountingSemaphore => ObjectKind::CountingSemaphore,
            QueueKind::Mutex => ObjectKind::Mutex,
            QueueKind::RecursiveMutex => ObjectKind::RecursiveMutex,
        }
    }
}

/// Where `send` puts the item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendPosition {
    /// `queueSEND_TO_BACK`
    Back,
    /// `queueSEND_TO_FRONT`
    Front,
    /// `queueOVERWRITE`, only valid on a queue of length 1
    Overwrite,
}

struct QueueState {
    /// Slot of the oldest item.
    head: usize,
    count: usize,
    holder: Option<TaskId>,
    recursion: usize,
    waiting_to_send: usize,
    waiting_to_receive: usize,
    link: SetLink,
}

/// Queue control block plus its item storage.
pub struct QueueObject<R: Region> {
    handle: Handle,
    kind: QueueKind,
    length: usize,
    item_size: usize,
    storage: UnsafeCell<R>,
    state: CriticalSection<QueueState>,
    not_empty: WaitList,
    not_full: WaitList,
}

// Safety: the storage is only touched with the critical section held.
unsafe impl<R: Region> Sync for QueueObject<R> {}

impl<R: Region> QueueObject<R> {
    /// Creates a queue of `length` items of `item_size` bytes
    /// (`xQueueGenericCreate`).
    pub fn create_queue(region: R, length: usize, item_size: usize) -> Result<Self> {
        Self::create(QueueKind::Queue, region, length, item_size, 0)
    }

    /// Creates a binary semaphore, initially empty.
    pub fn create_binary(region: R) -> Result<Self> {
        Self::create(QueueKind::BinarySemaphore, region, 1, 0, 0)
    }

    /// Creates a counting semaphore (`xQueueCreateCountingSemaphore`).
    pub fn create_counting(region: R, max_count: usize, initial_count: usize) -> Result<Self> {
        if initial_count > max_count {
            trace::trace_create_failed(ObjectKind::CountingSemaphore, &Error::InvalidParameter);
            return Err(Error::InvalidParameter);
        }
        Self::create(QueueKind::CountingSemaphore, region, max_count, 0, initial_count)
    }

    /// Creates a mutex, initially available (`xQueueCreateMutex`).
    pub fn create_mutex(region: R, recursive: bool) -> Result<Self> {
        let kind = if recursive {
            QueueKind::RecursiveMutex
        } else {
            QueueKind::Mutex
        };
        Self::create(kind, region, 1, 0, 1)
    }

    fn create(
        kind: QueueKind,
        region: R,
        length: usize,
        item_size: usize,
        initial_count: usize,
    ) -> Result<Self> {
        let bytes = length.checked_mul(item_size);
        let result = match bytes {
            _ if length == 0 => Err(Error::InvalidParameter),
            None => Err(Error::InvalidParameter),
            Some(bytes) if region.len() < bytes => Err(Error::BufferTooSmall {
                required: bytes,
                provided: region.len(),
            }),
            Some(_) => Ok(()),
        };
        if let Err(error) = result {
            trace::trace_create_failed(kind.object_kind(), &error);
            return Err(error);
        }

        let handle = registry::allocate();
        trace::trace_create(kind.object_kind(), handle, length * item_size);
        Ok(Self {
            handle,
            kind,
            length,
            item_size,
            storage: UnsafeCell::new(region),
            state: CriticalSection::new(QueueState {
                head: 0,
                count: initial_count,
                holder: None,
                recursion: 0,
                waiting_to_send: 0,
                waiting_to_receive: 0,
                link: SetLink::default(),
            }),
            not_empty: WaitList::new(),
            not_full: WaitList::new(),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn item_size(&self) -> usize {
        self.item_size
    }

    // =========================================================================
    // Storage access (critical section held)
    // =========================================================================

    fn slot(&self, index: usize) -> *mut u8 {
        // Safety: index < length and the region holds length * item_size bytes.
        unsafe { R::base(self.storage.get()).add(index * self.item_size) }
    }

    fn write_slot(&self, _state: &QueueState, index: usize, item: &[u8]) {
        if self.item_size > 0 {
            // Safety: the slot is inside the region and the caller holds the
            // critical section, so nothing else touches it.
            unsafe { ptr::copy_nonoverlapping(item.as_ptr(), self.slot(index), self.item_size) };
        }
    }

    fn read_slot(&self, _state: &QueueState, index: usize, out: &mut [u8]) {
        if self.item_size > 0 {
            // Safety: as for write_slot.
            unsafe { ptr::copy_nonoverlapping(self.slot(index), out.as_mut_ptr(), self.item_size) };
        }
    }

    fn check_item(&self, len: usize) -> Result<()> {
        if len == self.item_size {
            Ok(())
        } else {
            Err(Error::InvalidParameter)
        }
    }

    /// Stores `item` and announces it. Returns `true` if a task was woken.
    fn push_locked(&self, state: &mut QueueState, item: &[u8], position: SendPosition) -> bool {
        let previous = state.count;
        match position {
            SendPosition::Back => {
                let tail = (state.head + state.count) % self.length;
                self.write_slot(state, tail, item);
                state.count += 1;
            }
            SendPosition::Front => {
                state.head = (state.head + self.length - 1) % self.length;
                self.write_slot(state, state.head, item);
                state.count += 1;
            }
            SendPosition::Overwrite => {
                state.head = 0;
                self.write_slot(state, 0, item);
                state.count = 1;
            }
        }

        let mut woken = state.waiting_to_receive > 0;
        // Overwriting a waiting item is not a new event.
        if !(position == SendPosition::Overwrite && previous > 0) {
            woken |= state.link.notify(self.handle);
        }
        self.not_empty.wake_all();
        woken
    }

    /// Removes the oldest item. Returns `true` if a task was woken.
    fn pop_locked(&self, state: &mut QueueState, out: &mut [u8]) -> bool {
        self.read_slot(state, state.head, out);
        state.head = (state.head + 1) % self.length;
        state.count -= 1;
        state.link.settle(self.handle, state.count);
        if self.kind.is_mutex() {
            state.holder = Some(current_task());
            state.recursion = 1;
        }
        self.not_full.wake_all();
        state.waiting_to_send > 0
    }

    /// Sleeps on `list` until woken or the deadline passes.
    fn block<'a>(
        &self,
        list: &WaitList,
        mut state: CriticalGuard<'a, QueueState>,
        deadline: &Deadline,
        sending: bool,
    ) -> (CriticalGuard<'a, QueueState>, bool) {
        if sending {
            state.waiting_to_send += 1;
        } else {
            state.waiting_to_receive += 1;
        }
        let (mut state, timed_out) = list.wait(state, deadline);
        if sending {
            state.waiting_to_send -= 1;
        } else {
            state.waiting_to_receive -= 1;
        }
        (state, timed_out)
    }

    // =========================================================================
    // Queue operations
    // =========================================================================

    /// Sends an item, waiting up to `ticks` for space (`xQueueGenericSend`).
    pub fn send(&self, item: &[u8], position: SendPosition, ticks: TickType) -> Result<()> {
        self.check_item(item.len())?;
        if position == SendPosition::Overwrite && self.length != 1 {
            return Err(Error::InvalidParameter);
        }
        let deadline = Deadline::after(ticks);
        let mut state = self.state.enter();
        loop {
            if state.count < self.length || position == SendPosition::Overwrite {
                self.push_locked(&mut state, item, position);
                return Ok(());
            }
            if deadline.is_immediate() {
                return Err(Error::Full);
            }
            let (guard, timed_out) = self.block(&self.not_full, state, &deadline, true);
            state = guard;
            if timed_out && state.count >= self.length {
                return Err(Error::Timeout);
            }
        }
    }

    /// Interrupt-safe send (`xQueueGenericSendFromISR`).
    pub fn send_from_isr(&self, item: &[u8], position: SendPosition, woken: &mut bool) -> Result<()> {
        self.check_item(item.len())?;
        if position == SendPosition::Overwrite && self.length != 1 {
            return Err(Error::InvalidParameter);
        }
        let mut state = self.state.enter();
        if state.count >= self.length && position != SendPosition::Overwrite {
            return Err(Error::Full);
        }
        *woken |= self.push_locked(&mut state, item, position);
        Ok(())
    }

    /// Receives the oldest item, waiting up to `ticks` (`xQueueReceive`).
    pub fn receive(&self, out: &mut [u8], ticks: TickType) -> Result<()> {
        self.check_item(out.len())?;
        let deadline = Deadline::after(ticks);
        let mut state = self.state.enter();
        loop {
            if state.count > 0 {
                self.pop_locked(&mut state, out);
                return Ok(());
            }
            if deadline.is_immediate() {
                return Err(Error::Empty);
            }
            let (guard, timed_out) = self.block(&self.not_empty, state, &deadline, false);
            state = guard;
            if timed_out && state.count == 0 {
                return Err(Error::Timeout);
            }
        }
    }

    /// Interrupt-safe receive (`xQueueReceiveFromISR`).
    pub fn receive_from_isr(&self, out: &mut [u8], woken: &mut bool) -> Result<()> {
        self.check_item(out.len())?;
        if self.kind.is_mutex() {
            return Err(Error::InvalidParameter);
        }
        let mut state = self.state.enter();
        if state.count == 0 {
            return Err(Error::Empty);
        }
        *woken |= self.pop_locked(&mut state, out);
        Ok(())
    }

    /// Copies the oldest item without removing it (`xQueuePeek`).
    pub fn peek(&self, out: &mut [u8], ticks: TickType) -> Result<()> {
        self.check_item(out.len())?;
        let deadline = Deadline::after(ticks);
        let mut state = self.state.enter();
        loop {
            if state.count > 0 {
                self.read_slot(&state, state.head, out);
                return Ok(());
            }
            if deadline.is_immediate() {
                return Err(Error::Empty);
            }
            let (guard, timed_out) = self.block(&self.not_empty, state, &deadline, false);
            state = guard;
            if timed_out && state.count == 0 {
                return Err(Error::Timeout);
            }
        }
    }

    /// Interrupt-safe peek (`xQueuePeekFromISR`).
    pub fn peek_from_isr(&self, out: &mut [u8]) -> Result<()> {
        self.check_item(out.len())?;
        let state = self.state.enter();
        if state.count == 0 {
            return Err(Error::Empty);
        }
        self.read_slot(&state, state.head, out);
        Ok(())
    }

    /// Empties the queue (`xQueueReset`). Tasks waiting to send are woken.
    pub fn reset(&self) {
        let mut state = self.state.enter();
        state.head = 0;
        state.count = 0;
        state.link.settle(self.handle, 0);
        drop(state);
        self.not_full.wake_all();
    }

    /// Items waiting (`uxQueueMessagesWaiting`); the count of a semaphore.
    pub fn messages_waiting(&self) -> usize {
        self.state.enter().count
    }

    /// Free slots (`uxQueueSpacesAvailable`).
    pub fn spaces_available(&self) -> usize {
        self.length - self.state.enter().count
    }

    pub fn is_full(&self) -> bool {
        self.state.enter().count == self.length
    }

    pub fn is_empty(&self) -> bool {
        self.state.enter().count == 0
    }

    // =========================================================================
    // Semaphore and mutex operations
    // =========================================================================

    /// Takes a semaphore or mutex (`xQueueSemaphoreTake`).
    ///
    /// A recursive mutex already held by the caller is taken again without
    /// blocking.
    pub fn take(&self, ticks: TickType) -> Result<()> {
        if self.kind == QueueKind::RecursiveMutex {
            let mut state = self.state.enter();
            if state.holder == Some(current_task()) {
                state.recursion += 1;
                return Ok(());
            }
        }
        self.receive(&mut [], ticks)
    }

    /// Interrupt-safe take. Mutexes cannot be taken from an interrupt.
    pub fn take_from_isr(&self, woken: &mut bool) -> Result<()> {
        self.receive_from_isr(&mut [], woken)
    }

    /// Gives a semaphore or mutex (`xQueueGiveMutexRecursive` /
    /// `xSemaphoreGive`). Never blocks.
    ///
    /// Fails with `Full` if a semaphore is at its maximum count and with
    /// `NotOwner` if the caller does not hold the mutex.
    pub fn give(&self) -> Result<()> {
        if !self.kind.is_mutex() {
            return self.send(&[], SendPosition::Back, 0);
        }
        let mut state = self.state.enter();
        if state.holder != Some(current_task()) {
            return Err(Error::NotOwner);
        }
        state.recursion -= 1;
        if state.recursion > 0 {
            return Ok(());
        }
        state.holder = None;
        config_assert(state.count < self.length);
        self.push_locked(&mut state, &[], SendPosition::Back);
        Ok(())
    }

    /// Interrupt-safe give. Mutexes cannot be given from an interrupt.
    pub fn give_from_isr(&self, woken: &mut bool) -> Result<()> {
        if self.kind.is_mutex() {
            return Err(Error::InvalidParameter);
        }
        self.send_from_isr(&[], SendPosition::Back, woken)
    }

    /// Task holding the mutex, if any (`xSemaphoreGetMutexHolder`).
    pub fn mutex_holder(&self) -> Option<TaskId> {
        self.state.enter().holder
    }

    /// Depth of nested takes by the holder of a recursive mutex.
    pub fn recursion_depth(&self) -> usize {
        self.state.enter().recursion
    }

    /// Tasks blocked on this object, senders and receivers.
    pub fn waiting_tasks(&self) -> usize {
        let state = self.state.enter();
        state.waiting_to_send + state.waiting_to_receive
    }
}

impl<R: Region> Member for QueueObject<R> {
    fn handle(&self) -> Handle {
        self.handle
    }

    /// One event per queued item, so the length bounds the pending events.
    fn event_cost(&self) -> usize {
        self.length
    }

    fn attach(&self, set: &Arc<SetShared>) -> Result<()> {
        let mut state = self.state.enter();
        let holds_events = state.count > 0;
        state.link.attach(set, self.handle, self.length, holds_events)
    }

    fn detach(&self, set: &Arc<SetShared>) -> Result<()> {
        let mut state = self.state.enter();
        let holds_events = state.count > 0;
        state.link.detach(set, self.handle, self.length, holds_events)
    }
}

impl<R: Region> Drop for QueueObject<R> {
    fn drop(&mut self) {
        self.state.enter().link.release(self.handle, self.length);
        registry::release(self.handle);
        trace::trace_delete(self.kind.object_kind(), self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Dynamic, HeapBlock, Static};
    use crate::types::MAX_DELAY;

    fn queue(length: usize) -> QueueObject<HeapBlock> {
        let region = Dynamic::region(length * 4).expect("heap");
        QueueObject::create_queue(region, length, 4).expect("queue")
    }

    fn pop(queue: &QueueObject<HeapBlock>) -> u32 {
        let mut out = [0u8; 4];
        queue.receive(&mut out, 0).expect("item");
        u32::from_ne_bytes(out)
    }

    #[test]
    fn zero_length_is_rejected() {
        let region = Static::<0>::region::<u32>();
        assert_eq!(
            QueueObject::create_queue(region, 0, 4).err(),
            Some(Error::InvalidParameter)
        );
    }

    #[test]
    fn region_must_hold_every_slot() {
        let region = Static::<2>::region::<u32>();
        assert_eq!(
            QueueObject::create_queue(region, 3, 4).err(),
            Some(Error::BufferTooSmall {
                required: 12,
                provided: 8
            })
        );
    }

    #[test]
    fn back_is_fifo_and_front_is_lifo() {
        let q = queue(3);
        for v in [1u32, 2, 3] {
            q.send(&v.to_ne_bytes(), SendPosition::Back, 0).expect("send");
        }
        assert_eq!(q.send(&4u32.to_ne_bytes(), SendPosition::Back, 0), Err(Error::Full));
        assert_eq!([pop(&q), pop(&q), pop(&q)], [1, 2, 3]);

        for v in [1u32, 2, 3] {
            q.send(&v.to_ne_bytes(), SendPosition::Front, 0).expect("send");
        }
        assert_eq!([pop(&q), pop(&q), pop(&q)], [3, 2, 1]);
    }

    #[test]
    fn wraps_around_the_storage() {
        let q = queue(2);
        for round in 0..5u32 {
            q.send(&round.to_ne_bytes(), SendPosition::Back, 0).expect("send");
            q.send(&(round + 100).to_ne_bytes(), SendPosition::Back, 0).expect("send");
            assert_eq!(pop(&q), round);
            assert_eq!(pop(&q), round + 100);
        }
    }

    #[test]
    fn overwrite_needs_length_one() {
        let q = queue(2);
        assert_eq!(
            q.send(&1u32.to_ne_bytes(), SendPosition::Overwrite, 0),
            Err(Error::InvalidParameter)
        );

        let single = queue(1);
        single.send(&1u32.to_ne_bytes(), SendPosition::Overwrite, 0).expect("overwrite");
        single.send(&2u32.to_ne_bytes(), SendPosition::Overwrite, 0).expect("overwrite");
        assert_eq!(single.messages_waiting(), 1);
        assert_eq!(pop(&single), 2);
    }

    #[test]
    fn receive_times_out_when_empty() {
        let q = queue(1);
        let mut out = [0u8; 4];
        assert_eq!(q.receive(&mut out, 0), Err(Error::Empty));
        assert_eq!(q.receive(&mut out, 3), Err(Error::Timeout));
        assert_eq!(q.peek(&mut out, 0), Err(Error::Empty));
    }

    #[test]
    fn wrong_item_size_is_rejected() {
        let q = queue(1);
        assert_eq!(q.send(&[0u8; 2], SendPosition::Back, 0), Err(Error::InvalidParameter));
    }

    #[test]
    fn blocked_receiver_is_released_by_send() {
        let q = queue(1);
        std::thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut out = [0u8; 4];
                q.receive(&mut out, MAX_DELAY).map(|_| u32::from_ne_bytes(out))
            });
            while q.waiting_tasks() == 0 {
                std::thread::yield_now();
            }
            let mut woken = false;
            q.send_from_isr(&7u32.to_ne_bytes(), SendPosition::Back, &mut woken)
                .expect("send");
            assert!(woken);
            assert_eq!(reader.join().expect("reader"), Ok(7));
        });
    }

    #[test]
    fn counting_semaphore_counts() {
        let region = Static::<0>::region::<()>();
        let sem = QueueObject::create_counting(region, 2, 0).expect("semaphore");
        assert_eq!(sem.take(0), Err(Error::Empty));
        sem.give().expect("give");
        sem.give().expect("give");
        assert_eq!(sem.give(), Err(Error::Full));
        assert_eq!(sem.messages_waiting(), 2);
        sem.take(0).expect("take");
        assert_eq!(sem.messages_waiting(), 1);

        let region = Static::<0>::region::<()>();
        assert!(QueueObject::create_counting(region, 1, 2).is_err());
    }

    #[test]
    fn mutex_tracks_its_holder() {
        let region = Static::<0>::region::<()>();
        let mutex = QueueObject::create_mutex(region, false).expect("mutex");
        assert_eq!(mutex.give(), Err(Error::NotOwner));
        mutex.take(0).expect("take");
        assert_eq!(mutex.mutex_holder(), Some(current_task()));
        assert_eq!(mutex.take(0), Err(Error::Empty));

        std::thread::scope(|s| {
            let other = s.spawn(|| mutex.give());
            assert_eq!(other.join().expect("thread"), Err(Error::NotOwner));
        });

        mutex.give().expect("give");
        assert_eq!(mutex.mutex_holder(), None);

        let mut woken = false;
        assert_eq!(mutex.take_from_isr(&mut woken), Err(Error::InvalidParameter));
    }

    #[test]
    fn recursive_mutex_nests() {
        let region = Static::<0>::region::<()>();
        let mutex = QueueObject::create_mutex(region, true).expect("mutex");
        mutex.take(0).expect("take");
        mutex.take(0).expect("nested take");
        assert_eq!(mutex.recursion_depth(), 2);
        mutex.give().expect("give");
        assert_eq!(mutex.mutex_holder(), Some(current_task()));
        mutex.give().expect("give");
        assert_eq!(mutex.mutex_holder(), None);
        assert_eq!(mutex.give(), Err(Error::NotOwner));
    }

    #[test]
    fn handle_is_released_on_drop() {
        let q = queue(1);
        let handle = q.handle();
        assert!(registry::is_live(handle));
        drop(q);
        assert!(!registry::is_live(handle));
    }
}
