/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! Ring buffers
//!
//! Variable-length items are written into a circular byte buffer and read
//! back in place: `receive` lends the caller the item's bytes inside the
//! buffer, and the space is only reclaimed once the item is handed back with
//! `return_item`. Items may be returned in any order; space is reclaimed
//! from the oldest item forwards once it has been returned.
//!
//! ## Buffer types
//!
//! - **No-split**: each item is stored contiguously behind an 8-byte header.
//!   An item that does not fit before the end of the buffer is placed at the
//!   start, and the bytes left at the end are skipped.
//! - **Allow-split**: like no-split, but an item that does not fit before the
//!   end is split in two, each part with its own header. The receiver gets
//!   the two parts separately.
//! - **Byte**: no headers and no item boundaries. Sends append bytes, and a
//!   receive takes whatever contiguous bytes are waiting. Only one received
//!   item may be outstanding at a time.
//!
//! Header and alignment sizes come from `config.rs`.
//!
//! ## Caller obligations
//!
//! `receive` and `return_item` are separate calls. Two tasks receiving from
//! the same buffer each get their own items, but a task must only return
//! items it received itself.

use core::cell::UnsafeCell;
use core::ops::Deref;
use core::{ptr, slice};
use std::sync::Arc;

use super::queue_set::{Member, SetLink, SetShared};
use super::{registry, Error, Result};
use crate::config::{config_assert, RINGBUF_ALIGNMENT, RINGBUF_HEADER_SIZE};
use crate::memory::Region;
use crate::port::{CriticalGuard, CriticalSection, Deadline, WaitList};
use crate::trace::{self, ObjectKind};
use crate::types::{Handle, TickType};

const HEADER: usize = RINGBUF_HEADER_SIZE;

// Header flags
const FLAG_SPLIT: u32 = 0x1;
const FLAG_WRAP_DUMMY: u32 = 0x2;
const FLAG_RETURNED: u32 = 0x4;
const FLAG_ACQUIRED: u32 = 0x8;

const fn align_up(n: usize) -> usize {
    (n + RINGBUF_ALIGNMENT - 1) & !(RINGBUF_ALIGNMENT - 1)
}

const fn align_down(n: usize) -> usize {
    n & !(RINGBUF_ALIGNMENT - 1)
}

/// Ring buffer type (`RingbufferType_t`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingbufType {
    NoSplit,
    AllowSplit,
    Byte,
}

impl RingbufType {
    /// Usable size of a buffer of `size` bytes.
    pub const fn usable_size(self, size: usize) -> usize {
        match self {
            RingbufType::Byte => size,
            _ => align_down(size),
        }
    }

    /// Largest item a buffer of `size` bytes accepts.
    pub const fn max_item_size(self, size: usize) -> usize {
        let size = self.usable_size(size);
        match self {
            RingbufType::NoSplit => align_down(size / 2).saturating_sub(HEADER),
            RingbufType::AllowSplit => size.saturating_sub(2 * HEADER),
            RingbufType::Byte => size,
        }
    }

    /// Most items a buffer of `size` bytes can hold at once.
    ///
    /// The smallest item takes one header and one aligned word, or one byte
    /// in a byte buffer.
    pub const fn max_items(self, size: usize) -> usize {
        let size = self.usable_size(size);
        match self {
            RingbufType::Byte => size,
            _ => size / (HEADER + RINGBUF_ALIGNMENT),
        }
    }
}

/// An item lent out by `receive`. Hand it back with `return_item`.
#[must_use = "received items must be returned to the ring buffer"]
pub struct RingItem<'a> {
    data: &'a [u8],
    offset: usize,
}

impl RingItem<'_> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Deref for RingItem<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

struct RingState {
    write: usize,
    read: usize,
    /// Start of the oldest item not yet reclaimed.
    free: usize,
    /// Bytes from `free` to `write`, including skipped bytes.
    used: usize,
    /// Items sent and not yet received (bytes, for a byte buffer).
    items_waiting: usize,
    acquired: usize,
    /// Length of the outstanding item of a byte buffer.
    byte_item_len: usize,
    waiting_to_send: usize,
    waiting_to_receive: usize,
    link: SetLink,
}

/// Ring buffer control block plus its storage.
pub struct RingbufObject<R: Region> {
    handle: Handle,
    kind: RingbufType,
    size: usize,
    max_item_size: usize,
    storage: UnsafeCell<R>,
    state: CriticalSection<RingState>,
    not_empty: WaitList,
    space_freed: WaitList,
}

// Safety: the storage is only touched with the critical section held, apart
// from the payload of items lent out, which the buffer does not touch until
// they are returned.
unsafe impl<R: Region> Sync for RingbufObject<R> {}

impl<R: Region> RingbufObject<R> {
    /// Creates a ring buffer of `size` bytes (`xRingbufferCreate`).
    pub fn create(region: R, kind: RingbufType, size: usize) -> Result<Self> {
        let usable = kind.usable_size(size);
        let max_item_size = kind.max_item_size(size);
        let result = if max_item_size == 0 {
            Err(Error::InvalidParameter)
        } else if region.len() < usable {
            Err(Error::BufferTooSmall {
                required: usable,
                provided: region.len(),
            })
        } else {
            Ok(())
        };
        if let Err(error) = result {
            trace::trace_create_failed(ObjectKind::RingBuffer, &error);
            return Err(error);
        }

        let handle = registry::allocate();
        trace::trace_create(ObjectKind::RingBuffer, handle, usable);
        Ok(Self {
            handle,
            kind,
            size: usable,
            max_item_size,
            storage: UnsafeCell::new(region),
            state: CriticalSection::new(RingState {
                write: 0,
                read: 0,
                free: 0,
                used: 0,
                items_waiting: 0,
                acquired: 0,
                byte_item_len: 0,
                waiting_to_send: 0,
                waiting_to_receive: 0,
                link: SetLink::default(),
            }),
            not_empty: WaitList::new(),
            space_freed: WaitList::new(),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn kind(&self) -> RingbufType {
        self.kind
    }

    /// Usable size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Largest item `send` accepts (`xRingbufferGetMaxItemSize`).
    pub fn max_item_size(&self) -> usize {
        self.max_item_size
    }

    // =========================================================================
    // Storage access (critical section held)
    // =========================================================================

    fn base(&self) -> *mut u8 {
        // Safety: the region is alive as long as self.
        unsafe { R::base(self.storage.get()) }
    }

    fn copy_in(&self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.size);
        // Safety: inside the region, and not lent out (free space).
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), self.base().add(offset), data.len()) };
    }

    fn header(&self, offset: usize) -> (usize, u32) {
        let mut raw = [0u8; HEADER];
        // Safety: headers lie inside the region; the caller holds the lock.
        unsafe { ptr::copy_nonoverlapping(self.base().add(offset), raw.as_mut_ptr(), HEADER) };
        let len = u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        let flags = u32::from_ne_bytes([raw[4], raw[5], raw[6], raw[7]]);
        (len, flags)
    }

    fn set_header(&self, offset: usize, len: usize, flags: u32) {
        let mut raw = [0u8; HEADER];
        raw[..4].copy_from_slice(&(len as u32).to_ne_bytes());
        raw[4..].copy_from_slice(&flags.to_ne_bytes());
        self.copy_in(offset, &raw);
    }

    fn add_flags(&self, offset: usize, flags: u32) {
        let (len, current) = self.header(offset);
        self.set_header(offset, len, current | flags);
    }

    /// Lends out `len` bytes at `offset`.
    fn lend<'a>(&'a self, offset: usize, len: usize) -> RingItem<'a> {
        // Safety: the bytes were written by a send and are not touched again
        // until the item is returned.
        let data = unsafe { slice::from_raw_parts(self.base().add(offset), len) };
        RingItem { data, offset }
    }

    fn wrap(&self, position: usize) -> usize {
        if position >= self.size {
            position - self.size
        } else {
            position
        }
    }

    /// Free bytes at the write position, and at the start of the buffer if
    /// the writer may wrap there.
    fn contiguous_space(&self, state: &RingState) -> (usize, usize) {
        if state.used == self.size {
            (0, 0)
        } else if state.write > state.free || (state.write == state.free && state.used == 0) {
            (self.size - state.write, state.free)
        } else {
            (state.free - state.write, 0)
        }
    }

    /// Skips the bytes from the write position to the end of the buffer.
    fn skip_to_start(&self, state: &mut RingState, tail: usize) {
        if tail >= HEADER {
            self.set_header(state.write, 0, FLAG_WRAP_DUMMY);
        }
        // A reader that has caught up must not rest on the skipped bytes.
        if state.read == state.write {
            state.read = 0;
        }
        state.used += tail;
        state.write = 0;
    }

    fn write_entry(&self, state: &mut RingState, data: &[u8], flags: u32) {
        let entry = HEADER + align_up(data.len());
        self.set_header(state.write, data.len(), flags);
        self.copy_in(state.write + HEADER, data);
        state.used += entry;
        state.write = self.wrap(state.write + entry);
    }

    /// Stores one item if there is room for it right now.
    fn try_write(&self, state: &mut RingState, data: &[u8]) -> bool {
        match self.kind {
            RingbufType::Byte => {
                if self.size - state.used < data.len() {
                    return false;
                }
                let first = data.len().min(self.size - state.write);
                self.copy_in(state.write, &data[..first]);
                self.copy_in(0, &data[first..]);
                state.used += data.len();
                state.write = self.wrap(state.write + data.len());
                true
            }
            RingbufType::NoSplit => {
                let entry = HEADER + align_up(data.len());
                let (tail, head) = self.contiguous_space(state);
                if entry <= tail {
                    self.write_entry(state, data, 0);
                } else if entry <= head {
                    self.skip_to_start(state, tail);
                    self.write_entry(state, data, 0);
                } else {
                    return false;
                }
                true
            }
            RingbufType::AllowSplit => {
                let entry = HEADER + align_up(data.len());
                let (tail, head) = self.contiguous_space(state);
                if entry <= tail {
                    self.write_entry(state, data, 0);
                } else if head > 0 && tail >= HEADER + RINGBUF_ALIGNMENT {
                    let first = tail - HEADER;
                    let second = HEADER + align_up(data.len() - first);
                    if second > head {
                        return false;
                    }
                    self.write_entry(state, &data[..first], FLAG_SPLIT);
                    config_assert(state.write == 0);
                    self.write_entry(state, &data[first..], 0);
                } else if entry <= head {
                    self.skip_to_start(state, tail);
                    self.write_entry(state, data, 0);
                } else {
                    return false;
                }
                true
            }
        }
    }

    /// Moves the read position past skipped bytes at the end of the buffer.
    ///
    /// Only called while an entry follows the read position, so the bytes
    /// there are a header written by the current lap.
    fn skip_wrap_at_read(&self, state: &mut RingState) {
        if self.size - state.read < HEADER {
            state.read = 0;
        } else if self.header(state.read).1 & FLAG_WRAP_DUMMY != 0 {
            state.read = 0;
        }
    }

    /// Takes the entry at the read position, returning its payload span.
    ///
    /// The read position always rests on a real header: skipped bytes are
    /// passed here, or in `skip_to_start` when the writer wraps later. This
    /// keeps `advance_free` from reclaiming a wrap dummy the reader still
    /// has to pass.
    fn take_entry(&self, state: &mut RingState) -> (usize, usize, u32) {
        let at = state.read;
        let (len, flags) = self.header(at);
        config_assert(flags & FLAG_WRAP_DUMMY == 0 && HEADER + align_up(len) <= self.size - at);
        self.add_flags(at, FLAG_ACQUIRED);
        state.acquired += 1;
        state.read = self.wrap(at + HEADER + align_up(len));
        if state.read != state.write {
            self.skip_wrap_at_read(state);
        }
        (at + HEADER, len, flags)
    }

    /// Reclaims returned items from the oldest forwards.
    fn advance_free(&self, state: &mut RingState) {
        while state.used > 0 {
            let tail = self.size - state.free;
            let skipped = if tail < HEADER {
                tail
            } else {
                let (len, flags) = self.header(state.free);
                if flags & FLAG_WRAP_DUMMY != 0 {
                    tail
                } else if flags & FLAG_RETURNED != 0 {
                    HEADER + align_up(len)
                } else {
                    break;
                }
            };
            state.used -= skipped;
            state.free = self.wrap(state.free + skipped);
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    fn check_send(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidParameter);
        }
        if data.len() > self.max_item_size {
            return Err(Error::ItemTooLarge {
                size: data.len(),
                max: self.max_item_size,
            });
        }
        Ok(())
    }

    /// Stores an item and announces it. Returns `true` if a task was woken.
    fn sent_locked(&self, state: &mut RingState, len: usize) -> bool {
        state.items_waiting += match self.kind {
            RingbufType::Byte => len,
            _ => 1,
        };
        let mut woken = state.waiting_to_receive > 0;
        woken |= state.link.notify(self.handle);
        self.not_empty.wake_all();
        woken
    }

    /// Sends an item, waiting up to `ticks` for room (`xRingbufferSend`).
    pub fn send(&self, data: &[u8], ticks: TickType) -> Result<()> {
        self.check_send(data)?;
        let deadline = Deadline::after(ticks);
        let mut state = self.state.enter();
        loop {
            if self.try_write(&mut state, data) {
                self.sent_locked(&mut state, data.len());
                return Ok(());
            }
            if deadline.is_immediate() {
                return Err(Error::Full);
            }
            state.waiting_to_send += 1;
            let (guard, timed_out) = self.space_freed.wait(state, &deadline);
            state = guard;
            state.waiting_to_send -= 1;
            if timed_out {
                if self.try_write(&mut state, data) {
                    self.sent_locked(&mut state, data.len());
                    return Ok(());
                }
                return Err(Error::Timeout);
            }
        }
    }

    /// Interrupt-safe send (`xRingbufferSendFromISR`).
    pub fn send_from_isr(&self, data: &[u8], woken: &mut bool) -> Result<()> {
        self.check_send(data)?;
        let mut state = self.state.enter();
        if !self.try_write(&mut state, data) {
            return Err(Error::Full);
        }
        *woken |= self.sent_locked(&mut state, data.len());
        Ok(())
    }

    /// Waits up to `ticks` until `ready` holds.
    fn wait_until<'a>(
        &'a self,
        ticks: TickType,
        ready: impl Fn(&RingState) -> Result<bool>,
    ) -> Result<CriticalGuard<'a, RingState>> {
        let deadline = Deadline::after(ticks);
        let mut state = self.state.enter();
        loop {
            if ready(&*state)? {
                return Ok(state);
            }
            if deadline.is_immediate() {
                return Err(Error::Empty);
            }
            state.waiting_to_receive += 1;
            let (guard, timed_out) = self.not_empty.wait(state, &deadline);
            state = guard;
            state.waiting_to_receive -= 1;
            if timed_out && !ready(&*state)? {
                return Err(Error::Timeout);
            }
        }
    }

    fn byte_ready(state: &RingState) -> Result<bool> {
        if state.acquired > 0 {
            return Err(Error::Busy);
        }
        Ok(state.items_waiting > 0)
    }

    fn take_bytes<'a>(&'a self, state: &mut RingState, max: usize) -> RingItem<'a> {
        let len = state.items_waiting.min(self.size - state.read).min(max);
        let at = state.read;
        state.read = self.wrap(at + len);
        state.items_waiting -= len;
        state.link.settle(self.handle, state.items_waiting);
        state.acquired = 1;
        state.byte_item_len = len;
        self.lend(at, len)
    }

    fn take_item<'a>(&'a self, state: &mut RingState) -> RingItem<'a> {
        let (at, len, _) = self.take_entry(state);
        state.items_waiting -= 1;
        state.link.settle(self.handle, state.items_waiting);
        self.lend(at, len)
    }

    fn take_split<'a>(&'a self, state: &mut RingState) -> (RingItem<'a>, Option<RingItem<'a>>) {
        let (at, len, flags) = self.take_entry(state);
        state.items_waiting -= 1;
        state.link.settle(self.handle, state.items_waiting);
        let head = self.lend(at, len);
        let tail = if flags & FLAG_SPLIT != 0 {
            let (at, len, _) = self.take_entry(state);
            Some(self.lend(at, len))
        } else {
            None
        };
        (head, tail)
    }

    /// Receives the next item, waiting up to `ticks` (`xRingbufferReceive`).
    ///
    /// A byte buffer hands out all contiguous bytes waiting. Allow-split
    /// buffers must use [`receive_split`](Self::receive_split).
    pub fn receive(&self, ticks: TickType) -> Result<RingItem<'_>> {
        match self.kind {
            RingbufType::Byte => self.receive_up_to(usize::MAX, ticks),
            RingbufType::AllowSplit => Err(Error::InvalidParameter),
            RingbufType::NoSplit => {
                let mut state = self.wait_until(ticks, |s| Ok(s.items_waiting > 0))?;
                Ok(self.take_item(&mut state))
            }
        }
    }

    /// Receives the next item of an allow-split buffer as one or two parts
    /// (`xRingbufferReceiveSplit`).
    pub fn receive_split(&self, ticks: TickType) -> Result<(RingItem<'_>, Option<RingItem<'_>>)> {
        if self.kind != RingbufType::AllowSplit {
            return Err(Error::InvalidParameter);
        }
        let mut state = self.wait_until(ticks, |s| Ok(s.items_waiting > 0))?;
        Ok(self.take_split(&mut state))
    }

    /// Receives at most `max` bytes from a byte buffer
    /// (`xRingbufferReceiveUpTo`).
    pub fn receive_up_to(&self, max: usize, ticks: TickType) -> Result<RingItem<'_>> {
        if self.kind != RingbufType::Byte || max == 0 {
            return Err(Error::InvalidParameter);
        }
        let mut state = self.wait_until(ticks, Self::byte_ready)?;
        Ok(self.take_bytes(&mut state, max))
    }

    /// Interrupt-safe receive (`xRingbufferReceiveFromISR`).
    pub fn receive_from_isr(&self) -> Result<RingItem<'_>> {
        match self.kind {
            RingbufType::Byte => self.receive_up_to_from_isr(usize::MAX),
            RingbufType::AllowSplit => Err(Error::InvalidParameter),
            RingbufType::NoSplit => {
                let mut state = self.state.enter();
                if state.items_waiting == 0 {
                    return Err(Error::Empty);
                }
                Ok(self.take_item(&mut state))
            }
        }
    }

    /// Interrupt-safe [`receive_split`](Self::receive_split).
    pub fn receive_split_from_isr(&self) -> Result<(RingItem<'_>, Option<RingItem<'_>>)> {
        if self.kind != RingbufType::AllowSplit {
            return Err(Error::InvalidParameter);
        }
        let mut state = self.state.enter();
        if state.items_waiting == 0 {
            return Err(Error::Empty);
        }
        Ok(self.take_split(&mut state))
    }

    /// Interrupt-safe [`receive_up_to`](Self::receive_up_to).
    pub fn receive_up_to_from_isr(&self, max: usize) -> Result<RingItem<'_>> {
        if self.kind != RingbufType::Byte || max == 0 {
            return Err(Error::InvalidParameter);
        }
        let mut state = self.state.enter();
        if !Self::byte_ready(&*state)? {
            return Err(Error::Empty);
        }
        Ok(self.take_bytes(&mut state, max))
    }

    fn returned_locked(&self, state: &mut RingState, item: RingItem<'_>) -> bool {
        match self.kind {
            RingbufType::Byte => {
                config_assert(state.acquired == 1 && item.offset == state.free);
                state.acquired = 0;
                state.used -= state.byte_item_len;
                state.free = self.wrap(state.free + state.byte_item_len);
                state.byte_item_len = 0;
            }
            _ => {
                let at = item.offset - HEADER;
                let (_, flags) = self.header(at);
                config_assert(flags & FLAG_ACQUIRED != 0 && flags & FLAG_RETURNED == 0);
                self.add_flags(at, FLAG_RETURNED);
                state.acquired -= 1;
                self.advance_free(state);
            }
        }
        self.space_freed.wake_all();
        state.waiting_to_send > 0
    }

    /// Hands a received item back (`vRingbufferReturnItem`).
    pub fn return_item(&self, item: RingItem<'_>) {
        let mut state = self.state.enter();
        self.returned_locked(&mut state, item);
    }

    /// Interrupt-safe [`return_item`](Self::return_item).
    pub fn return_item_from_isr(&self, item: RingItem<'_>, woken: &mut bool) {
        let mut state = self.state.enter();
        *woken |= self.returned_locked(&mut state, item);
    }

    /// Largest item that can be sent without blocking
    /// (`xRingbufferGetCurFreeSize`).
    pub fn free_size(&self) -> usize {
        let state = self.state.enter();
        let (tail, head) = self.contiguous_space(&state);
        let largest = match self.kind {
            RingbufType::Byte => self.size - state.used,
            RingbufType::NoSplit => tail.max(head).saturating_sub(HEADER),
            RingbufType::AllowSplit => {
                let split = if head > 0 && tail >= HEADER + RINGBUF_ALIGNMENT {
                    (tail - HEADER) + head.saturating_sub(HEADER)
                } else {
                    0
                };
                split.max(tail.max(head).saturating_sub(HEADER))
            }
        };
        largest.min(self.max_item_size)
    }

    /// Items sent and not yet received; bytes for a byte buffer.
    pub fn items_waiting(&self) -> usize {
        self.state.enter().items_waiting
    }

    /// Bytes held by items not yet returned, skipped bytes included.
    pub fn bytes_used(&self) -> usize {
        self.state.enter().used
    }
}

impl<R: Region> Member for RingbufObject<R> {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn event_cost(&self) -> usize {
        self.kind.max_items(self.size)
    }

    fn attach(&self, set: &Arc<SetShared>) -> Result<()> {
        let cost = self.event_cost();
        let mut state = self.state.enter();
        let holds_events = state.items_waiting > 0;
        state.link.attach(set, self.handle, cost, holds_events)
    }

    fn detach(&self, set: &Arc<SetShared>) -> Result<()> {
        let cost = self.event_cost();
        let mut state = self.state.enter();
        let holds_events = state.items_waiting > 0;
        state.link.detach(set, self.handle, cost, holds_events)
    }
}

impl<R: Region> Drop for RingbufObject<R> {
    fn drop(&mut self) {
        let cost = self.event_cost();
        self.state.enter().link.release(self.handle, cost);
        registry::release(self.handle);
        trace::trace_delete(ObjectKind::RingBuffer, self.handle);
    }
}
