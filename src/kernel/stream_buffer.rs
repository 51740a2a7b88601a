/*
 * FreeRTOS Kernel <DEVELOPMENT BRANCH>
 * Copyright (C) 2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
 *
 * SPDX-License-Identifier: MIT
 */

//! Stream and message buffers
//!
//! Both are circular byte buffers of exactly `size` bytes.
//!
//! A **stream buffer** carries a byte stream with no boundaries. A send
//! writes as many bytes as fit; a receive takes as many as are waiting. A
//! task blocked in `receive` on an empty buffer is released once the trigger
//! level is reached, or with whatever arrived when its timeout expires.
//!
//! A **message buffer** carries whole messages. Each is stored behind a
//! little-endian length prefix of `MESSAGE_LENGTH_PREFIX_SIZE` bytes, which
//! counts towards the bytes available. A message is sent whole or not at all,
//! and received whole or not at all.

use core::cell::UnsafeCell;
use core::ptr;
use std::sync::Arc;

use super::queue_set::{Member, SetLink, SetShared};
use super::{registry, Error, Result};
use crate::config::MESSAGE_LENGTH_PREFIX_SIZE;
use crate::memory::Region;
use crate::port::{CriticalGuard, CriticalSection, Deadline, WaitList};
use crate::trace::{self, ObjectKind};
use crate::types::{Handle, TickType};

const PREFIX: usize = MESSAGE_LENGTH_PREFIX_SIZE;

/// Stream or message semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Stream,
    Message,
}

impl StreamKind {
    fn object_kind(self) -> ObjectKind {
        match self {
            StreamKind::Stream => ObjectKind::StreamBuffer,
            StreamKind::Message => ObjectKind::MessageBuffer,
        }
    }

    /// Most sends a buffer of `size` bytes can hold at once.
    pub const fn max_items(self, size: usize) -> usize {
        match self {
            StreamKind::Stream => size,
            StreamKind::Message => size / (PREFIX + 1),
        }
    }
}

struct StreamState {
    head: usize,
    count: usize,
    /// Whole messages waiting; unused by stream buffers.
    messages: usize,
    trigger: usize,
    waiting_to_send: usize,
    waiting_to_receive: usize,
    link: SetLink,
}

/// Stream buffer control block plus its storage.
pub struct StreamBufferObject<R: Region> {
    handle: Handle,
    kind: StreamKind,
    size: usize,
    storage: UnsafeCell<R>,
    state: CriticalSection<StreamState>,
    data_available: WaitList,
    space_available: WaitList,
}

// Safety: the storage is only touched with the critical section held.
unsafe impl<R: Region> Sync for StreamBufferObject<R> {}

impl<R: Region> StreamBufferObject<R> {
    /// Creates a stream buffer (`xStreamBufferCreate`). A trigger level of
    /// 0 is treated as 1.
    pub fn create_stream(region: R, size: usize, trigger: usize) -> Result<Self> {
        Self::create(region, StreamKind::Stream, size, trigger.max(1))
    }

    /// Creates a message buffer (`xMessageBufferCreate`).
    pub fn create_message(region: R, size: usize) -> Result<Self> {
        Self::create(region, StreamKind::Message, size, 1)
    }

    fn create(region: R, kind: StreamKind, size: usize, trigger: usize) -> Result<Self> {
        let result = if size == 0 || (kind == StreamKind::Message && size <= PREFIX) {
            Err(Error::InvalidParameter)
        } else if trigger > size {
            Err(Error::InvalidParameter)
        } else if region.len() < size {
            Err(Error::BufferTooSmall {
                required: size,
                provided: region.len(),
            })
        } else {
            Ok(())
        };
        if let Err(error) = result {
            trace::trace_create_failed(kind.object_kind(), &error);
            return Err(error);
        }

        let handle = registry::allocate();
        trace::trace_create(kind.object_kind(), handle, size);
        Ok(Self {
            handle,
            kind,
            size,
            storage: UnsafeCell::new(region),
            state: CriticalSection::new(StreamState {
                head: 0,
                count: 0,
                messages: 0,
                trigger,
                waiting_to_send: 0,
                waiting_to_receive: 0,
                link: SetLink::default(),
            }),
            data_available: WaitList::new(),
            space_available: WaitList::new(),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.size
    }

    // =========================================================================
    // Storage access (critical section held)
    // =========================================================================

    fn base(&self) -> *mut u8 {
        // Safety: the region is alive as long as self.
        unsafe { R::base(self.storage.get()) }
    }

    /// Copies `data` in at logical position `at` past the head, wrapping.
    fn write_at(&self, state: &StreamState, at: usize, data: &[u8]) {
        let start = (state.head + at) % self.size;
        let first = data.len().min(self.size - start);
        // Safety: both spans are inside the region, in its free part.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.base().add(start), first);
            ptr::copy_nonoverlapping(data[first..].as_ptr(), self.base(), data.len() - first);
        }
    }

    /// Copies bytes out from logical position `at` past the head, wrapping.
    fn read_at(&self, state: &StreamState, at: usize, out: &mut [u8]) {
        let start = (state.head + at) % self.size;
        let first = out.len().min(self.size - start);
        // Safety: both spans are inside the region, in its used part.
        unsafe {
            ptr::copy_nonoverlapping(self.base().add(start), out.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(self.base(), out[first..].as_mut_ptr(), out.len() - first);
        }
    }

    /// Units a set may have pending for this buffer: bytes, or messages.
    fn units_held(&self, state: &StreamState) -> usize {
        match self.kind {
            StreamKind::Stream => state.count,
            StreamKind::Message => state.messages,
        }
    }

    fn consume(&self, state: &mut StreamState, len: usize) -> bool {
        state.head = (state.head + len) % self.size;
        state.count -= len;
        let held = self.units_held(state);
        state.link.settle(self.handle, held);
        self.space_available.wake_all();
        state.waiting_to_send > 0
    }

    fn message_length(&self, state: &StreamState) -> usize {
        let mut prefix = [0u8; PREFIX];
        self.read_at(state, 0, &mut prefix);
        u32::from_le_bytes(prefix) as usize
    }

    /// Bytes a send of `len` bytes must find free before it may proceed.
    fn space_needed(&self, len: usize) -> usize {
        match self.kind {
            StreamKind::Stream => len.min(self.size),
            StreamKind::Message => len + PREFIX,
        }
    }

    /// Writes what the current free space allows. Returns bytes written and
    /// whether a task was woken.
    fn write_locked(&self, state: &mut StreamState, data: &[u8]) -> (usize, bool) {
        let space = self.size - state.count;
        let written = match self.kind {
            StreamKind::Stream => {
                let len = data.len().min(space);
                self.write_at(state, state.count, &data[..len]);
                state.count += len;
                len
            }
            StreamKind::Message => {
                if space < data.len() + PREFIX {
                    return (0, false);
                }
                let prefix = (data.len() as u32).to_le_bytes();
                self.write_at(state, state.count, &prefix);
                self.write_at(state, state.count + PREFIX, data);
                state.count += PREFIX + data.len();
                state.messages += 1;
                data.len()
            }
        };
        if written == 0 {
            return (0, false);
        }
        let mut woken = state.waiting_to_receive > 0;
        woken |= state.link.notify(self.handle);
        self.data_available.wake_all();
        (written, woken)
    }

    /// Reads from a non-empty buffer. Returns bytes read and whether a task
    /// was woken.
    fn read_locked(&self, state: &mut StreamState, out: &mut [u8]) -> Result<(usize, bool)> {
        match self.kind {
            StreamKind::Stream => {
                let len = out.len().min(state.count);
                self.read_at(state, 0, &mut out[..len]);
                let woken = self.consume(state, len);
                Ok((len, woken))
            }
            StreamKind::Message => {
                let len = self.message_length(state);
                if out.len() < len {
                    return Err(Error::BufferTooSmall {
                        required: len,
                        provided: out.len(),
                    });
                }
                self.read_at(state, PREFIX, &mut out[..len]);
                state.messages -= 1;
                let woken = self.consume(state, PREFIX + len);
                Ok((len, woken))
            }
        }
    }

    fn check_send(&self, data: &[u8]) -> Result<()> {
        if self.kind == StreamKind::Message {
            if data.is_empty() {
                return Err(Error::InvalidParameter);
            }
            if data.len() + PREFIX > self.size {
                return Err(Error::ItemTooLarge {
                    size: data.len(),
                    max: self.size - PREFIX,
                });
            }
        }
        Ok(())
    }

    fn block<'a>(
        &self,
        list: &WaitList,
        mut state: CriticalGuard<'a, StreamState>,
        deadline: &Deadline,
        sending: bool,
    ) -> (CriticalGuard<'a, StreamState>, bool) {
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
    // Operations
    // =========================================================================

    /// Sends bytes, waiting up to `ticks` for space (`xStreamBufferSend`).
    ///
    /// A stream send returns the bytes written, which may be fewer than
    /// `data.len()`. A message send writes the whole message or nothing.
    pub fn send(&self, data: &[u8], ticks: TickType) -> Result<usize> {
        self.check_send(data)?;
        if data.is_empty() {
            return Ok(0);
        }
        let needed = self.space_needed(data.len());
        let deadline = Deadline::after(ticks);
        let mut state = self.state.enter();
        loop {
            if self.size - state.count >= needed {
                break;
            }
            if deadline.is_immediate() {
                break;
            }
            let (guard, timed_out) = self.block(&self.space_available, state, &deadline, true);
            state = guard;
            if timed_out {
                break;
            }
        }
        match self.write_locked(&mut state, data) {
            (0, _) if deadline.is_immediate() => Err(Error::Full),
            (0, _) => Err(Error::Timeout),
            (written, _) => Ok(written),
        }
    }

    /// Interrupt-safe send (`xStreamBufferSendFromISR`).
    pub fn send_from_isr(&self, data: &[u8], woken: &mut bool) -> Result<usize> {
        self.check_send(data)?;
        if data.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.enter();
        match self.write_locked(&mut state, data) {
            (0, _) => Err(Error::Full),
            (written, task_woken) => {
                *woken |= task_woken;
                Ok(written)
            }
        }
    }

    /// Receives into `out`, waiting up to `ticks` (`xStreamBufferReceive`).
    ///
    /// Returns at once if anything is waiting. On an empty stream buffer the
    /// call waits for the trigger level, then takes whatever has arrived
    /// when the timeout expires.
    pub fn receive(&self, out: &mut [u8], ticks: TickType) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let deadline = Deadline::after(ticks);
        let mut state = self.state.enter();
        if state.count == 0 {
            loop {
                if deadline.is_immediate() {
                    return Err(Error::Empty);
                }
                let (guard, timed_out) =
                    self.block(&self.data_available, state, &deadline, false);
                state = guard;
                if state.count >= state.trigger || (timed_out && state.count > 0) {
                    break;
                }
                if timed_out {
                    return Err(Error::Timeout);
                }
            }
        }
        self.read_locked(&mut state, out).map(|(len, _)| len)
    }

    /// Interrupt-safe receive (`xStreamBufferReceiveFromISR`).
    pub fn receive_from_isr(&self, out: &mut [u8], woken: &mut bool) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.enter();
        if state.count == 0 {
            return Err(Error::Empty);
        }
        let (len, task_woken) = self.read_locked(&mut state, out)?;
        *woken |= task_woken;
        Ok(len)
    }

    /// Empties the buffer (`xStreamBufferReset`). Fails while tasks are
    /// blocked on it.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.enter();
        if state.waiting_to_send > 0 || state.waiting_to_receive > 0 {
            return Err(Error::Busy);
        }
        state.head = 0;
        state.count = 0;
        state.messages = 0;
        state.link.settle(self.handle, 0);
        Ok(())
    }

    /// Changes the trigger level of a stream buffer
    /// (`xStreamBufferSetTriggerLevel`). 0 is treated as 1.
    pub fn set_trigger_level(&self, trigger: usize) -> Result<()> {
        if self.kind != StreamKind::Stream || trigger > self.size {
            return Err(Error::InvalidParameter);
        }
        self.state.enter().trigger = trigger.max(1);
        Ok(())
    }

    pub fn trigger_level(&self) -> usize {
        self.state.enter().trigger
    }

    /// Bytes waiting, length prefixes included (`xStreamBufferBytesAvailable`).
    pub fn bytes_available(&self) -> usize {
        self.state.enter().count
    }

    /// Free bytes (`xStreamBufferSpacesAvailable`).
    pub fn spaces_available(&self) -> usize {
        self.size - self.state.enter().count
    }

    /// Length of the next message, 0 when empty
    /// (`xMessageBufferNextLengthBytes`).
    pub fn next_message_length(&self) -> usize {
        let state = self.state.enter();
        if self.kind != StreamKind::Message || state.count == 0 {
            return 0;
        }
        self.message_length(&state)
    }

    pub fn is_empty(&self) -> bool {
        self.state.enter().count == 0
    }

    /// A message buffer is full once it cannot take even a 1-byte message.
    pub fn is_full(&self) -> bool {
        let spaces = self.spaces_available();
        match self.kind {
            StreamKind::Stream => spaces == 0,
            StreamKind::Message => spaces <= PREFIX,
        }
    }
}

impl<R: Region> Member for StreamBufferObject<R> {
    fn handle(&self) -> Handle {
        self.handle
    }

    fn event_cost(&self) -> usize {
        self.kind.max_items(self.size)
    }

    fn attach(&self, set: &Arc<SetShared>) -> Result<()> {
        let cost = self.event_cost();
        let mut state = self.state.enter();
        let holds_events = state.count > 0;
        state.link.attach(set, self.handle, cost, holds_events)
    }

    fn detach(&self, set: &Arc<SetShared>) -> Result<()> {
        let cost = self.event_cost();
        let mut state = self.state.enter();
        let holds_events = state.count > 0;
        state.link.detach(set, self.handle, cost, holds_events)
    }
}

impl<R: Region> Drop for StreamBufferObject<R> {
    fn drop(&mut self) {
        let cost = self.event_cost();
        self.state.enter().link.release(self.handle, cost);
        registry::release(self.handle);
        trace::trace_delete(self.kind.object_kind(), self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{HeapBlock, Static};
    use crate::types::MAX_DELAY;

    fn stream(size: usize, trigger: usize) -> StreamBufferObject<HeapBlock> {
        let region = HeapBlock::allocate(size).expect("heap");
        StreamBufferObject::create_stream(region, size, trigger).expect("stream buffer")
    }

    fn message(size: usize) -> StreamBufferObject<HeapBlock> {
        let region = HeapBlock::allocate(size).expect("heap");
        StreamBufferObject::create_message(region, size).expect("message buffer")
    }

    #[test]
    fn invalid_sizes_are_rejected() {
        let region = Static::<4>::region::<u8>();
        assert!(StreamBufferObject::create_message(region, 4).is_err());
        let region = Static::<4>::region::<u8>();
        assert!(StreamBufferObject::create_stream(region, 4, 5).is_err());
        let region = Static::<4>::region::<u8>();
        assert_eq!(
            StreamBufferObject::create_stream(region, 8, 1).err(),
            Some(Error::BufferTooSmall {
                required: 8,
                provided: 4
            })
        );
    }

    #[test]
    fn stream_round_trip_keeps_counters_consistent() {
        let sb = stream(100, 5);
        assert_eq!(sb.send(b"123456789\0", 0), Ok(10));
        assert_eq!(sb.bytes_available() + sb.spaces_available(), 100);
        assert_eq!(sb.spaces_available(), 90);
        let mut out = [0u8; 10];
        assert_eq!(sb.receive(&mut out, 0), Ok(10));
        assert_eq!(&out, b"123456789\0");
        assert!(sb.is_empty());
    }

    #[test]
    fn stream_send_is_partial_when_short_of_space() {
        let sb = stream(8, 1);
        assert_eq!(sb.send(&[1u8; 6], 0), Ok(6));
        assert_eq!(sb.send(&[2u8; 6], 0), Ok(2));
        assert!(sb.is_full());
        assert_eq!(sb.send(&[3u8; 1], 0), Err(Error::Full));
        assert_eq!(sb.send(&[3u8; 1], 2), Err(Error::Timeout));
    }

    #[test]
    fn stream_wraps_around() {
        let sb = stream(8, 1);
        let mut out = [0u8; 8];
        for round in 0..4u8 {
            let data = [round; 5];
            assert_eq!(sb.send(&data, 0), Ok(5));
            assert_eq!(sb.receive(&mut out, 0), Ok(5));
            assert_eq!(&out[..5], &data);
        }
    }

    #[test]
    fn receive_below_trigger_returns_what_is_there() {
        let sb = stream(100, 5);
        assert_eq!(sb.send(b"12", 0), Ok(2));
        let mut out = [0u8; 10];
        assert_eq!(sb.receive(&mut out, MAX_DELAY), Ok(2));
    }

    #[test]
    fn blocked_receiver_waits_for_trigger() {
        let sb = stream(100, 4);
        std::thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut out = [0u8; 16];
                sb.receive(&mut out, MAX_DELAY)
            });
            while sb.state.enter().waiting_to_receive == 0 {
                std::thread::yield_now();
            }
            assert_eq!(sb.send(b"ab", 0), Ok(2));
            assert_eq!(sb.send(b"cd", 0), Ok(2));
            let received = reader.join().expect("reader").expect("bytes");
            assert!(received >= 4, "reader released at the trigger level");
        });
    }

    #[test]
    fn blocked_receiver_takes_partial_data_on_timeout() {
        let sb = stream(100, 50);
        std::thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut out = [0u8; 16];
                sb.receive(&mut out, 20)
            });
            while sb.state.enter().waiting_to_receive == 0 {
                std::thread::yield_now();
            }
            assert_eq!(sb.send(b"abc", 0), Ok(3));
            assert_eq!(reader.join().expect("reader"), Ok(3));
        });
    }

    #[test]
    fn trigger_level_bounds() {
        let sb = stream(100, 5);
        assert_eq!(sb.set_trigger_level(2), Ok(()));
        assert_eq!(sb.set_trigger_level(200), Err(Error::InvalidParameter));
        assert_eq!(sb.set_trigger_level(0), Ok(()));
        assert_eq!(sb.trigger_level(), 1);
        assert_eq!(message(100).set_trigger_level(2), Err(Error::InvalidParameter));
    }

    #[test]
    fn message_counts_its_prefix() {
        let mb = message(100);
        assert_eq!(mb.send(b"123456789\0", 0), Ok(10));
        assert_eq!(mb.bytes_available(), 14);
        assert_eq!(mb.spaces_available(), 86);
        assert_eq!(mb.next_message_length(), 10);
        let mut out = [0u8; 10];
        assert_eq!(mb.receive(&mut out, 0), Ok(10));
        assert!(mb.is_empty());
    }

    #[test]
    fn messages_keep_their_boundaries() {
        let mb = message(32);
        mb.send(b"one", 0).expect("first");
        mb.send(b"three", 0).expect("second");
        let mut out = [0u8; 16];
        assert_eq!(mb.receive(&mut out, 0), Ok(3));
        assert_eq!(&out[..3], b"one");
        assert_eq!(mb.receive(&mut out, 0), Ok(5));
        assert_eq!(&out[..5], b"three");
    }

    #[test]
    fn message_too_large_for_destination_stays() {
        let mb = message(32);
        mb.send(b"hello", 0).expect("send");
        let mut small = [0u8; 2];
        assert_eq!(
            mb.receive(&mut small, 0),
            Err(Error::BufferTooSmall {
                required: 5,
                provided: 2
            })
        );
        assert_eq!(mb.next_message_length(), 5);
    }

    #[test]
    fn message_is_all_or_nothing() {
        let mb = message(16);
        assert_eq!(
            mb.send(&[0u8; 13], 0),
            Err(Error::ItemTooLarge { size: 13, max: 12 })
        );
        mb.send(&[1u8; 8], 0).expect("send");
        assert_eq!(mb.send(&[2u8; 2], 0), Err(Error::Full));
        assert_eq!(mb.bytes_available(), 12);
        assert!(mb.is_full());
    }

    #[test]
    fn reset_refuses_while_tasks_wait() {
        let sb = stream(16, 1);
        std::thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut out = [0u8; 4];
                sb.receive(&mut out, MAX_DELAY)
            });
            while sb.state.enter().waiting_to_receive == 0 {
                std::thread::yield_now();
            }
            assert_eq!(sb.reset(), Err(Error::Busy));
            sb.send(b"x", 0).expect("send");
            assert_eq!(reader.join().expect("reader"), Ok(1));
        });
        assert_eq!(sb.reset(), Ok(()));
    }
}
