//! Stream buffer wrapper
//!
//! Bytes go in at one end and come out at the other, with no message
//! boundaries. Operations return the number of bytes transferred; 0 means
//! nothing was transferred before the timeout, or the buffer is not created.
//!
//! `N` in `Static<N>` and `External<N>` is the capacity in bytes.

use crate::kernel::queue_set::Member;
use crate::kernel::stream_buffer::StreamBufferObject;
use crate::memory::{Allocation, Dynamic, External, Static};
use crate::port::InterruptContext;
use crate::types::{Handle, TickType};

use super::waitable::{build, cost_of, handle_of, sealed, SetMember, Waitable};

/// A stream buffer (`xStreamBufferCreate`).
///
/// A task blocked in `receive` on an empty buffer wakes once the trigger
/// level is reached, or when its timeout expires with fewer bytes waiting.
pub struct StreamBuffer<A: Allocation<u8> = Dynamic> {
    object: Option<StreamBufferObject<A::Region>>,
}

impl StreamBuffer<Dynamic> {
    /// Creates a buffer of `size` bytes on the kernel heap. Fails to create
    /// if `trigger > size`.
    pub fn new(size: usize, trigger: usize) -> Self {
        Self {
            object: build(Dynamic::region(size), |region| {
                StreamBufferObject::create_stream(region, size, trigger)
            }),
        }
    }
}

impl<const N: usize> StreamBuffer<Static<N>> {
    pub fn new(trigger: usize) -> Self {
        Self {
            object: build(Ok(Static::<N>::region::<u8>()), |region| {
                StreamBufferObject::create_stream(region, N, trigger)
            }),
        }
    }
}

impl<const N: usize> StreamBuffer<External<N>> {
    pub const REQUIRED_SIZE: usize = N;

    pub const fn new() -> Self {
        Self { object: None }
    }

    /// Creates the buffer in `buffer` with a trigger level of 1.
    pub fn create(&mut self, buffer: &'static mut [u8]) -> bool {
        self.create_with_trigger(buffer, 1)
    }

    pub fn create_with_trigger(&mut self, buffer: &'static mut [u8], trigger: usize) -> bool {
        if self.object.is_some() {
            return false;
        }
        self.object = build(External::<N>::region(buffer, Self::REQUIRED_SIZE), |region| {
            StreamBufferObject::create_stream(region, N, trigger)
        });
        self.object.is_some()
    }
}

impl<const N: usize> Default for StreamBuffer<External<N>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocation<u8>> StreamBuffer<A> {
    /// Writes as much of `data` as fits, waiting up to `ticks` for room.
    pub fn send(&self, data: &[u8], ticks: TickType) -> usize {
        self.object
            .as_ref()
            .and_then(|buffer| buffer.send(data, ticks).ok())
            .unwrap_or(0)
    }

    pub fn send_from_isr(&self, data: &[u8], ctx: &mut InterruptContext) -> usize {
        self.object
            .as_ref()
            .and_then(|buffer| buffer.send_from_isr(data, ctx.woken_flag()).ok())
            .unwrap_or(0)
    }

    /// Reads up to `out.len()` bytes, waiting up to `ticks` if empty.
    pub fn receive(&self, out: &mut [u8], ticks: TickType) -> usize {
        self.object
            .as_ref()
            .and_then(|buffer| buffer.receive(out, ticks).ok())
            .unwrap_or(0)
    }

    pub fn receive_from_isr(&self, out: &mut [u8], ctx: &mut InterruptContext) -> usize {
        self.object
            .as_ref()
            .and_then(|buffer| buffer.receive_from_isr(out, ctx.woken_flag()).ok())
            .unwrap_or(0)
    }

    /// Empties the buffer. Fails while a task is blocked on it.
    pub fn reset(&self) -> bool {
        self.object.as_ref().is_some_and(|buffer| buffer.reset().is_ok())
    }

    /// Fails if `trigger` exceeds the capacity. 0 is treated as 1.
    pub fn set_trigger_level(&self, trigger: usize) -> bool {
        self.object
            .as_ref()
            .is_some_and(|buffer| buffer.set_trigger_level(trigger).is_ok())
    }

    /// Bytes waiting (`xStreamBufferBytesAvailable`).
    pub fn available_bytes(&self) -> usize {
        self.object.as_ref().map_or(0, StreamBufferObject::bytes_available)
    }

    /// Free bytes (`xStreamBufferSpacesAvailable`).
    pub fn available_spaces(&self) -> usize {
        self.object.as_ref().map_or(0, StreamBufferObject::spaces_available)
    }

    pub fn is_empty(&self) -> bool {
        self.object.as_ref().is_some_and(StreamBufferObject::is_empty)
    }

    pub fn is_full(&self) -> bool {
        self.object.as_ref().is_some_and(StreamBufferObject::is_full)
    }

    pub fn size(&self) -> usize {
        self.object.as_ref().map_or(0, StreamBufferObject::size)
    }
}

impl<A: Allocation<u8>> Waitable for StreamBuffer<A> {
    fn handle(&self) -> Handle {
        handle_of(&self.object)
    }
}

impl<A: Allocation<u8>> sealed::Sealed for StreamBuffer<A> {}

impl<A: Allocation<u8>> SetMember for StreamBuffer<A> {
    fn event_cost(&self) -> usize {
        cost_of(&self.object)
    }

    fn member(&self) -> Option<&dyn Member> {
        self.object.as_ref().map(|buffer| buffer as &dyn Member)
    }
}

impl<A: Allocation<u8>> PartialEq<StreamBuffer<A>> for Handle {
    fn eq(&self, buffer: &StreamBuffer<A>) -> bool {
        buffer.matches(*self)
    }
}
