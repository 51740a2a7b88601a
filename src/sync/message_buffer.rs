//! Message buffer wrapper
//!
//! Each send is one message and each receive takes exactly one message.
//! Every message costs `MESSAGE_LENGTH_PREFIX_SIZE` bytes of buffer space on
//! top of its own length, and those bytes count towards
//! `available_bytes()`.

use crate::kernel::queue_set::Member;
use crate::kernel::stream_buffer::StreamBufferObject;
use crate::memory::{Allocation, Dynamic, External, Static};
use crate::port::InterruptContext;
use crate::types::{Handle, TickType};

use super::waitable::{build, cost_of, handle_of, sealed, SetMember, Waitable};

/// A message buffer (`xMessageBufferCreate`).
///
/// # Example
///
/// ```ignore
/// let mailbox = MessageBuffer::<Static<64>>::new();
/// mailbox.send(b"ping", NO_WAIT);
///
/// let mut out = [0u8; 16];
/// let len = mailbox.receive(&mut out, MAX_DELAY);
/// assert_eq!(&out[..len], b"ping");
/// ```
pub struct MessageBuffer<A: Allocation<u8> = Dynamic> {
    object: Option<StreamBufferObject<A::Region>>,
}

impl MessageBuffer<Dynamic> {
    pub fn new(size: usize) -> Self {
        Self {
            object: build(Dynamic::region(size), |region| {
                StreamBufferObject::create_message(region, size)
            }),
        }
    }
}

impl<const N: usize> MessageBuffer<Static<N>> {
    pub fn new() -> Self {
        Self {
            object: build(Ok(Static::<N>::region::<u8>()), |region| {
                StreamBufferObject::create_message(region, N)
            }),
        }
    }
}

impl<const N: usize> Default for MessageBuffer<Static<N>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MessageBuffer<External<N>> {
    pub const REQUIRED_SIZE: usize = N;

    pub const fn new() -> Self {
        Self { object: None }
    }

    pub fn create(&mut self, buffer: &'static mut [u8]) -> bool {
        if self.object.is_some() {
            return false;
        }
        self.object = build(External::<N>::region(buffer, Self::REQUIRED_SIZE), |region| {
            StreamBufferObject::create_message(region, N)
        });
        self.object.is_some()
    }
}

impl<const N: usize> Default for MessageBuffer<External<N>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocation<u8>> MessageBuffer<A> {
    /// Sends `message` whole, waiting up to `ticks` for room. Returns its
    /// length, or 0 if it was not sent.
    pub fn send(&self, message: &[u8], ticks: TickType) -> usize {
        self.object
            .as_ref()
            .and_then(|buffer| buffer.send(message, ticks).ok())
            .unwrap_or(0)
    }

    pub fn send_from_isr(&self, message: &[u8], ctx: &mut InterruptContext) -> usize {
        self.object
            .as_ref()
            .and_then(|buffer| buffer.send_from_isr(message, ctx.woken_flag()).ok())
            .unwrap_or(0)
    }

    /// Receives the next message into `out`. Returns 0, leaving the message
    /// in place, if `out` is too short for it.
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

    pub fn reset(&self) -> bool {
        self.object.as_ref().is_some_and(|buffer| buffer.reset().is_ok())
    }

    /// Length of the next message, 0 if there is none.
    pub fn next_message_size(&self) -> usize {
        self.object.as_ref().map_or(0, StreamBufferObject::next_message_length)
    }

    /// Bytes waiting, length prefixes included.
    pub fn available_bytes(&self) -> usize {
        self.object.as_ref().map_or(0, StreamBufferObject::bytes_available)
    }

    pub fn available_spaces(&self) -> usize {
        self.object.as_ref().map_or(0, StreamBufferObject::spaces_available)
    }

    pub fn is_empty(&self) -> bool {
        self.object.as_ref().is_some_and(StreamBufferObject::is_empty)
    }

    /// True once not even a 1-byte message fits.
    pub fn is_full(&self) -> bool {
        self.object.as_ref().is_some_and(StreamBufferObject::is_full)
    }

    pub fn size(&self) -> usize {
        self.object.as_ref().map_or(0, StreamBufferObject::size)
    }
}

impl<A: Allocation<u8>> Waitable for MessageBuffer<A> {
    fn handle(&self) -> Handle {
        handle_of(&self.object)
    }
}

impl<A: Allocation<u8>> sealed::Sealed for MessageBuffer<A> {}

impl<A: Allocation<u8>> SetMember for MessageBuffer<A> {
    fn event_cost(&self) -> usize {
        cost_of(&self.object)
    }

    fn member(&self) -> Option<&dyn Member> {
        self.object.as_ref().map(|buffer| buffer as &dyn Member)
    }
}

impl<A: Allocation<u8>> PartialEq<MessageBuffer<A>> for Handle {
    fn eq(&self, buffer: &MessageBuffer<A>) -> bool {
        buffer.matches(*self)
    }
}
