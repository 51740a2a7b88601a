//! Ring buffer wrappers
//!
//! A received item stays in the buffer until its [`Received`] guard is
//! dropped, which hands the space back. Holding many guards at once blocks
//! senders once the buffer fills up.
//!
//! The buffer type is a type parameter:
//!
//! - [`RingBuffer`] keeps every item contiguous.
//! - [`SplitRingBuffer`] may split an item in two at the end of the buffer;
//!   the guard then has a tail part.
//! - [`ByteRingBuffer`] has no item boundaries and adds
//!   [`receive_up_to`](RingBuffer::receive_up_to).
//!
//! `N` in `Static<N>` and `External<N>` is the buffer size in bytes.
//!
//! Receiving and returning are separate steps, so two tasks sharing one
//! receiving end must serialize their receive/return pairs themselves.

use core::ops::Deref;

use crate::kernel::queue_set::Member;
use crate::kernel::ringbuf::{RingItem, RingbufObject, RingbufType};
use crate::memory::{Allocation, Dynamic, External, Region, Static};
use crate::port::InterruptContext;
use crate::types::{Handle, TickType};

use super::waitable::{build, cost_of, handle_of, sealed, SetMember, Waitable};

/// Ring buffer type markers.
pub trait RingKind: kind::Sealed + 'static {
    #[doc(hidden)]
    const TYPE: RingbufType;
}

mod kind {
    pub trait Sealed {}
}

/// Items are stored contiguously (`RINGBUF_TYPE_NOSPLIT`).
pub struct NoSplit;
/// Items may wrap around in two parts (`RINGBUF_TYPE_ALLOWSPLIT`).
pub struct AllowSplit;
/// A byte stream without item boundaries (`RINGBUF_TYPE_BYTEBUF`).
pub struct Bytes;

impl kind::Sealed for NoSplit {}
impl kind::Sealed for AllowSplit {}
impl kind::Sealed for Bytes {}

impl RingKind for NoSplit {
    const TYPE: RingbufType = RingbufType::NoSplit;
}

impl RingKind for AllowSplit {
    const TYPE: RingbufType = RingbufType::AllowSplit;
}

impl RingKind for Bytes {
    const TYPE: RingbufType = RingbufType::Byte;
}

/// An item borrowed from a ring buffer, returned on drop.
///
/// Dereferences to the first (usually only) part of the item.
#[must_use = "dropping the guard returns the item immediately"]
pub struct Received<'a, R: Region> {
    ring: &'a RingbufObject<R>,
    head: Option<RingItem<'a>>,
    tail: Option<RingItem<'a>>,
    ctx: Option<&'a mut InterruptContext>,
}

impl<'a, R: Region> Received<'a, R> {
    fn new(ring: &'a RingbufObject<R>, head: RingItem<'a>, tail: Option<RingItem<'a>>) -> Self {
        Self {
            ring,
            head: Some(head),
            tail,
            ctx: None,
        }
    }

    fn in_isr(mut self, ctx: &'a mut InterruptContext) -> Self {
        self.ctx = Some(ctx);
        self
    }

    pub fn head(&self) -> &[u8] {
        self.head.as_deref().unwrap_or_default()
    }

    /// Second part of an item split at the end of the buffer.
    pub fn tail(&self) -> Option<&[u8]> {
        self.tail.as_deref()
    }

    pub fn is_split(&self) -> bool {
        self.tail.is_some()
    }

    /// Total length of both parts.
    pub fn len(&self) -> usize {
        self.head().len() + self.tail().map_or(0, <[u8]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies both parts out as one item.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut item = self.head().to_vec();
        item.extend_from_slice(self.tail().unwrap_or_default());
        item
    }
}

impl<R: Region> Deref for Received<'_, R> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.head()
    }
}

impl<R: Region> Drop for Received<'_, R> {
    fn drop(&mut self) {
        for part in [self.head.take(), self.tail.take()].into_iter().flatten() {
            match self.ctx.as_deref_mut() {
                Some(ctx) => self.ring.return_item_from_isr(part, ctx.woken_flag()),
                None => self.ring.return_item(part),
            }
        }
    }
}

/// A ring buffer (`xRingbufferCreate`). See the [module docs](self).
pub struct RingBuffer<A: Allocation<u8> = Dynamic, K: RingKind = NoSplit> {
    object: Option<RingbufObject<A::Region>>,
    _kind: core::marker::PhantomData<K>,
}

/// A ring buffer whose items may be split at the end of the buffer.
pub type SplitRingBuffer<A = Dynamic> = RingBuffer<A, AllowSplit>;

/// A ring buffer of bytes without item boundaries.
pub type ByteRingBuffer<A = Dynamic> = RingBuffer<A, Bytes>;

impl<K: RingKind> RingBuffer<Dynamic, K> {
    /// Creates a buffer of `size` bytes on the kernel heap.
    pub fn new(size: usize) -> Self {
        Self {
            object: build(Dynamic::region(size), |region| {
                RingbufObject::create(region, K::TYPE, size)
            }),
            _kind: core::marker::PhantomData,
        }
    }
}

impl<K: RingKind, const N: usize> RingBuffer<Static<N>, K> {
    pub fn new() -> Self {
        Self {
            object: build(Ok(Static::<N>::region::<u8>()), |region| {
                RingbufObject::create(region, K::TYPE, N)
            }),
            _kind: core::marker::PhantomData,
        }
    }
}

impl<K: RingKind, const N: usize> Default for RingBuffer<Static<N>, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: RingKind, const N: usize> RingBuffer<External<N>, K> {
    pub const REQUIRED_SIZE: usize = N;

    pub const fn new() -> Self {
        Self {
            object: None,
            _kind: core::marker::PhantomData,
        }
    }

    /// Creates an `N`-byte buffer in `buffer`.
    pub fn create(&mut self, buffer: &'static mut [u8]) -> bool {
        if self.object.is_some() {
            return false;
        }
        self.object = build(External::<N>::region(buffer, Self::REQUIRED_SIZE), |region| {
            RingbufObject::create(region, K::TYPE, N)
        });
        self.object.is_some()
    }
}

impl<K: RingKind, const N: usize> Default for RingBuffer<External<N>, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocation<u8>, K: RingKind> RingBuffer<A, K> {
    /// Sends one item, waiting up to `ticks` for room (`xRingbufferSend`).
    pub fn send(&self, item: &[u8], ticks: TickType) -> bool {
        self.object
            .as_ref()
            .is_some_and(|ring| ring.send(item, ticks).is_ok())
    }

    pub fn send_from_isr(&self, item: &[u8], ctx: &mut InterruptContext) -> bool {
        self.object
            .as_ref()
            .is_some_and(|ring| ring.send_from_isr(item, ctx.woken_flag()).is_ok())
    }

    /// Hands an item back before the guard would go out of scope
    /// (`vRingbufferReturnItem`).
    pub fn return_item(&self, item: Received<'_, A::Region>) {
        drop(item);
    }

    /// Largest item accepted by `send`.
    pub fn max_item_size(&self) -> usize {
        self.object.as_ref().map_or(0, RingbufObject::max_item_size)
    }

    /// Largest item that can be sent right now without blocking.
    pub fn free_size(&self) -> usize {
        self.object.as_ref().map_or(0, RingbufObject::free_size)
    }

    /// Items waiting to be received; bytes for a byte buffer.
    pub fn items_waiting(&self) -> usize {
        self.object.as_ref().map_or(0, RingbufObject::items_waiting)
    }

    /// Bytes held by items not yet returned.
    pub fn bytes_used(&self) -> usize {
        self.object.as_ref().map_or(0, RingbufObject::bytes_used)
    }

    pub fn size(&self) -> usize {
        self.object.as_ref().map_or(0, RingbufObject::size)
    }
}

impl<A: Allocation<u8>> RingBuffer<A, NoSplit> {
    /// Receives the next item, waiting up to `ticks` (`xRingbufferReceive`).
    pub fn receive(&self, ticks: TickType) -> Option<Received<'_, A::Region>> {
        let ring = self.object.as_ref()?;
        let item = ring.receive(ticks).ok()?;
        Some(Received::new(ring, item, None))
    }

    pub fn receive_from_isr<'a>(
        &'a self,
        ctx: &'a mut InterruptContext,
    ) -> Option<Received<'a, A::Region>> {
        let ring = self.object.as_ref()?;
        let item = ring.receive_from_isr().ok()?;
        Some(Received::new(ring, item, None).in_isr(ctx))
    }
}

impl<A: Allocation<u8>> RingBuffer<A, AllowSplit> {
    /// Receives the next item as one or two parts
    /// (`xRingbufferReceiveSplit`).
    pub fn receive(&self, ticks: TickType) -> Option<Received<'_, A::Region>> {
        let ring = self.object.as_ref()?;
        let (head, tail) = ring.receive_split(ticks).ok()?;
        Some(Received::new(ring, head, tail))
    }

    pub fn receive_from_isr<'a>(
        &'a self,
        ctx: &'a mut InterruptContext,
    ) -> Option<Received<'a, A::Region>> {
        let ring = self.object.as_ref()?;
        let (head, tail) = ring.receive_split_from_isr().ok()?;
        Some(Received::new(ring, head, tail).in_isr(ctx))
    }
}

impl<A: Allocation<u8>> RingBuffer<A, Bytes> {
    /// Receives every contiguous byte waiting.
    pub fn receive(&self, ticks: TickType) -> Option<Received<'_, A::Region>> {
        let ring = self.object.as_ref()?;
        let item = ring.receive(ticks).ok()?;
        Some(Received::new(ring, item, None))
    }

    /// Receives at most `max` bytes (`xRingbufferReceiveUpTo`).
    pub fn receive_up_to(&self, max: usize, ticks: TickType) -> Option<Received<'_, A::Region>> {
        let ring = self.object.as_ref()?;
        let item = ring.receive_up_to(max, ticks).ok()?;
        Some(Received::new(ring, item, None))
    }

    pub fn receive_from_isr<'a>(
        &'a self,
        ctx: &'a mut InterruptContext,
    ) -> Option<Received<'a, A::Region>> {
        let ring = self.object.as_ref()?;
        let item = ring.receive_from_isr().ok()?;
        Some(Received::new(ring, item, None).in_isr(ctx))
    }

    pub fn receive_up_to_from_isr<'a>(
        &'a self,
        max: usize,
        ctx: &'a mut InterruptContext,
    ) -> Option<Received<'a, A::Region>> {
        let ring = self.object.as_ref()?;
        let item = ring.receive_up_to_from_isr(max).ok()?;
        Some(Received::new(ring, item, None).in_isr(ctx))
    }
}

impl<A: Allocation<u8>, K: RingKind> Waitable for RingBuffer<A, K> {
    fn handle(&self) -> Handle {
        handle_of(&self.object)
    }
}

impl<A: Allocation<u8>, K: RingKind> sealed::Sealed for RingBuffer<A, K> {}

impl<A: Allocation<u8>, K: RingKind> SetMember for RingBuffer<A, K> {
    fn event_cost(&self) -> usize {
        cost_of(&self.object)
    }

    fn member(&self) -> Option<&dyn Member> {
        self.object.as_ref().map(|ring| ring as &dyn Member)
    }
}

impl<A: Allocation<u8>, K: RingKind> PartialEq<RingBuffer<A, K>> for Handle {
    fn eq(&self, ring: &RingBuffer<A, K>) -> bool {
        ring.matches(*self)
    }
}
