//! Typed queue wrapper
//!
//! Items are copied into the queue and out again, so `T` must be `Copy`.
//! Front insertion makes the queue behave as a stack for those items.

use core::marker::PhantomData;
use core::mem::{size_of, MaybeUninit};
use core::slice;

use crate::kernel::queue::{QueueObject, SendPosition};
use crate::kernel::queue_set::Member;
use crate::kernel::Result;
use crate::memory::{Allocation, Dynamic, External, Static};
use crate::port::InterruptContext;
use crate::types::{Handle, TickType};

use super::waitable::{build, cost_of, handle_of, sealed, SetMember, Waitable};

fn bytes_of<T: Copy>(item: &T) -> &[u8] {
    // Safety: T is Copy, so its bytes may be duplicated freely.
    unsafe { slice::from_raw_parts(item as *const T as *const u8, size_of::<T>()) }
}

/// Runs a kernel read into a zeroed `T` and keeps it on success.
fn read_item<T: Copy>(read: impl FnOnce(&mut [u8]) -> Result<()>) -> Option<T> {
    let mut item = MaybeUninit::<T>::zeroed();
    // Safety: the zeroed storage is initialized memory of size_of::<T>() bytes.
    let bytes = unsafe { slice::from_raw_parts_mut(item.as_mut_ptr() as *mut u8, size_of::<T>()) };
    read(bytes).ok()?;
    // Safety: on success the kernel copied in the bytes of a T sent earlier.
    Some(unsafe { item.assume_init() })
}

/// A FIFO queue of `T` (`xQueueCreate`).
///
/// # Example
///
/// ```ignore
/// let readings = Queue::<i16, Static<5>>::new();
/// readings.add(42, NO_WAIT);
/// assert_eq!(readings.pop(MAX_DELAY), Some(42));
/// ```
pub struct Queue<T: Copy + Send + 'static, A: Allocation<T> = Dynamic> {
    object: Option<QueueObject<A::Region>>,
    _marker: PhantomData<T>,
}

impl<T: Copy + Send + 'static> Queue<T, Dynamic> {
    /// Creates a queue of `length` items on the kernel heap.
    pub fn new(length: usize) -> Self {
        let bytes = length.saturating_mul(size_of::<T>());
        Self {
            object: build(Dynamic::region(bytes), |region| {
                QueueObject::create_queue(region, length, size_of::<T>())
            }),
            _marker: PhantomData,
        }
    }
}

impl<T: Copy + Send + 'static, const N: usize> Queue<T, Static<N>> {
    /// Creates a queue of `N` items stored inside the wrapper.
    pub fn new() -> Self {
        Self {
            object: build(Ok(Static::<N>::region::<T>()), |region| {
                QueueObject::create_queue(region, N, size_of::<T>())
            }),
            _marker: PhantomData,
        }
    }
}

impl<T: Copy + Send + 'static, const N: usize> Default for Queue<T, Static<N>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Send + 'static, const N: usize> Queue<T, External<N>> {
    /// Bytes needed for `N` items.
    pub const REQUIRED_SIZE: usize = N * size_of::<T>();

    pub const fn new() -> Self {
        Self {
            object: None,
            _marker: PhantomData,
        }
    }

    /// Creates a queue of `N` items in `buffer`.
    pub fn create(&mut self, buffer: &'static mut [u8]) -> bool {
        if self.object.is_some() {
            return false;
        }
        self.object = build(External::<N>::region(buffer, Self::REQUIRED_SIZE), |region| {
            QueueObject::create_queue(region, N, size_of::<T>())
        });
        self.object.is_some()
    }
}

impl<T: Copy + Send + 'static, const N: usize> Default for Queue<T, External<N>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Send + 'static, A: Allocation<T>> Queue<T, A> {
    fn send(&self, item: &T, position: SendPosition, ticks: TickType) -> bool {
        self.object
            .as_ref()
            .is_some_and(|queue| queue.send(bytes_of(item), position, ticks).is_ok())
    }

    fn send_from_isr(&self, item: &T, position: SendPosition, ctx: &mut InterruptContext) -> bool {
        self.object.as_ref().is_some_and(|queue| {
            queue
                .send_from_isr(bytes_of(item), position, ctx.woken_flag())
                .is_ok()
        })
    }

    /// Appends an item, waiting up to `ticks` for space (`xQueueSendToBack`).
    pub fn add(&self, item: T, ticks: TickType) -> bool {
        self.send(&item, SendPosition::Back, ticks)
    }

    /// Puts an item in front of the others (`xQueueSendToFront`).
    pub fn push(&self, item: T, ticks: TickType) -> bool {
        self.send(&item, SendPosition::Front, ticks)
    }

    /// Replaces the item of a single-slot queue (`xQueueOverwrite`). Fails on
    /// longer queues.
    pub fn overwrite(&self, item: T) -> bool {
        self.send(&item, SendPosition::Overwrite, 0)
    }

    /// Removes the front item, waiting up to `ticks` (`xQueueReceive`).
    pub fn pop(&self, ticks: TickType) -> Option<T> {
        let queue = self.object.as_ref()?;
        read_item(|out| queue.receive(out, ticks))
    }

    /// Copies the front item without removing it (`xQueuePeek`).
    pub fn peek(&self, ticks: TickType) -> Option<T> {
        let queue = self.object.as_ref()?;
        read_item(|out| queue.peek(out, ticks))
    }

    pub fn add_from_isr(&self, item: T, ctx: &mut InterruptContext) -> bool {
        self.send_from_isr(&item, SendPosition::Back, ctx)
    }

    pub fn push_from_isr(&self, item: T, ctx: &mut InterruptContext) -> bool {
        self.send_from_isr(&item, SendPosition::Front, ctx)
    }

    pub fn overwrite_from_isr(&self, item: T, ctx: &mut InterruptContext) -> bool {
        self.send_from_isr(&item, SendPosition::Overwrite, ctx)
    }

    pub fn pop_from_isr(&self, ctx: &mut InterruptContext) -> Option<T> {
        let queue = self.object.as_ref()?;
        read_item(|out| queue.receive_from_isr(out, ctx.woken_flag()))
    }

    pub fn peek_from_isr(&self) -> Option<T> {
        let queue = self.object.as_ref()?;
        read_item(|out| queue.peek_from_isr(out))
    }

    /// Discards every item (`xQueueReset`).
    pub fn reset(&self) {
        if let Some(queue) = &self.object {
            queue.reset();
        }
    }

    /// Items waiting (`uxQueueMessagesWaiting`).
    pub fn available_messages(&self) -> usize {
        self.object.as_ref().map_or(0, QueueObject::messages_waiting)
    }

    /// Free slots (`uxQueueSpacesAvailable`).
    pub fn available_spaces(&self) -> usize {
        self.object.as_ref().map_or(0, QueueObject::spaces_available)
    }

    pub fn available_messages_from_isr(&self) -> usize {
        self.available_messages()
    }

    /// Number of slots; 0 if not created.
    pub fn length(&self) -> usize {
        self.object.as_ref().map_or(0, QueueObject::length)
    }

    /// An uncreated queue is neither full nor empty.
    pub fn is_full(&self) -> bool {
        self.object.as_ref().is_some_and(QueueObject::is_full)
    }

    pub fn is_empty(&self) -> bool {
        self.object.as_ref().is_some_and(QueueObject::is_empty)
    }

    pub fn is_full_from_isr(&self) -> bool {
        self.is_full()
    }

    pub fn is_empty_from_isr(&self) -> bool {
        self.is_empty()
    }
}

impl<T: Copy + Send + 'static, A: Allocation<T>> Waitable for Queue<T, A> {
    fn handle(&self) -> Handle {
        handle_of(&self.object)
    }
}

impl<T: Copy + Send + 'static, A: Allocation<T>> sealed::Sealed for Queue<T, A> {}

impl<T: Copy + Send + 'static, A: Allocation<T>> SetMember for Queue<T, A> {
    fn event_cost(&self) -> usize {
        cost_of(&self.object)
    }

    fn member(&self) -> Option<&dyn Member> {
        self.object.as_ref().map(|queue| queue as &dyn Member)
    }
}

impl<T: Copy + Send + 'static, A: Allocation<T>> PartialEq<Queue<T, A>> for Handle {
    fn eq(&self, queue: &Queue<T, A>) -> bool {
        queue.matches(*self)
    }
}
