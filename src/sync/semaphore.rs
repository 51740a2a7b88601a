//! Semaphore wrappers
//!
//! Semaphores have no owner: any task or interrupt may give one. A binary
//! semaphore holds at most one token and starts empty. A counting semaphore
//! holds up to its maximum count.

use crate::config::CONTROL_BLOCK_SIZE;
use crate::kernel::queue::QueueObject;
use crate::kernel::queue_set::Member;
use crate::memory::{Allocation, Dynamic, External, Static};
use crate::port::InterruptContext;
use crate::types::{Handle, TickType};

use super::mutex::LockGuard;
use super::waitable::{build, cost_of, handle_of, sealed, SetMember, Waitable};

/// A binary semaphore (`xSemaphoreCreateBinary`), created empty.
///
/// # Example
///
/// ```ignore
/// let ready = BinarySemaphore::<Static>::new();
///
/// // interrupt handler
/// let mut ctx = InterruptContext::new();
/// ready.give_from_isr(&mut ctx);
///
/// // task
/// ready.take(MAX_DELAY);
/// ```
pub struct BinarySemaphore<A: Allocation<()> = Dynamic> {
    object: Option<QueueObject<A::Region>>,
}

impl BinarySemaphore<Dynamic> {
    pub fn new() -> Self {
        Self {
            object: build(Dynamic::region(0), QueueObject::create_binary),
        }
    }
}

impl Default for BinarySemaphore<Dynamic> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> BinarySemaphore<Static<N>> {
    pub fn new() -> Self {
        Self {
            object: build(Ok(Static::<N>::region::<()>()), QueueObject::create_binary),
        }
    }
}

impl<const N: usize> Default for BinarySemaphore<Static<N>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> BinarySemaphore<External<N>> {
    pub const REQUIRED_SIZE: usize = CONTROL_BLOCK_SIZE;

    pub const fn new() -> Self {
        Self { object: None }
    }

    pub fn create(&mut self, buffer: &'static mut [u8]) -> bool {
        if self.object.is_some() {
            return false;
        }
        self.object = build(
            External::<N>::region(buffer, Self::REQUIRED_SIZE),
            QueueObject::create_binary,
        );
        self.object.is_some()
    }
}

impl<const N: usize> Default for BinarySemaphore<External<N>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocation<()>> BinarySemaphore<A> {
    pub fn take(&self, ticks: TickType) -> bool {
        self.object.as_ref().is_some_and(|sem| sem.take(ticks).is_ok())
    }

    /// Fails if the semaphore already holds its token.
    pub fn give(&self) -> bool {
        self.object.as_ref().is_some_and(|sem| sem.give().is_ok())
    }

    pub fn take_from_isr(&self, ctx: &mut InterruptContext) -> bool {
        self.object
            .as_ref()
            .is_some_and(|sem| sem.take_from_isr(ctx.woken_flag()).is_ok())
    }

    pub fn give_from_isr(&self, ctx: &mut InterruptContext) -> bool {
        self.object
            .as_ref()
            .is_some_and(|sem| sem.give_from_isr(ctx.woken_flag()).is_ok())
    }

    /// Takes the semaphore and gives it back when the guard drops.
    pub fn lock(&self, ticks: TickType) -> Option<LockGuard<'_, A::Region>> {
        let sem = self.object.as_ref()?;
        sem.take(ticks).ok()?;
        Some(LockGuard::new(sem))
    }

    /// 1 if the token is available, else 0.
    pub fn count(&self) -> usize {
        self.object.as_ref().map_or(0, QueueObject::messages_waiting)
    }
}

impl<A: Allocation<()>> Waitable for BinarySemaphore<A> {
    fn handle(&self) -> Handle {
        handle_of(&self.object)
    }
}

impl<A: Allocation<()>> sealed::Sealed for BinarySemaphore<A> {}

impl<A: Allocation<()>> SetMember for BinarySemaphore<A> {
    fn event_cost(&self) -> usize {
        cost_of(&self.object)
    }

    fn member(&self) -> Option<&dyn Member> {
        self.object.as_ref().map(|sem| sem as &dyn Member)
    }
}

impl<A: Allocation<()>> PartialEq<BinarySemaphore<A>> for Handle {
    fn eq(&self, sem: &BinarySemaphore<A>) -> bool {
        sem.matches(*self)
    }
}

/// A counting semaphore (`xSemaphoreCreateCounting`).
///
/// For the `Static` and `External` policies the maximum count is `N`; a
/// semaphore with `N == 0` fails to create.
pub struct CountingSemaphore<A: Allocation<()> = Dynamic> {
    object: Option<QueueObject<A::Region>>,
}

impl CountingSemaphore<Dynamic> {
    /// Fails to create if `initial_count > max_count` or `max_count == 0`.
    pub fn new(max_count: usize, initial_count: usize) -> Self {
        Self {
            object: build(Dynamic::region(0), |region| {
                QueueObject::create_counting(region, max_count, initial_count)
            }),
        }
    }
}

impl<const N: usize> CountingSemaphore<Static<N>> {
    pub fn new(initial_count: usize) -> Self {
        Self {
            object: build(Ok(Static::<N>::region::<()>()), |region| {
                QueueObject::create_counting(region, N, initial_count)
            }),
        }
    }
}

impl<const N: usize> CountingSemaphore<External<N>> {
    pub const REQUIRED_SIZE: usize = CONTROL_BLOCK_SIZE;

    pub const fn new() -> Self {
        Self { object: None }
    }

    /// Creates the semaphore in `buffer` with a count of 0.
    pub fn create(&mut self, buffer: &'static mut [u8]) -> bool {
        if self.object.is_some() {
            return false;
        }
        self.object = build(External::<N>::region(buffer, Self::REQUIRED_SIZE), |region| {
            QueueObject::create_counting(region, N, 0)
        });
        self.object.is_some()
    }
}

impl<const N: usize> Default for CountingSemaphore<External<N>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocation<()>> CountingSemaphore<A> {
    pub fn take(&self, ticks: TickType) -> bool {
        self.object.as_ref().is_some_and(|sem| sem.take(ticks).is_ok())
    }

    /// Fails once the count has reached its maximum.
    pub fn give(&self) -> bool {
        self.object.as_ref().is_some_and(|sem| sem.give().is_ok())
    }

    pub fn take_from_isr(&self, ctx: &mut InterruptContext) -> bool {
        self.object
            .as_ref()
            .is_some_and(|sem| sem.take_from_isr(ctx.woken_flag()).is_ok())
    }

    pub fn give_from_isr(&self, ctx: &mut InterruptContext) -> bool {
        self.object
            .as_ref()
            .is_some_and(|sem| sem.give_from_isr(ctx.woken_flag()).is_ok())
    }

    pub fn lock(&self, ticks: TickType) -> Option<LockGuard<'_, A::Region>> {
        let sem = self.object.as_ref()?;
        sem.take(ticks).ok()?;
        Some(LockGuard::new(sem))
    }

    /// Current count (`uxSemaphoreGetCount`).
    pub fn count(&self) -> usize {
        self.object.as_ref().map_or(0, QueueObject::messages_waiting)
    }

    pub fn max_count(&self) -> usize {
        self.object.as_ref().map_or(0, QueueObject::length)
    }
}

impl<A: Allocation<()>> Waitable for CountingSemaphore<A> {
    fn handle(&self) -> Handle {
        handle_of(&self.object)
    }
}

impl<A: Allocation<()>> sealed::Sealed for CountingSemaphore<A> {}

impl<A: Allocation<()>> SetMember for CountingSemaphore<A> {
    fn event_cost(&self) -> usize {
        cost_of(&self.object)
    }

    fn member(&self) -> Option<&dyn Member> {
        self.object.as_ref().map(|sem| sem as &dyn Member)
    }
}

impl<A: Allocation<()>> PartialEq<CountingSemaphore<A>> for Handle {
    fn eq(&self, sem: &CountingSemaphore<A>) -> bool {
        sem.matches(*self)
    }
}
