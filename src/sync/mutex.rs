//! Mutex wrappers with an RAII guard
//!
//! A mutex is owned by the task that took it and only that task may give it
//! back. A recursive mutex may be taken again by its holder; it is released
//! once every take has been matched by a give.

use core::marker::PhantomData;

use crate::config::CONTROL_BLOCK_SIZE;
use crate::kernel::queue::QueueObject;
use crate::kernel::queue_set::Member;
use crate::memory::{Allocation, Dynamic, External, Region, Static};
use crate::port::TaskId;
use crate::types::{Handle, TickType};

use super::waitable::{build, cost_of, handle_of, sealed, SetMember, Waitable};

/// Releases the lock it was obtained from when dropped.
///
/// # Example
///
/// ```ignore
/// let mutex = Mutex::<Dynamic>::new();
/// if let Some(_guard) = mutex.lock(MAX_DELAY) {
///     // mutex held until _guard goes out of scope
/// }
/// ```
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a, R: Region> {
    object: &'a QueueObject<R>,
    // Given back by the task that took the lock.
    _not_send: PhantomData<*const ()>,
}

impl<'a, R: Region> LockGuard<'a, R> {
    pub(crate) fn new(object: &'a QueueObject<R>) -> Self {
        Self {
            object,
            _not_send: PhantomData,
        }
    }
}

impl<R: Region> Drop for LockGuard<'_, R> {
    fn drop(&mut self) {
        if let Err(error) = self.object.give() {
            log::warn!("lock {} not released: {}", self.object.handle(), error);
        }
    }
}

/// A mutual exclusion lock (`xSemaphoreCreateMutex`).
pub struct Mutex<A: Allocation<()> = Dynamic> {
    object: Option<QueueObject<A::Region>>,
}

impl Mutex<Dynamic> {
    /// Creates a mutex on the kernel heap. Check `is_created()`.
    pub fn new() -> Self {
        Self {
            object: build(Dynamic::region(0), |region| {
                QueueObject::create_mutex(region, false)
            }),
        }
    }
}

impl Default for Mutex<Dynamic> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Mutex<Static<N>> {
    pub fn new() -> Self {
        Self {
            object: build(Ok(Static::<N>::region::<()>()), |region| {
                QueueObject::create_mutex(region, false)
            }),
        }
    }
}

impl<const N: usize> Default for Mutex<Static<N>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Mutex<External<N>> {
    /// Minimum buffer size accepted by [`create`](Self::create).
    pub const REQUIRED_SIZE: usize = CONTROL_BLOCK_SIZE;

    /// An uncreated mutex. Call [`create`](Self::create) before use.
    pub const fn new() -> Self {
        Self { object: None }
    }

    /// Creates the mutex in `buffer`. Fails if the buffer is too small or the
    /// mutex already exists.
    pub fn create(&mut self, buffer: &'static mut [u8]) -> bool {
        if self.object.is_some() {
            return false;
        }
        self.object = build(External::<N>::region(buffer, Self::REQUIRED_SIZE), |region| {
            QueueObject::create_mutex(region, false)
        });
        self.object.is_some()
    }
}

impl<const N: usize> Default for Mutex<External<N>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocation<()>> Mutex<A> {
    /// Takes the mutex, waiting up to `ticks`.
    pub fn take(&self, ticks: TickType) -> bool {
        self.object.as_ref().is_some_and(|mutex| mutex.take(ticks).is_ok())
    }

    /// Gives the mutex back. Fails if the caller does not hold it.
    pub fn give(&self) -> bool {
        self.object.as_ref().is_some_and(|mutex| mutex.give().is_ok())
    }

    /// Takes the mutex and returns a guard that gives it back on drop.
    pub fn lock(&self, ticks: TickType) -> Option<LockGuard<'_, A::Region>> {
        let mutex = self.object.as_ref()?;
        mutex.take(ticks).ok()?;
        Some(LockGuard::new(mutex))
    }

    /// Task currently holding the mutex.
    pub fn holder(&self) -> Option<TaskId> {
        self.object.as_ref()?.mutex_holder()
    }
}

impl<A: Allocation<()>> Waitable for Mutex<A> {
    fn handle(&self) -> Handle {
        handle_of(&self.object)
    }
}

impl<A: Allocation<()>> sealed::Sealed for Mutex<A> {}

impl<A: Allocation<()>> SetMember for Mutex<A> {
    fn event_cost(&self) -> usize {
        cost_of(&self.object)
    }

    fn member(&self) -> Option<&dyn Member> {
        self.object.as_ref().map(|mutex| mutex as &dyn Member)
    }
}

impl<A: Allocation<()>> PartialEq<Mutex<A>> for Handle {
    fn eq(&self, mutex: &Mutex<A>) -> bool {
        mutex.matches(*self)
    }
}

/// A mutex its holder may take again (`xSemaphoreCreateRecursiveMutex`).
pub struct RecursiveMutex<A: Allocation<()> = Dynamic> {
    object: Option<QueueObject<A::Region>>,
}

impl RecursiveMutex<Dynamic> {
    pub fn new() -> Self {
        Self {
            object: build(Dynamic::region(0), |region| {
                QueueObject::create_mutex(region, true)
            }),
        }
    }
}

impl Default for RecursiveMutex<Dynamic> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RecursiveMutex<Static<N>> {
    pub fn new() -> Self {
        Self {
            object: build(Ok(Static::<N>::region::<()>()), |region| {
                QueueObject::create_mutex(region, true)
            }),
        }
    }
}

impl<const N: usize> Default for RecursiveMutex<Static<N>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RecursiveMutex<External<N>> {
    pub const REQUIRED_SIZE: usize = CONTROL_BLOCK_SIZE;

    pub const fn new() -> Self {
        Self { object: None }
    }

    pub fn create(&mut self, buffer: &'static mut [u8]) -> bool {
        if self.object.is_some() {
            return false;
        }
        self.object = build(External::<N>::region(buffer, Self::REQUIRED_SIZE), |region| {
            QueueObject::create_mutex(region, true)
        });
        self.object.is_some()
    }
}

impl<const N: usize> Default for RecursiveMutex<External<N>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocation<()>> RecursiveMutex<A> {
    /// Takes the mutex, or takes it once more if the caller already holds it.
    pub fn take(&self, ticks: TickType) -> bool {
        self.object.as_ref().is_some_and(|mutex| mutex.take(ticks).is_ok())
    }

    /// Undoes one take.
    pub fn give(&self) -> bool {
        self.object.as_ref().is_some_and(|mutex| mutex.give().is_ok())
    }

    pub fn lock(&self, ticks: TickType) -> Option<LockGuard<'_, A::Region>> {
        let mutex = self.object.as_ref()?;
        mutex.take(ticks).ok()?;
        Some(LockGuard::new(mutex))
    }

    pub fn holder(&self) -> Option<TaskId> {
        self.object.as_ref()?.mutex_holder()
    }

    /// Takes not yet matched by a give.
    pub fn depth(&self) -> usize {
        self.object.as_ref().map_or(0, QueueObject::recursion_depth)
    }
}

impl<A: Allocation<()>> Waitable for RecursiveMutex<A> {
    fn handle(&self) -> Handle {
        handle_of(&self.object)
    }
}

impl<A: Allocation<()>> sealed::Sealed for RecursiveMutex<A> {}

impl<A: Allocation<()>> SetMember for RecursiveMutex<A> {
    fn event_cost(&self) -> usize {
        cost_of(&self.object)
    }

    fn member(&self) -> Option<&dyn Member> {
        self.object.as_ref().map(|mutex| mutex as &dyn Member)
    }
}

impl<A: Allocation<()>> PartialEq<RecursiveMutex<A>> for Handle {
    fn eq(&self, mutex: &RecursiveMutex<A>) -> bool {
        mutex.matches(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HeapBlock;
    use crate::types::NO_WAIT;

    /// Resolves only for types that are not `Send`: for a `Send` type both
    /// impls apply and the call below is ambiguous.
    trait NotSend<Marker> {
        fn check() {}
    }

    impl<T: ?Sized> NotSend<()> for T {}
    impl<T: ?Sized + Send> NotSend<u8> for T {}

    #[test]
    fn guard_stays_with_the_locking_task() {
        <LockGuard<'static, HeapBlock> as NotSend<_>>::check();

        let mutex = Mutex::<Static>::new();
        let guard = mutex.lock(NO_WAIT).expect("free mutex");
        let other = std::thread::scope(|s| s.spawn(|| mutex.take(NO_WAIT)).join());
        assert_eq!(other.ok(), Some(false));
        drop(guard);
        assert!(mutex.take(NO_WAIT));
        assert!(mutex.give());
    }
}
