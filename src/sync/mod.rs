//! Typed wrappers around the kernel objects
//!
//! Each wrapper owns one kernel object and deletes it when dropped. Its
//! allocation policy (`Dynamic`, `Static<N>` or `External<N>`) is a type
//! parameter defaulting to `Dynamic`.
//!
//! Operations report failure the simple way: `bool`, `Option`, or a byte
//! count of 0. A timeout and a hard failure look the same here; use the
//! kernel objects directly to tell them apart.
//!
//! # Example
//!
//! ```ignore
//! use rtos_waitables::{Queue, Static, MAX_DELAY};
//!
//! let queue = Queue::<u32, Static<10>>::new();
//! queue.add(42, MAX_DELAY);
//! assert_eq!(queue.pop(MAX_DELAY), Some(42));
//! ```

mod message_buffer;
mod mutex;
mod queue;
mod queue_set;
mod ring_buffer;
mod semaphore;
mod stream_buffer;
mod waitable;

pub use message_buffer::MessageBuffer;
pub use mutex::{LockGuard, Mutex, RecursiveMutex};
pub use queue::Queue;
pub use queue_set::QueueSet;
pub use ring_buffer::{
    AllowSplit, ByteRingBuffer, Bytes, NoSplit, Received, RingBuffer, RingKind, SplitRingBuffer,
};
pub use semaphore::{BinarySemaphore, CountingSemaphore};
pub use stream_buffer::StreamBuffer;
pub use waitable::{SetMember, Waitable};
