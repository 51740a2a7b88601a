use rtos_waitables::config::TOTAL_HEAP_SIZE;
use rtos_waitables::kernel::registry;
use rtos_waitables::memory::{free_heap_size, heap_stats};
use rtos_waitables::{
    BinarySemaphore, ByteRingBuffer, CountingSemaphore, Dynamic, External, MessageBuffer, Mutex,
    Queue, QueueSet, RecursiveMutex, RingBuffer, SetMember, Static, StreamBuffer, Waitable,
    NO_WAIT,
};

fn leak(len: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; len].into_boxed_slice())
}

fn assert_deleted_on_drop<W: Waitable>(waitable: W) {
    let handle = waitable.handle();
    assert!(!handle.is_null());
    assert!(registry::is_live(handle));
    drop(waitable);
    assert!(!registry::is_live(handle));
}

#[test]
fn every_wrapper_deletes_its_object() {
    assert_deleted_on_drop(Mutex::<Dynamic>::new());
    assert_deleted_on_drop(RecursiveMutex::<Static>::new());
    assert_deleted_on_drop(BinarySemaphore::<Static>::new());
    assert_deleted_on_drop(CountingSemaphore::<Dynamic>::new(4, 1));
    assert_deleted_on_drop(Queue::<u16, Static<8>>::new());
    assert_deleted_on_drop(RingBuffer::<Dynamic>::new(128));
    assert_deleted_on_drop(ByteRingBuffer::<Static<64>>::new());
    assert_deleted_on_drop(StreamBuffer::<Dynamic>::new(32, 1));
    assert_deleted_on_drop(MessageBuffer::<Static<32>>::new());
    assert_deleted_on_drop(QueueSet::new(4));

    let mut queue = Queue::<u32, External<4>>::new();
    assert!(queue.create(leak(Queue::<u32, External<4>>::REQUIRED_SIZE)));
    assert_deleted_on_drop(queue);
}

#[test]
fn handles_are_distinct() {
    let a = Queue::<u32, Static<1>>::new();
    let b = Queue::<u32, Static<1>>::new();
    let c = BinarySemaphore::<Static>::new();
    assert_ne!(a.handle(), b.handle());
    assert_ne!(b.handle(), c.handle());
    assert!(a.matches(a.handle()));
    assert!(!a.matches(b.handle()));
}

#[test]
fn uncreated_wrappers_drop_cleanly() {
    let queue = Queue::<u32, External<4>>::new();
    let mutex = Mutex::<External>::new();
    let ring = RingBuffer::<External<64>>::new();
    let stream = StreamBuffer::<External<64>>::new();
    for handle in [queue.handle(), mutex.handle(), ring.handle(), stream.handle()] {
        assert!(handle.is_null());
        assert!(!registry::is_live(handle));
    }
    assert_eq!(queue.event_cost(), 0);
    drop((queue, mutex, ring, stream));

    let failed = StreamBuffer::<Dynamic>::new(0, 1);
    assert!(!failed.is_created());
    drop(failed);
}

#[test]
fn dynamic_objects_charge_the_heap() {
    let before = heap_stats();
    let queue = Queue::<u64, Dynamic>::new(16);
    assert!(queue.is_created());
    let during = heap_stats();
    assert!(during.successful_allocations > before.successful_allocations);
    assert!(during.minimum_ever_free_bytes_remaining < TOTAL_HEAP_SIZE);

    drop(queue);
    assert!(heap_stats().successful_frees > before.successful_frees);
}

#[test]
fn static_objects_leave_the_heap_alone() {
    let queue = Queue::<u64, Static<16>>::new();
    assert!(queue.is_created());
    assert!(queue.add(1, NO_WAIT));
    assert_eq!(queue.pop(NO_WAIT), Some(1));
}

#[test]
fn exhausted_heap_fails_creation() {
    let queue = Queue::<u8, Dynamic>::new(TOTAL_HEAP_SIZE);
    assert!(!queue.is_created());
    assert!(!queue.add(1, NO_WAIT));

    let ring = RingBuffer::<Dynamic>::new(TOTAL_HEAP_SIZE + 64);
    assert!(!ring.is_created());
    assert!(free_heap_size() <= TOTAL_HEAP_SIZE);
}

#[test]
fn dropped_member_is_purged_from_its_set() {
    let set = QueueSet::new(3);
    let keep = BinarySemaphore::<Static>::new();
    assert!(set.add(&keep));
    {
        let gone = Queue::<u8, Static<2>>::new();
        assert!(set.add(&gone));
        assert!(gone.add(1, NO_WAIT));
        assert!(keep.give());
        assert_eq!(set.committed(), 3);
    }
    assert_eq!(set.committed(), 1);
    let member = set.select(NO_WAIT).expect("semaphore event survives");
    assert!(member == keep);
    assert_eq!(set.select(NO_WAIT), None);
}

#[test]
fn set_handle_is_deleted_before_its_members() {
    let sem = BinarySemaphore::<Static>::new();
    let set = QueueSet::new(1);
    let set_handle = set.handle();
    assert!(set.add(&sem));
    drop(set);
    assert!(!registry::is_live(set_handle));
    assert!(registry::is_live(sem.handle()));
    assert!(sem.give());
    assert!(sem.take(NO_WAIT));
}
