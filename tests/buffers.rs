use std::thread;

use rtos_waitables::{
    Dynamic, External, InterruptContext, MessageBuffer, Static, StreamBuffer, Waitable, MAX_DELAY,
    NO_WAIT,
};

const BUFFER_SIZE: usize = 100;
const TRIGGER: usize = 5;
const TX: &[u8] = b"123456789\0";

fn leak(len: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; len].into_boxed_slice())
}

fn external_stream() -> StreamBuffer<External<BUFFER_SIZE>> {
    let mut buffer = StreamBuffer::<External<BUFFER_SIZE>>::new();
    let storage = leak(StreamBuffer::<External<BUFFER_SIZE>>::REQUIRED_SIZE);
    assert!(buffer.create_with_trigger(storage, TRIGGER));
    buffer
}

fn external_message() -> MessageBuffer<External<BUFFER_SIZE>> {
    let mut buffer = MessageBuffer::<External<BUFFER_SIZE>>::new();
    assert!(buffer.create(leak(MessageBuffer::<External<BUFFER_SIZE>>::REQUIRED_SIZE)));
    buffer
}

#[test]
fn buffers_are_created_with_every_policy() {
    assert!(StreamBuffer::<Dynamic>::new(BUFFER_SIZE, TRIGGER).is_created());
    assert!(StreamBuffer::<Static<BUFFER_SIZE>>::new(TRIGGER).is_created());
    assert!(external_stream().is_created());

    assert!(MessageBuffer::<Dynamic>::new(BUFFER_SIZE).is_created());
    assert!(MessageBuffer::<Static<BUFFER_SIZE>>::new().is_created());
    assert!(external_message().is_created());
}

#[test]
fn invalid_buffers_fail_to_create() {
    assert!(!StreamBuffer::<Dynamic>::new(BUFFER_SIZE, BUFFER_SIZE + 1).is_created());
    assert!(!MessageBuffer::<Static<4>>::new().is_created());

    let mut small = StreamBuffer::<External<BUFFER_SIZE>>::new();
    assert!(!small.create(leak(BUFFER_SIZE - 1)));
    assert_eq!(small.send(TX, NO_WAIT), 0);
    assert_eq!(small.available_spaces(), 0);
}

#[test]
fn stream_send_and_receive() {
    let dynamic = StreamBuffer::<Dynamic>::new(BUFFER_SIZE, TRIGGER);
    let inline = StreamBuffer::<Static<BUFFER_SIZE>>::new(TRIGGER);
    let external = external_stream();

    let check = |send: &dyn Fn(&[u8]) -> usize,
                 receive: &dyn Fn(&mut [u8]) -> usize,
                 available: &dyn Fn() -> (usize, usize)| {
        assert_eq!(send(TX), TX.len());
        assert_eq!(available(), (TX.len(), BUFFER_SIZE - TX.len()));
        let mut rx = [0u8; 10];
        assert_eq!(receive(&mut rx), TX.len());
        assert_eq!(&rx, TX);
        assert_eq!(available(), (0, BUFFER_SIZE));
    };

    check(
        &|data| dynamic.send(data, NO_WAIT),
        &|out| dynamic.receive(out, NO_WAIT),
        &|| (dynamic.available_bytes(), dynamic.available_spaces()),
    );
    check(
        &|data| inline.send(data, NO_WAIT),
        &|out| inline.receive(out, NO_WAIT),
        &|| (inline.available_bytes(), inline.available_spaces()),
    );
    check(
        &|data| external.send(data, NO_WAIT),
        &|out| external.receive(out, NO_WAIT),
        &|| (external.available_bytes(), external.available_spaces()),
    );
    assert!(dynamic.is_empty() && inline.is_empty() && external.is_empty());
}

#[test]
fn stream_receive_below_trigger_returns_what_is_there() {
    let stream = StreamBuffer::<Static<BUFFER_SIZE>>::new(TRIGGER);
    assert!(stream.reset());
    assert_eq!(stream.send(&TX[..2], NO_WAIT), 2);
    assert_eq!(stream.available_bytes(), 2);

    let mut rx = [0u8; 10];
    assert_eq!(stream.receive(&mut rx, MAX_DELAY), 2);
    assert_eq!(&rx[..2], b"12");
}

#[test]
fn stream_trigger_level() {
    let stream = StreamBuffer::<Dynamic>::new(BUFFER_SIZE, TRIGGER);
    assert!(stream.set_trigger_level(2));
    assert!(!stream.set_trigger_level(200));
    assert!(stream.set_trigger_level(0));
}

#[test]
fn stream_fills_up() {
    let stream = StreamBuffer::<Static<8>>::new(1);
    assert_eq!(stream.send(TX, NO_WAIT), 8);
    assert!(stream.is_full());
    assert_eq!(stream.send(TX, NO_WAIT), 0);

    let mut rx = [0u8; 4];
    assert_eq!(stream.receive(&mut rx, NO_WAIT), 4);
    assert_eq!(&rx, b"1234");
    assert!(!stream.is_full());
}

#[test]
fn stream_reader_wakes_at_trigger_level() {
    let stream = StreamBuffer::<Dynamic>::new(BUFFER_SIZE, 4);
    thread::scope(|s| {
        let reader = s.spawn(|| {
            let mut rx = [0u8; 16];
            stream.receive(&mut rx, MAX_DELAY)
        });
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(stream.send(b"abcd", NO_WAIT), 4);
        assert_eq!(reader.join().expect("reader"), 4);
    });
}

#[test]
fn message_send_and_receive() {
    let dynamic = MessageBuffer::<Dynamic>::new(BUFFER_SIZE);
    let inline = MessageBuffer::<Static<BUFFER_SIZE>>::new();
    let external = external_message();

    let check = |send: &dyn Fn(&[u8]) -> usize,
                 receive: &dyn Fn(&mut [u8]) -> usize,
                 available: &dyn Fn() -> (usize, usize)| {
        assert_eq!(send(TX), TX.len());
        assert_eq!(available(), (TX.len() + 4, BUFFER_SIZE - (TX.len() + 4)));
        let mut rx = [0u8; 10];
        assert_eq!(receive(&mut rx), TX.len());
        assert_eq!(&rx, TX);
        assert_eq!(available(), (0, BUFFER_SIZE));
    };

    check(
        &|data| dynamic.send(data, NO_WAIT),
        &|out| dynamic.receive(out, NO_WAIT),
        &|| (dynamic.available_bytes(), dynamic.available_spaces()),
    );
    check(
        &|data| inline.send(data, NO_WAIT),
        &|out| inline.receive(out, NO_WAIT),
        &|| (inline.available_bytes(), inline.available_spaces()),
    );
    check(
        &|data| external.send(data, NO_WAIT),
        &|out| external.receive(out, NO_WAIT),
        &|| (external.available_bytes(), external.available_spaces()),
    );
}

#[test]
fn messages_are_atomic() {
    let mailbox = MessageBuffer::<Static<16>>::new();
    assert_eq!(mailbox.send(&[0u8; 13], NO_WAIT), 0, "larger than the buffer");
    assert_eq!(mailbox.send(b"first", NO_WAIT), 5);
    assert_eq!(mailbox.send(b"second", NO_WAIT), 0, "does not fit whole");
    assert_eq!(mailbox.next_message_size(), 5);

    let mut short = [0u8; 2];
    assert_eq!(mailbox.receive(&mut short, NO_WAIT), 0);
    assert_eq!(mailbox.next_message_size(), 5, "message stays put");

    let mut rx = [0u8; 8];
    assert_eq!(mailbox.receive(&mut rx, NO_WAIT), 5);
    assert_eq!(&rx[..5], b"first");
    assert_eq!(mailbox.next_message_size(), 0);
}

#[test]
fn buffers_from_interrupts() {
    let stream = StreamBuffer::<Static<32>>::new(1);
    let mailbox = MessageBuffer::<Static<32>>::new();
    let mut ctx = InterruptContext::new();
    assert_eq!(stream.send_from_isr(b"abc", &mut ctx), 3);
    assert_eq!(mailbox.send_from_isr(b"abc", &mut ctx), 3);

    let mut rx = [0u8; 8];
    assert_eq!(stream.receive_from_isr(&mut rx, &mut ctx), 3);
    assert_eq!(mailbox.receive_from_isr(&mut rx, &mut ctx), 3);
    assert_eq!(stream.receive_from_isr(&mut rx, &mut ctx), 0);
    assert!(!ctx.higher_priority_task_woken());
}
