use std::collections::VecDeque;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use kestrel_core::{ByteArray, Queue};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum QueueOp {
    Enqueue(u16),
    Dequeue,
    Clear,
}

fn queue_op() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        4 => any::<u16>().prop_map(QueueOp::Enqueue),
        3 => Just(QueueOp::Dequeue),
        1 => Just(QueueOp::Clear),
    ]
}

proptest! {
    /// The queue behaves like a bounded VecDeque that refuses, never overwrites
    #[test]
    fn test_queue_matches_bounded_fifo(ops in proptest::collection::vec(queue_op(), 0..200)) {
        let queue: Queue<CriticalSectionRawMutex, u16, 8> = Queue::new();
        let mut model: VecDeque<u16> = VecDeque::new();

        for op in ops {
            match op {
                QueueOp::Enqueue(v) => {
                    let result = queue.enqueue(v);
                    if model.len() < 8 {
                        prop_assert_eq!(result, Ok(()));
                        model.push_back(v);
                    } else {
                        prop_assert_eq!(result, Err(v));
                    }
                }
                QueueOp::Dequeue => prop_assert_eq!(queue.dequeue(), model.pop_front()),
                QueueOp::Clear => {
                    queue.clear();
                    model.clear();
                }
            }
            prop_assert_eq!(queue.len(), model.len());
            prop_assert_eq!(queue.is_full(), model.len() == 8);
        }
    }

    /// Appends are all-or-nothing and consume discards exactly the prefix
    #[test]
    fn test_byte_array_append_and_consume(
        chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..24), 0..16),
        consume in 0usize..80,
    ) {
        let mut buf: ByteArray<64> = ByteArray::new();
        let mut model: Vec<u8> = Vec::new();

        for chunk in &chunks {
            if model.len() + chunk.len() <= 64 {
                prop_assert!(buf.append(chunk).is_ok());
                model.extend_from_slice(chunk);
            } else {
                prop_assert!(buf.append(chunk).is_err());
            }
        }
        prop_assert_eq!(buf.as_slice(), model.as_slice());

        buf.consume(consume);
        let kept = consume.min(model.len());
        prop_assert_eq!(buf.as_slice(), &model[kept..]);
    }
}
