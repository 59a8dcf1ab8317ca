//! Concurrency tests for the MPSC reclamation log.

use durgun::MpscQueue;
use std::sync::Arc;
use std::thread;

#[test]
#[cfg_attr(miri, ignore)]
fn producer_sum_is_preserved() {
    // 4 producers each push N-1, N-2, ..., 0; the consumer pops 4N items
    // and their sum must equal 4 * N * (N - 1) / 2.
    const N: u64 = 100_000;
    const PRODUCERS: u64 = 4;

    let q = Arc::new(MpscQueue::new());
    let mut handles = vec![];

    for _ in 0..PRODUCERS {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            for v in (0..N).rev() {
                q.push(v);
            }
        }));
    }

    let consumer = {
        let q = q.clone();
        thread::spawn(move || {
            let mut sum = 0u64;
            let mut remaining = PRODUCERS * N;
            while remaining > 0 {
                // SAFETY: this thread is the only popper.
                match unsafe { q.pop() } {
                    Some(v) => {
                        sum += v;
                        remaining -= 1;
                    }
                    None => thread::yield_now(),
                }
            }
            sum
        })
    };

    for h in handles {
        h.join().unwrap();
    }
    let sum = consumer.join().unwrap();

    assert_eq!(sum, PRODUCERS * N * (N - 1) / 2);
    // SAFETY: all producers joined; single popper.
    assert!(unsafe { q.pop() }.is_none());
}

#[test]
#[cfg_attr(miri, ignore)]
fn per_producer_order_is_fifo() {
    const N: usize = 50_000;

    let q = Arc::new(MpscQueue::new());
    let mut handles = vec![];

    // Tag values with the producer id so the consumer can check that
    // each producer's values arrive in push order.
    for producer in 0..3usize {
        let q = q.clone();
        handles.push(thread::spawn(move || {
            for seq in 0..N {
                q.push((producer, seq));
            }
        }));
    }

    let consumer = {
        let q = q.clone();
        thread::spawn(move || {
            let mut expected = [0usize; 3];
            let mut popped = 0;
            while popped < 3 * N {
                // SAFETY: this thread is the only popper.
                match unsafe { q.pop() } {
                    Some((producer, seq)) => {
                        assert_eq!(seq, expected[producer], "producer {producer} reordered");
                        expected[producer] += 1;
                        popped += 1;
                    }
                    None => thread::yield_now(),
                }
            }
        })
    };

    for h in handles {
        h.join().unwrap();
    }
    consumer.join().unwrap();
}

#[test]
fn heap_owning_payloads_round_trip() {
    let q = MpscQueue::new();
    q.push(vec![1u32, 2, 3]);
    q.push(vec![4u32]);
    // SAFETY: single-threaded test, one consumer.
    unsafe {
        assert_eq!(q.pop(), Some(vec![1, 2, 3]));
        assert_eq!(q.pop(), Some(vec![4]));
        assert_eq!(q.pop(), None);
    }
}
