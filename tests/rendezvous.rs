use std::env;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use rendezvous::{CancelToken, Channel, RecvTimeoutError, SendTimeoutError, TrySendError};

fn stress_factor() -> usize {
    match env::var("RUST_TEST_STRESS") {
        Ok(val) => val.parse().unwrap(),
        Err(..) => 1,
    }
}

fn workers() -> usize {
    num_cpus::get().clamp(2, 4)
}

// spin until `n` operations are parked
fn wait_parked<T>(ch: &Channel<T>, n: usize) {
    while ch.len() < n {
        thread::yield_now();
    }
}

#[test]
fn no_loss_no_duplication() {
    let producers = workers();
    let consumers = workers();
    let per_producer = 2000 * stress_factor();
    let total = producers * per_producer;
    let ch = Channel::with_segment_size(4);
    let received = Mutex::new(Vec::with_capacity(total));

    thread::scope(|s| {
        for p in 0..producers {
            let ch = &ch;
            s.spawn(move || {
                for i in 0..per_producer {
                    let mut v = p * per_producer + i;
                    match fastrand::u8(..4) {
                        0 => ch.offer_unlimited(v),
                        1 => loop {
                            match ch.send_timeout(v, Duration::from_micros(fastrand::u64(1..200))) {
                                Ok(()) => break,
                                Err(SendTimeoutError::Timeout(back)) => v = back,
                                Err(e) => panic!("unexpected error {e:?}"),
                            }
                        },
                        2 => loop {
                            match ch.offer(v) {
                                Ok(()) => break,
                                Err(TrySendError(back)) => v = back,
                            }
                            if fastrand::bool() {
                                ch.send(v);
                                break;
                            }
                            thread::yield_now();
                        },
                        _ => ch.send(v),
                    }
                }
            });
        }

        for c in 0..consumers {
            let ch = &ch;
            let received = &received;
            // the first consumer takes the remainder
            let mut n = total / consumers;
            if c == 0 {
                n += total % consumers;
            }
            s.spawn(move || {
                let mut got = Vec::with_capacity(n);
                while got.len() < n {
                    match fastrand::u8(..3) {
                        0 => match ch.recv_timeout(Duration::from_micros(fastrand::u64(1..200))) {
                            Ok(v) => got.push(v),
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(e) => panic!("unexpected error {e:?}"),
                        },
                        1 => match ch.poll() {
                            Some(v) => got.push(v),
                            None => thread::yield_now(),
                        },
                        _ => got.push(ch.recv()),
                    }
                }
                received.lock().unwrap().extend(got);
            });
        }
    });

    let mut received = received.into_inner().unwrap();
    received.sort_unstable();
    assert_eq!(received, (0..total).collect::<Vec<_>>());
    assert!(ch.is_empty());
}

#[test]
fn receivers_served_in_arrival_order() {
    let ch = &Channel::with_segment_size(2);
    thread::scope(|s| {
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let h = s.spawn(move || ch.recv());
                wait_parked(ch, i + 1);
                h
            })
            .collect();
        for i in 0..5 {
            ch.send(i);
        }
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.join().unwrap(), i);
        }
    });
    assert!(ch.is_empty());
}

#[test]
fn senders_served_in_arrival_order() {
    let ch = Channel::with_segment_size(3);
    thread::scope(|s| {
        for i in 0..5 {
            let ch = &ch;
            s.spawn(move || ch.send(i));
            wait_parked(ch, i + 1);
        }
        for i in 0..5 {
            assert_eq!(ch.recv(), i);
        }
    });
}

#[test]
fn hand_offs_keep_few_segments() {
    const K: usize = 1000;
    let ch = Channel::with_segment_size(4);
    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..K {
                ch.send(i);
            }
        });
        for i in 0..K {
            assert_eq!(ch.recv(), i);
            assert!(ch.live_segments() <= 3, "{} live segments", ch.live_segments());
        }
    });
    assert!(ch.live_segments() <= 3);
}

#[test]
fn timed_out_waiters_are_unlinked() {
    let ch = Channel::with_segment_size(4);
    thread::scope(|s| {
        // keeps the head segment alive
        let first = s.spawn(|| ch.recv());
        wait_parked(&ch, 1);
        for _ in 0..40 {
            assert_eq!(
                ch.recv_timeout(Duration::from_millis(1)),
                Err(RecvTimeoutError::Timeout)
            );
        }
        // the cancelled slots still count, but their segments are gone
        assert_eq!(ch.len(), 41);
        assert!(ch.live_segments() <= 3, "{} live segments", ch.live_segments());

        ch.send(7);
        assert_eq!(first.join().unwrap(), 7);
    });
    // the next operation skips all the cancelled slots
    ch.offer_unlimited(8);
    assert_eq!(ch.recv(), 8);
    assert!(ch.is_empty());
    assert!(ch.live_segments() <= 2);
}

#[test]
fn cancel_races_send() {
    let ch = Channel::with_segment_size(2);
    for i in 0..200 * stress_factor() {
        let token = CancelToken::new();
        thread::scope(|s| {
            let h = s.spawn(|| ch.recv_cancelable(&token));
            if fastrand::bool() {
                thread::sleep(Duration::from_micros(fastrand::u64(..50)));
            }
            let cancel_first = fastrand::bool();
            if cancel_first {
                token.cancel();
            }
            let sent = ch.send_timeout(i, Duration::from_millis(5));
            if !cancel_first {
                token.cancel();
            }
            match (h.join().unwrap(), sent) {
                (Ok(v), Ok(())) => assert_eq!(v, i),
                (Err(RecvTimeoutError::Canceled), Err(SendTimeoutError::Timeout(v))) => {
                    // the value came back to the sender
                    assert_eq!(v, i)
                }
                (r, sent) => panic!("inconsistent outcome: recv {r:?}, send {sent:?}"),
            }
        });
    }
    assert_eq!(ch.poll(), None);
}

#[test]
fn poll_probe() {
    let ch = Channel::with_segment_size(4);
    for _ in 0..10 {
        assert_eq!(ch.poll(), None);
    }
    // probes never enqueue
    assert_eq!(ch.len(), 0);
    thread::scope(|s| {
        s.spawn(|| ch.send("late"));
        wait_parked(&ch, 1);
        assert_eq!(ch.poll(), Some("late"));
    });
    assert_eq!(ch.poll(), None);
}

#[test]
fn offer_probe() {
    let ch = Channel::with_segment_size(4);
    assert_eq!(ch.offer(1), Err(TrySendError(1)));
    assert!(ch.is_empty());
    thread::scope(|s| {
        let h = s.spawn(|| ch.recv());
        wait_parked(&ch, 1);
        assert_eq!(ch.offer(2), Ok(()));
        assert_eq!(h.join().unwrap(), 2);
    });
}

#[test]
fn unlimited_deposits_wait_for_receivers() {
    let n = 100;
    let ch = Channel::with_segment_size(8);
    // never blocks even with nobody around
    for i in 0..n {
        ch.offer_unlimited(i);
    }
    assert_eq!(ch.len(), n);
    thread::scope(|s| {
        let h = s.spawn(|| (0..n).map(|_| ch.recv()).collect::<Vec<_>>());
        assert_eq!(h.join().unwrap(), (0..n).collect::<Vec<_>>());
    });
    assert!(ch.is_empty());
    // with nobody waiting a send still blocks
    assert_eq!(
        ch.send_timeout(0, Duration::from_millis(1)),
        Err(SendTimeoutError::Timeout(0))
    );
}

#[test]
fn cancelled_sender_keeps_value() {
    let ch = Channel::<String>::with_segment_size(2);
    let token = CancelToken::new();
    thread::scope(|s| {
        let h = s.spawn(|| ch.send_cancelable(String::from("mine"), &token));
        wait_parked(&ch, 1);
        token.cancel();
        match h.join().unwrap() {
            Err(SendTimeoutError::Canceled(v)) => assert_eq!(v, "mine"),
            r => panic!("unexpected result {r:?}"),
        }
    });
    assert_eq!(ch.poll(), None);
}

#[test]
fn one_token_cancels_many() {
    let ch = &Channel::<u32>::new();
    let token = &CancelToken::new();
    thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(move || ch.recv_cancelable(token)))
            .collect();
        wait_parked(ch, 4);
        token.cancel();
        for h in handles {
            assert_eq!(h.join().unwrap(), Err(RecvTimeoutError::Canceled));
        }
    });
}

#[test]
fn cancelled_slot_counts_until_skipped() {
    let ch = Channel::<u32>::with_segment_size(4);
    assert_eq!(ch.recv_timeout(Duration::from_millis(1)), Err(RecvTimeoutError::Timeout));
    // nobody waits, but the cancelled slot is still ahead of `deq`
    assert!(!ch.is_empty());
    assert_eq!(ch.len(), 1);
    // the next operation skips it
    assert_eq!(ch.offer(1), Err(TrySendError(1)));
    assert!(ch.is_empty());
}
