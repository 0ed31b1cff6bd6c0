//! Lock-free unbounded rendezvous channel
//!
//! Senders and receivers meet one to one. Whoever finds nobody of the
//! opposite side waiting parks in the shared waiting queue, so at any time
//! the queue holds only senders or only receivers (plus deposited values,
//! which count as senders). The first waiter of the opposite side is served
//! in arrival order.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rendezvous_queue::epoch::{self, Guard};
use rendezvous_queue::{Claimed, Handle, Occupant, Role, Ticket, WaitQueue};

use super::cancel::CancelToken;
use super::error::{RecvTimeoutError, SendTimeoutError, TrySendError};
use super::waiter::{WaitError, Waiter};
use crate::config::config;

// what the caller brings to the rendezvous
enum Op<T> {
    Receive,
    Send(T),
    // a value left for a future receiver, nobody waits for its delivery
    Deposit(T),
}

impl<T> Op<T> {
    #[inline]
    fn role(&self) -> Role {
        match self {
            Op::Receive => Role::Receiver,
            Op::Send(_) | Op::Deposit(_) => Role::Sender,
        }
    }
}

enum Outcome<T> {
    // met a partner, carries the value for a receive
    Done(Option<T>),
    // a probe found nobody to meet
    Declined(Op<T>),
    // the caller waits in the queue
    Parked(Arc<Waiter<T>>, Ticket<T, Waiter<T>>),
}

/// A synchronous channel without buffer.
///
/// Any number of threads can send and receive through a shared reference,
/// wrap the channel in an `Arc` or use scoped threads.
pub struct Channel<T> {
    queue: WaitQueue<T, Waiter<T>>,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Channel<T> {
    /// create a channel with the configured segment size
    pub fn new() -> Self {
        Self::with_segment_size(config().get_segment_size())
    }

    /// create a channel whose waiting queue grows by `size` slots at a time
    ///
    /// # Panics
    ///
    /// panics if `size` is 0
    pub fn with_segment_size(size: usize) -> Self {
        Channel {
            queue: WaitQueue::new(size),
        }
    }

    /// send a value, blocks until a receiver took it
    pub fn send(&self, v: T) {
        if let Err(e) = self.send_impl(v, None, None) {
            unreachable!("send without deadline failed: {:?}", e);
        }
    }

    /// send a value, waiting at most `dur` for a receiver
    pub fn send_timeout(&self, v: T, dur: Duration) -> Result<(), SendTimeoutError<T>> {
        self.send_impl(v, Instant::now().checked_add(dur), None)
    }

    /// send a value, gives up once `token` is cancelled
    pub fn send_cancelable(&self, v: T, token: &CancelToken) -> Result<(), SendTimeoutError<T>> {
        self.send_impl(v, None, Some(token))
    }

    /// receive a value, blocks until a sender handed one over
    pub fn recv(&self) -> T {
        match self.recv_impl(None, None) {
            Ok(v) => v,
            Err(e) => unreachable!("recv without deadline failed: {:?}", e),
        }
    }

    /// receive a value, waiting at most `dur` for a sender
    pub fn recv_timeout(&self, dur: Duration) -> Result<T, RecvTimeoutError> {
        self.recv_impl(Instant::now().checked_add(dur), None)
    }

    /// receive a value, gives up once `token` is cancelled
    pub fn recv_cancelable(&self, token: &CancelToken) -> Result<T, RecvTimeoutError> {
        self.recv_impl(None, Some(token))
    }

    /// hand the value to a receiver that is already waiting
    ///
    /// never blocks and never enqueues, the value comes back if nobody waits
    pub fn offer(&self, v: T) -> Result<(), TrySendError<T>> {
        match self.rendezvous(Op::Send(v), true) {
            Outcome::Done(_) => Ok(()),
            Outcome::Declined(Op::Send(v)) => Err(TrySendError(v)),
            _ => unreachable!("offer parked or changed its value"),
        }
    }

    /// take the value of a sender that is already waiting
    ///
    /// never blocks and never enqueues
    pub fn poll(&self) -> Option<T> {
        match self.rendezvous(Op::Receive, true) {
            Outcome::Done(v) => v,
            Outcome::Declined(_) => None,
            Outcome::Parked(..) => unreachable!("poll parked"),
        }
    }

    /// leave a value for a receiver without waiting for it
    ///
    /// always succeeds, a waiting receiver gets the value right away,
    /// otherwise it is stored in the queue until some receiver arrives
    pub fn offer_unlimited(&self, v: T) {
        match self.rendezvous(Op::Deposit(v), false) {
            Outcome::Done(_) => {}
            _ => unreachable!("deposit parked or was declined"),
        }
    }

    /// number of slots per queue segment
    pub fn segment_size(&self) -> usize {
        self.queue.segment_size()
    }

    /// number of queue segments reachable from the head
    pub fn live_segments(&self) -> usize {
        self.queue.live_segments()
    }

    /// upper bound of the number of parked operations, only a hint under
    /// contention
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// true if nothing is parked and no cancelled slot is left to skip,
    /// only a hint under contention
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn send_impl(
        &self,
        v: T,
        deadline: Option<Instant>,
        token: Option<&CancelToken>,
    ) -> Result<(), SendTimeoutError<T>> {
        if token.map_or(false, |t| t.is_canceled()) {
            return Err(SendTimeoutError::Canceled(v));
        }
        let (waiter, ticket) = match self.rendezvous(Op::Send(v), false) {
            Outcome::Done(_) => return Ok(()),
            Outcome::Parked(waiter, ticket) => (waiter, ticket),
            Outcome::Declined(_) => unreachable!("blocking send declined"),
        };
        let reason = match waiter.wait(deadline, token) {
            Ok(()) => return Ok(()),
            Err(reason) => reason,
        };
        debug!("send gave up: {:?}, {:?}", reason, ticket);
        ticket.cancel();
        // the cancelled waiter was never resumed, it still holds the value
        let v = match unsafe { waiter.take_value() } {
            Some(v) => v,
            None => unreachable!("cancelled sender lost its value"),
        };
        Err(match reason {
            WaitError::Timeout => SendTimeoutError::Timeout(v),
            WaitError::Canceled => SendTimeoutError::Canceled(v),
        })
    }

    fn recv_impl(
        &self,
        deadline: Option<Instant>,
        token: Option<&CancelToken>,
    ) -> Result<T, RecvTimeoutError> {
        if token.map_or(false, |t| t.is_canceled()) {
            return Err(RecvTimeoutError::Canceled);
        }
        let (waiter, ticket) = match self.rendezvous(Op::Receive, false) {
            Outcome::Done(Some(v)) => return Ok(v),
            Outcome::Parked(waiter, ticket) => (waiter, ticket),
            _ => unreachable!("blocking recv declined or matched without value"),
        };
        match waiter.wait(deadline, token) {
            Ok(()) => match unsafe { waiter.take_value() } {
                Some(v) => Ok(v),
                None => unreachable!("receiver resumed without value"),
            },
            Err(reason) => {
                debug!("recv gave up: {:?}, {:?}", reason, ticket);
                ticket.cancel();
                Err(match reason {
                    WaitError::Timeout => RecvTimeoutError::Timeout,
                    WaitError::Canceled => RecvTimeoutError::Canceled,
                })
            }
        }
    }

    // the shared retry loop of every operation, a probe never enqueues
    fn rendezvous(&self, op: Op<T>, probe: bool) -> Outcome<T> {
        let guard = &epoch::pin();
        let mut op = op;
        'retry: loop {
            let (enq, deq) = self.queue.indices();
            // dequeues overtook the `enq` we read
            if enq < deq {
                continue;
            }
            if enq == deq {
                if probe {
                    return Outcome::Declined(op);
                }
                match self.enqueue(enq, op, guard) {
                    Ok(outcome) => return outcome,
                    // `enq` moved
                    Err(back) => {
                        op = back;
                        continue;
                    }
                }
            }

            // `deq` or the head was stale and got moved
            let (segment, offset) = match self.queue.front(deq, guard) {
                Some(front) => front,
                None => continue,
            };
            let role = match segment.peek(offset) {
                Some(role) => role,
                // broken or cancelled slot, move `deq` past it
                None => {
                    self.queue.skip(deq);
                    continue;
                }
            };

            if !role.matches(op.role()) {
                if probe {
                    return Outcome::Declined(op);
                }
                // the queue holds our side up to `limit`, nothing to meet before it
                let limit = enq;
                let mut enq = enq;
                loop {
                    match self.enqueue(enq, op, guard) {
                        Ok(outcome) => return outcome,
                        Err(back) => op = back,
                    }
                    let (e, d) = self.queue.indices();
                    // the queue may have drained and changed side
                    if d >= limit {
                        continue 'retry;
                    }
                    enq = e;
                }
            }

            // `deq` moved or the waiter got cleaned first
            let claimed = match self.queue.claim(deq, segment, offset) {
                Some(claimed) => claimed,
                None => continue,
            };
            match Self::hand_off(op, claimed) {
                Ok(v) => return Outcome::Done(v),
                // the partner gave up after we claimed its slot
                Err(back) => {
                    segment.count_cleaned(guard);
                    op = back;
                }
            }
        }
    }

    // complete the rendezvous with a claimed partner
    fn hand_off(op: Op<T>, claimed: Claimed<T, Waiter<T>>) -> Result<Option<T>, Op<T>> {
        let Claimed { handle, value } = claimed;
        let waiter = match handle {
            Handle::Waiting(waiter) => waiter,
            Handle::Unlimited => match op {
                Op::Receive => {
                    trace!("deposit received");
                    return Ok(value);
                }
                _ => unreachable!("deposit matched a sender"),
            },
        };
        let mut resume = match waiter.try_acquire() {
            Some(resume) => resume,
            None => return Err(op),
        };
        match op {
            Op::Receive => {
                trace!("sender resumed");
                Ok(resume.take())
            }
            Op::Send(v) | Op::Deposit(v) => {
                resume.put(v);
                trace!("receiver resumed");
                Ok(None)
            }
        }
    }

    // try to park `op` at `enq`, hands the op back if the slot was lost
    fn enqueue(&self, enq: u64, op: Op<T>, guard: &Guard) -> Result<Outcome<T>, Op<T>> {
        match op {
            Op::Deposit(v) => {
                match self
                    .queue
                    .enqueue(enq, Occupant::Buffered(v), Handle::Unlimited, guard)
                {
                    Ok(parked) => {
                        trace!("value deposited at {}:{}", parked.segment_id(), parked.offset());
                        Ok(Outcome::Done(None))
                    }
                    Err(Occupant::Buffered(v)) => Err(Op::Deposit(v)),
                    Err(_) => unreachable!("deposit came back without its value"),
                }
            }
            Op::Receive => {
                let waiter = Arc::new(Waiter::new(None));
                let handle = Handle::Waiting(waiter.clone());
                match self.queue.enqueue(enq, Occupant::Receiver, handle, guard) {
                    Ok(parked) => {
                        trace!("receiver parked at {}:{}", parked.segment_id(), parked.offset());
                        Ok(Outcome::Parked(waiter, parked.ticket()))
                    }
                    Err(_) => Err(Op::Receive),
                }
            }
            Op::Send(v) => {
                let waiter = Arc::new(Waiter::new(Some(v)));
                let handle = Handle::Waiting(waiter.clone());
                match self.queue.enqueue(enq, Occupant::Sender, handle, guard) {
                    Ok(parked) => {
                        trace!("sender parked at {}:{}", parked.segment_id(), parked.offset());
                        Ok(Outcome::Parked(waiter, parked.ticket()))
                    }
                    // the queue dropped its handle, the waiter is ours again
                    Err(_) => match Waiter::into_value(waiter) {
                        Some(v) => Err(Op::Send(v)),
                        None => unreachable!("unpublished sender lost its value"),
                    },
                }
            }
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Channel").field("queue", &self.queue).finish()
    }
}


#[cfg(all(nightly, test))]
mod bench {
    extern crate test;
    use self::test::Bencher;
    use super::*;

    use std::thread;

    #[bench]
    fn deposit_and_poll(b: &mut Bencher) {
        let ch = Channel::new();
        let mut i = 0;
        b.iter(|| {
            ch.offer_unlimited(i);
            assert_eq!(ch.poll(), Some(i));
            i += 1;
        });
    }

    #[bench]
    fn hand_off_1p1c(b: &mut Bencher) {
        b.iter(|| {
            let ch = Channel::new();
            let total_work: usize = 10_000;
            thread::scope(|s| {
                s.spawn(|| {
                    for i in 0..total_work {
                        ch.send(i);
                    }
                });
                for i in 0..total_work {
                    assert_eq!(ch.recv(), i);
                }
            });
        });
    }
}
