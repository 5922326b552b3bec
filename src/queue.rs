//! The completion queue: a closable, bounded, multi-producer/single-consumer
//! channel carrying scheduled tasks to the executor.
//!
//! This is a thin layer over [`std::sync::mpsc::sync_channel`] that adds an
//! explicit, idempotent [`Sender::close`]. Closing pushes an in-band marker,
//! so the consumer still drains every item sent before the close and then
//! observes [`RecvError::Closed`] instead of blocking forever. Dropping every
//! [`Sender`] closes the queue the same way.

use std::cell::Cell;
use std::fmt;
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

enum Message<T> {
    Item(T),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    #[error("completion queue is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryRecvError {
    #[error("completion queue is empty")]
    Empty,
    #[error("completion queue is closed")]
    Closed,
}

/// Producer half of the completion queue. Cheap to clone, safe to share
/// between threads.
pub struct Sender<T> {
    tx: SyncSender<Message<T>>,
    // Sends hold the read side for the duration of the push, `close` takes
    // the write side, so nothing can be enqueued behind the close marker.
    closed: Arc<RwLock<bool>>,
}

/// Consumer half of the completion queue. There is exactly one.
pub struct Receiver<T> {
    rx: mpsc::Receiver<Message<T>>,
    closed: Cell<bool>,
}

/// Creates a new completion queue holding at most `capacity` items.
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    let tx = Sender {
        tx,
        closed: Arc::new(RwLock::new(false)),
    };
    let rx = Receiver {
        rx,
        closed: Cell::new(false),
    };
    (tx, rx)
}

// === impl Sender ===

impl<T> Sender<T> {
    /// Pushes `item` onto the queue, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Hands `item` back if the queue has been closed or the receiver is gone.
    pub fn send(&self, item: T) -> Result<(), T> {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(item);
        }

        match self.tx.send(Message::Item(item)) {
            Ok(()) => Ok(()),
            Err(mpsc::SendError(Message::Item(item))) => Err(item),
            Err(mpsc::SendError(Message::Close)) => unreachable!("sent an item, got a close marker back"),
        }
    }

    /// Closes the queue for every producer. Idempotent.
    ///
    /// Items sent before the close are still delivered; later sends fail.
    pub fn close(&self) {
        let mut closed = self.closed.write().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return;
        }
        *closed = true;

        tracing::debug!("closing completion queue");
        // the receiver may already be gone, in which case nobody is left to tell
        let _ = self.tx.send(Message::Close);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// === impl Receiver ===

impl<T> Receiver<T> {
    /// Blocks until an item is available or the queue is closed and drained.
    ///
    /// # Errors
    ///
    /// Returns [`RecvError::Closed`] once the queue is closed, and on every
    /// call after that.
    pub fn recv(&self) -> Result<T, RecvError> {
        if self.closed.get() {
            return Err(RecvError::Closed);
        }

        match self.rx.recv() {
            Ok(Message::Item(item)) => Ok(item),
            Ok(Message::Close) | Err(mpsc::RecvError) => {
                self.closed.set(true);
                Err(RecvError::Closed)
            }
        }
    }

    /// Non-blocking variant of [`Receiver::recv`].
    ///
    /// # Errors
    ///
    /// Returns [`TryRecvError::Empty`] when nothing is queued right now and
    /// [`TryRecvError::Closed`] once the queue is closed.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        if self.closed.get() {
            return Err(TryRecvError::Closed);
        }

        match self.rx.try_recv() {
            Ok(Message::Item(item)) => Ok(item),
            Err(mpsc::TryRecvError::Empty) => Err(TryRecvError::Empty),
            Ok(Message::Close) | Err(mpsc::TryRecvError::Disconnected) => {
                self.closed.set(true);
                Err(TryRecvError::Closed)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("closed", &self.closed.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn delivers_in_send_order() {
        let (tx, rx) = channel(16);
        for i in 0..10 {
            tx.send(i).unwrap();
        }
        drop(tx);

        let received: Vec<_> = std::iter::from_fn(|| rx.recv().ok()).collect();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
        assert_eq!(rx.recv(), Err(RecvError::Closed));
    }

    #[test]
    fn close_drains_earlier_items_first() {
        let (tx, rx) = channel(4);
        tx.send("a").unwrap();
        tx.send("b").unwrap();
        tx.close();

        assert_eq!(rx.recv(), Ok("a"));
        assert_eq!(rx.recv(), Ok("b"));
        assert_eq!(rx.recv(), Err(RecvError::Closed));
        // stays closed, even though a sender is still alive
        assert_eq!(rx.recv(), Err(RecvError::Closed));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn close_is_idempotent_across_clones() {
        let (tx, rx) = channel::<u32>(4);
        let tx2 = tx.clone();

        tx.close();
        tx2.close();
        tx.close();

        assert!(tx.is_closed());
        assert!(tx2.is_closed());
        assert_eq!(rx.recv(), Err(RecvError::Closed));
    }

    #[test]
    fn send_after_close_hands_the_item_back() {
        let (tx, _rx) = channel(4);
        tx.close();
        assert_eq!(tx.send(7), Err(7));
    }

    #[test]
    fn send_after_receiver_dropped_hands_the_item_back() {
        let (tx, rx) = channel(4);
        drop(rx);
        assert_eq!(tx.send("lost"), Err("lost"));
    }

    #[test]
    fn try_recv_distinguishes_empty_from_closed() {
        let (tx, rx) = channel::<u8>(1);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        tx.send(1).unwrap();
        assert_eq!(rx.try_recv(), Ok(1));
        drop(tx);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn close_wakes_a_blocked_receiver() {
        let (tx, rx) = channel::<()>(1);

        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.close();
            // keep the sender alive so only the marker can unblock `recv`
            thread::sleep(Duration::from_millis(20));
        });

        assert_eq!(rx.recv(), Err(RecvError::Closed));
        closer.join().unwrap();
    }
}
