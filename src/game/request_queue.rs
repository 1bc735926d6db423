//! Lock-free request queue between connection handlers and the match tick
//!
//! Connection tasks push validated-later [`Request`]s through cloned
//! [`RequestSender`]s; the tick drains everything pending, in arrival order,
//! before touching any state. Because only the tick applies requests, two
//! conflicting requests are resolved by whichever reached the queue first.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::game::constants::net::REQUEST_QUEUE_CAPACITY;
use crate::lobby::session::SessionId;
use crate::net::protocol::RequestKind;

/// One request, stamped with the session that sent it
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub sender: SessionId,
    pub kind: RequestKind,
}

impl Request {
    pub fn new(sender: SessionId, kind: RequestKind) -> Self {
        Self { sender, kind }
    }
}

pub struct RequestQueue {
    sender: Sender<Request>,
    receiver: Receiver<Request>,
    capacity: usize,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Handle for a connection task
    pub fn sender(&self) -> RequestSender {
        RequestSender {
            sender: self.sender.clone(),
        }
    }

    /// Returns false if the queue is full
    #[inline]
    pub fn try_submit(&self, request: Request) -> bool {
        self.sender.try_send(request).is_ok()
    }

    /// Everything submitted so far, oldest first
    pub fn drain(&self) -> Vec<Request> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(REQUEST_QUEUE_CAPACITY)
    }
}

/// Clonable sender handle for connection handlers
#[derive(Clone)]
pub struct RequestSender {
    sender: Sender<Request>,
}

impl RequestSender {
    #[inline]
    pub fn try_send(&self, sender: SessionId, kind: RequestKind) -> Result<(), RequestQueueError> {
        self.sender
            .try_send(Request::new(sender, kind))
            .map_err(|e| match e {
                TrySendError::Full(_) => RequestQueueError::Full,
                TrySendError::Disconnected(_) => RequestQueueError::Disconnected,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RequestQueueError {
    /// Queue is full (backpressure)
    #[error("request queue full")]
    Full,
    /// Match loop stopped
    #[error("request queue disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_arrival_order() {
        let queue = RequestQueue::new(10);
        let a = queue.sender();
        let b = queue.sender();

        a.try_send(1, RequestKind::SignalJoined).unwrap();
        b.try_send(2, RequestKind::DeclareFinished).unwrap();
        a.try_send(1, RequestKind::SignalCinematicComplete).unwrap();
        assert_eq!(queue.pending_count(), 3);

        let drained = queue.drain();
        assert_eq!(
            drained,
            vec![
                Request::new(1, RequestKind::SignalJoined),
                Request::new(2, RequestKind::DeclareFinished),
                Request::new(1, RequestKind::SignalCinematicComplete),
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_backpressure() {
        let queue = RequestQueue::new(2);
        assert!(queue.try_submit(Request::new(1, RequestKind::SignalJoined)));
        assert!(queue.try_submit(Request::new(1, RequestKind::SignalJoined)));
        assert!(!queue.try_submit(Request::new(1, RequestKind::SignalJoined)));
        assert_eq!(
            queue.sender().try_send(1, RequestKind::SignalJoined),
            Err(RequestQueueError::Full)
        );

        queue.drain();
        assert!(queue.try_submit(Request::new(1, RequestKind::SignalJoined)));
    }

    #[test]
    fn test_disconnected_after_drop() {
        let queue = RequestQueue::new(2);
        let sender = queue.sender();
        drop(queue);
        assert_eq!(
            sender.try_send(1, RequestKind::SignalJoined),
            Err(RequestQueueError::Disconnected)
        );
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(RequestQueue::default().capacity(), REQUEST_QUEUE_CAPACITY);
    }
}
