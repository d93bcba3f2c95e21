//! Request channel between clock callers and the clock worker thread
//!
//! Callers enqueue a [`ClockRequest`] carrying a one-slot reply channel and
//! block on that reply. The worker drains every request queued at wake time
//! and answers all of them with one sample. Closing the channel is the
//! worker's terminal shutdown signal.

use api::Timestamp;
use async_channel::{Receiver, Sender, bounded};
use std::sync::mpsc::{Receiver as ReplyReceiver, SyncSender, sync_channel};

/// A pending monotonic clock query
#[derive(Debug)]
pub struct ClockRequest {
    reply: SyncSender<Timestamp>,
}

impl ClockRequest {
    /// Create a request together with the receiver its answer arrives on
    pub fn new() -> (Self, ReplyReceiver<Timestamp>) {
        let (reply, rx) = sync_channel(1);
        (Self { reply }, rx)
    }

    /// Answer the request
    ///
    /// Returns false if the caller has stopped waiting.
    pub fn respond(self, sample: Timestamp) -> bool {
        self.reply.try_send(sample).is_ok()
    }
}

/// Caller side of the channel
#[derive(Clone)]
pub struct ClockRequester {
    request_tx: Sender<ClockRequest>,
}

impl ClockRequester {
    /// Queue a request (blocks while the queue is full)
    pub fn send_request(&self, request: ClockRequest) -> crate::Result<()> {
        self.request_tx
            .send_blocking(request)
            .map_err(|_| crate::Error::ClockStopped)
    }

    /// Signal the worker to stop
    ///
    /// Returns true only for the call that actually closed the channel.
    pub fn close(&self) -> bool {
        self.request_tx.close()
    }

    /// Whether the shutdown signal has been given
    pub fn is_closed(&self) -> bool {
        self.request_tx.is_closed()
    }
}

/// Worker side of the channel
pub struct ClockResponder {
    request_rx: Receiver<ClockRequest>,
}

impl ClockResponder {
    /// Block until a request arrives
    ///
    /// Fails once the channel is closed and empty.
    pub fn recv_request(&self) -> crate::Result<ClockRequest> {
        self.request_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Take one more queued request without blocking
    pub fn try_recv_request(&self) -> Option<ClockRequest> {
        self.request_rx.try_recv().ok()
    }

    /// Drop every request still queued, returning how many were dropped
    ///
    /// Their callers see the reply channel disconnect.
    pub fn discard_pending(&self) -> usize {
        std::iter::from_fn(|| self.try_recv_request()).count()
    }

    /// Number of requests queued right now
    pub fn pending(&self) -> usize {
        self.request_rx.len()
    }

    /// Whether the shutdown signal has been given
    pub fn is_closed(&self) -> bool {
        self.request_rx.is_closed()
    }
}

/// Create the request channel
///
/// Returns (ClockRequester for callers, ClockResponder for the worker).
/// `capacity` must be non-zero.
pub fn create_clock_channel(capacity: usize) -> crate::Result<(ClockRequester, ClockResponder)> {
    if capacity == 0 {
        return Err(crate::Error::Channel(
            "clock request queue capacity must be non-zero".to_string(),
        ));
    }

    let (request_tx, request_rx) = bounded(capacity);

    Ok((
        ClockRequester { request_tx },
        ClockResponder { request_rx },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_reply_roundtrip() {
        let (requester, responder) = create_clock_channel(4).unwrap();

        let handle = std::thread::spawn(move || {
            let request = responder.recv_request().unwrap();
            request.respond(Timestamp::new(5, 6))
        });

        let (request, reply) = ClockRequest::new();
        requester.send_request(request).unwrap();

        assert_eq!(reply.recv().unwrap(), Timestamp::new(5, 6));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            create_clock_channel(0),
            Err(crate::Error::Channel(_))
        ));
    }

    #[test]
    fn test_close_is_one_shot() {
        let (requester, responder) = create_clock_channel(1).unwrap();

        assert!(requester.close());
        assert!(!requester.close());
        assert!(responder.is_closed());

        let (request, _reply) = ClockRequest::new();
        assert!(matches!(
            requester.send_request(request),
            Err(crate::Error::ClockStopped)
        ));
        assert!(responder.recv_request().is_err());
    }

    #[test]
    fn test_pending_counts_queued_requests() {
        let (requester, responder) = create_clock_channel(8).unwrap();
        let mut replies = Vec::new();
        for _ in 0..3 {
            let (request, reply) = ClockRequest::new();
            requester.send_request(request).unwrap();
            replies.push(reply);
        }

        assert_eq!(responder.pending(), 3);
        assert!(responder.try_recv_request().is_some());
        assert_eq!(responder.pending(), 2);
    }

    #[test]
    fn test_discard_pending_disconnects_callers() {
        let (requester, responder) = create_clock_channel(8).unwrap();
        let mut replies = Vec::new();
        for _ in 0..3 {
            let (request, reply) = ClockRequest::new();
            requester.send_request(request).unwrap();
            replies.push(reply);
        }
        requester.close();

        assert_eq!(responder.discard_pending(), 3);
        assert_eq!(responder.pending(), 0);
        for reply in replies {
            assert!(reply.recv().is_err());
        }
    }

    #[test]
    fn test_respond_after_caller_gone() {
        let (request, reply) = ClockRequest::new();
        drop(reply);
        assert!(!request.respond(Timestamp::default()));
    }
}
