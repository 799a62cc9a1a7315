//! Shared handle to the request payload.
//!
//! The decoder reads through a [`TransportReader`] while the orchestrator keeps the [`Transport`].
//! After a failure the decoder is detached and the rest of the body is drained so the connection
//! is left in a clean state.
//!
//! Chunks passing through are scanned for the closing delimiter. A payload that ends without one
//! is reported through [`Transport::truncated`]; the decoder itself never wakes up in that case.

use std::{
    cell::RefCell,
    future::{poll_fn, Future},
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use actix_web::{
    error::PayloadError,
    web::{Bytes, BytesMut},
};
use futures_core::stream::{LocalBoxStream, Stream};
use memchr::memmem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Finished,
    Failed,
}

/// Tracks whether `--boundary--` has gone past, across chunk borders.
struct CloseScanner {
    delimiter: Bytes,
    /// Last `delimiter.len() - 1` bytes seen.
    tail: BytesMut,
    seen: bool,
}

impl CloseScanner {
    fn new(boundary: &str) -> Self {
        Self {
            delimiter: Bytes::from(format!("--{boundary}--")),
            tail: BytesMut::new(),
            seen: false,
        }
    }

    fn scan(&mut self, chunk: &[u8]) {
        if self.seen {
            return;
        }

        let keep = self.delimiter.len() - 1;

        // matches straddling the previous chunk end within its first `keep` bytes
        self.tail.extend_from_slice(&chunk[..chunk.len().min(keep)]);

        if memmem::find(&self.tail, &self.delimiter).is_some()
            || memmem::find(chunk, &self.delimiter).is_some()
        {
            self.seen = true;
            self.tail = BytesMut::new();
            return;
        }

        if chunk.len() >= keep {
            self.tail.clear();
            self.tail.extend_from_slice(&chunk[chunk.len() - keep..]);
        } else {
            let excess = self.tail.len().saturating_sub(keep);
            let _ = self.tail.split_to(excess);
        }
    }
}

struct Shared {
    stream: LocalBoxStream<'static, Result<Bytes, PayloadError>>,
    state: State,
    /// Once set, the reader reports end of stream.
    detached: bool,
    close: Option<CloseScanner>,
    watcher: Option<Waker>,
}

impl Shared {
    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes, PayloadError>>> {
        if self.state != State::Open {
            return Poll::Ready(None);
        }

        let res = match self.stream.as_mut().poll_next(cx) {
            Poll::Ready(res) => res,
            Poll::Pending => return Poll::Pending,
        };

        match res {
            Some(Ok(ref chunk)) => {
                if let Some(ref mut close) = self.close {
                    close.scan(chunk);
                }
            }
            Some(Err(_)) => self.state = State::Failed,
            None => {
                self.state = State::Finished;

                if let Some(watcher) = self.watcher.take() {
                    watcher.wake();
                }
            }
        }

        Poll::Ready(res)
    }

    fn close_seen(&self) -> bool {
        self.close.as_ref().is_some_and(|close| close.seen)
    }

    fn is_truncated(&self) -> bool {
        self.state == State::Finished && self.close.is_some() && !self.close_seen()
    }
}

/// Orchestrator side of the payload.
pub(crate) struct Transport {
    shared: Rc<RefCell<Shared>>,
}

impl Transport {
    /// Wraps `stream`, returning the handle and the reader to give to the decoder.
    ///
    /// Without a `boundary` the payload is never reported as truncated.
    pub(crate) fn new<S>(stream: S, boundary: Option<&str>) -> (Transport, TransportReader)
    where
        S: Stream<Item = Result<Bytes, PayloadError>> + 'static,
    {
        let shared = Rc::new(RefCell::new(Shared {
            stream: Box::pin(stream),
            state: State::Open,
            detached: false,
            close: boundary.map(CloseScanner::new),
            watcher: None,
        }));

        let reader = TransportReader {
            shared: Rc::clone(&shared),
        };

        (Transport { shared }, reader)
    }

    /// Returns true once the closing delimiter has passed through the reader.
    pub(crate) fn close_seen(&self) -> bool {
        self.shared.borrow().close_seen()
    }

    /// Resolves once the payload has ended without a closing delimiter.
    pub(crate) fn truncated(&self) -> impl Future<Output = ()> + '_ {
        poll_fn(|cx| {
            let mut shared = self.shared.borrow_mut();

            if shared.is_truncated() {
                return Poll::Ready(());
            }

            shared.watcher = Some(cx.waker().clone());
            Poll::Pending
        })
    }

    /// Stops the reader from yielding any more data.
    pub(crate) fn detach(&self) {
        self.shared.borrow_mut().detached = true;
    }

    /// Reads and discards the rest of the payload, returning the number of bytes discarded.
    ///
    /// Resolves once the payload has finished or failed.
    pub(crate) async fn drain(&self) -> u64 {
        let mut drained = 0_u64;

        poll_fn(|cx| loop {
            match self.shared.borrow_mut().poll_chunk(cx) {
                Poll::Ready(Some(Ok(chunk))) => drained += chunk.len() as u64,
                Poll::Ready(Some(Err(err))) => {
                    log::debug!("payload failed while draining: {err}");
                    return Poll::Ready(());
                }
                Poll::Ready(None) => return Poll::Ready(()),
                Poll::Pending => return Poll::Pending,
            }
        })
        .await;

        drained
    }
}

/// Decoder side of the payload.
pub(crate) struct TransportReader {
    shared: Rc<RefCell<Shared>>,
}

impl Stream for TransportReader {
    type Item = Result<Bytes, PayloadError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut shared = self.shared.borrow_mut();

        if shared.detached {
            return Poll::Ready(None);
        }

        shared.poll_chunk(cx)
    }
}
