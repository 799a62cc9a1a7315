//! Content type detection from a stream's leading bytes.
//!
//! [`sniff`] wraps a byte stream in a pass-through adapter that keeps a copy of the first
//! [`SAMPLE_LEN`] bytes. Once the sample is full, or the stream ends early, the sample is matched
//! against known file signatures and the result is delivered through the paired [`Detection`].

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use actix_web::web::{Bytes, BytesMut};
use futures_core::Stream;
use tokio::sync::oneshot;

/// Number of leading bytes inspected for a file signature.
pub const SAMPLE_LEN: usize = 4100;

/// A detected file type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileKind {
    /// Detected MIME type, e.g. `image/png`.
    pub mime_type: String,

    /// Detected file extension including the leading dot, e.g. `.png`.
    pub extension: String,
}

impl FileKind {
    /// Matches `sample` against known file signatures.
    pub fn detect(sample: &[u8]) -> Option<Self> {
        infer::get(sample).map(|kind| FileKind {
            mime_type: kind.mime_type().to_owned(),
            extension: format!(".{}", kind.extension()),
        })
    }
}

/// Wraps `stream`, returning the pass-through stream and a future for its detected file type.
///
/// The returned stream yields every item of `stream` unchanged.
pub fn sniff<S>(stream: S) -> (SniffStream<S>, Detection) {
    let (tx, rx) = oneshot::channel();

    let stream = SniffStream {
        stream,
        sample: BytesMut::new(),
        tx: Some(tx),
    };

    (stream, Detection { rx })
}

/// Pass-through stream returned by [`sniff`].
#[derive(Debug)]
pub struct SniffStream<S> {
    stream: S,
    sample: BytesMut,
    /// Taken once the detection has been sent.
    tx: Option<oneshot::Sender<Option<FileKind>>>,
}

impl<S> SniffStream<S> {
    fn resolve(&mut self) {
        if let Some(tx) = self.tx.take() {
            let kind = FileKind::detect(&self.sample);
            log::trace!("detected file kind: {kind:?}");

            // receiver may be gone already
            let _ = tx.send(kind);
            self.sample = BytesMut::new();
        }
    }

    fn fail(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(None);
        }
    }
}

impl<S, E> Stream for SniffStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if this.tx.is_some() {
                    let take = (SAMPLE_LEN - this.sample.len()).min(chunk.len());
                    this.sample.extend_from_slice(&chunk[..take]);

                    if this.sample.len() == SAMPLE_LEN {
                        this.resolve();
                    }
                }

                Poll::Ready(Some(Ok(chunk)))
            }

            Poll::Ready(Some(Err(err))) => {
                this.fail();
                Poll::Ready(Some(Err(err)))
            }

            Poll::Ready(None) => {
                this.resolve();
                Poll::Ready(None)
            }

            Poll::Pending => Poll::Pending,
        }
    }
}

/// Future resolving to the file type detected by the paired [`SniffStream`].
///
/// Resolves to `None` if the signature is not recognised, the stream failed, or the stream was
/// dropped before enough bytes were seen.
#[derive(Debug)]
pub struct Detection {
    rx: oneshot::Receiver<Option<FileKind>>,
}

impl Future for Detection {
    type Output = Option<FileKind>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.ok().flatten())
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use actix_web::error::PayloadError;
    use futures_test::stream::StreamTestExt as _;
    use futures_util::{stream, FutureExt as _, StreamExt as _, TryStreamExt as _};

    use super::*;

    const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x80\x00\x00\xff\xff\xff\x00\x00\x00!\xf9\x04";

    fn chunks(data: &'static [u8], size: usize) -> Vec<Result<Bytes, Infallible>> {
        data.chunks(size)
            .map(|chunk| Ok(Bytes::from_static(chunk)))
            .collect()
    }

    #[actix_rt::test]
    async fn pass_through_is_byte_identical() {
        let data: Bytes = (0..10_000_u32).map(|n| b'a' + (n % 26) as u8).collect();
        let parts = (0..data.len())
            .step_by(777)
            .map(|start| Ok::<_, Infallible>(data.slice(start..(start + 777).min(data.len()))));

        let (stream, detection) = sniff(stream::iter(parts).interleave_pending());
        let out: Vec<Bytes> = stream.try_collect().await.unwrap();

        assert_eq!(out.len(), 13);
        assert_eq!(out.concat(), data);
        assert_eq!(detection.await, None);
    }

    #[actix_rt::test]
    async fn detects_across_chunks() {
        let (stream, detection) = sniff(stream::iter(chunks(GIF, 2)).interleave_pending());
        let out: Vec<Bytes> = stream.try_collect().await.unwrap();

        assert_eq!(out.concat(), GIF);
        assert_eq!(
            detection.await,
            Some(FileKind {
                mime_type: "image/gif".to_owned(),
                extension: ".gif".to_owned(),
            })
        );
    }

    #[actix_rt::test]
    async fn detects_midi() {
        let data = b"MThd\x00\x00\x00\x06\x00\x01\x00\x01\x00\x60MTrk";
        let (stream, detection) = sniff(stream::iter([Ok::<_, Infallible>(
            Bytes::from_static(data),
        )]));
        let _: Vec<Bytes> = stream.try_collect().await.unwrap();

        let kind = detection.await.unwrap();
        assert_eq!(kind.mime_type, "audio/midi");
        assert_eq!(kind.extension, ".midi");
    }

    #[actix_rt::test]
    async fn empty_stream_is_undetected() {
        let (stream, detection) = sniff(stream::empty::<Result<Bytes, Infallible>>());
        assert_eq!(stream.count().await, 0);
        assert_eq!(detection.await, None);
    }

    #[actix_rt::test]
    async fn plain_text_is_undetected() {
        let (stream, detection) = sniff(stream::iter(chunks(b"just some plain words", 4)));
        let _: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(detection.await, None);
    }

    #[actix_rt::test]
    async fn resolves_once_sample_is_full() {
        let mut data = GIF.to_vec();
        data.resize(SAMPLE_LEN + 10, 0);

        // the stream never ends
        let inner = stream::iter([Ok::<_, Infallible>(Bytes::from(data))]).chain(stream::pending());
        let (mut stream, detection) = sniff(inner);

        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk.len(), SAMPLE_LEN + 10);

        let kind = detection.now_or_never().expect("detection should be ready");
        assert_eq!(kind.unwrap().mime_type, "image/gif");
    }

    #[actix_rt::test]
    async fn stream_error_is_passed_through() {
        let inner = stream::iter([
            Ok(Bytes::from_static(&GIF[..4])),
            Err(PayloadError::Incomplete(None)),
        ]);
        let (mut stream, detection) = sniff(inner);

        assert_eq!(stream.next().await.unwrap().unwrap(), &GIF[..4]);
        assert!(matches!(
            stream.next().await,
            Some(Err(PayloadError::Incomplete(None)))
        ));
        assert_eq!(detection.await, None);
    }

    #[actix_rt::test]
    async fn dropped_stream_is_undetected() {
        let (stream, detection) = sniff(stream::iter(chunks(GIF, 3)));
        drop(stream);
        assert_eq!(detection.await, None);
    }
}
