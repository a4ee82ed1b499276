//! Decoding of the provider's SSE chat stream.
//!
//! Providers split events across network packets, so bytes are buffered until
//! a complete event (terminated by `\n\n`) is available. Each `data:` payload
//! is decoded into a [`ChatDelta`]; the `[DONE]` sentinel ends the stream.
//! Comment lines (OpenRouter interleaves `: OPENROUTER PROCESSING` keepalives)
//! are skipped.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use crate::client::{ChatStream, UpstreamError};
use crate::models::{ChatDelta, StreamEvent};

/// Wrap a raw byte stream into a stream of decoded chat deltas.
pub fn delta_stream<S, E>(bytes: S) -> ChatStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<UpstreamError> + Send + 'static,
{
    let inner = bytes.map(|item| item.map_err(Into::into));
    Box::pin(DeltaStream {
        inner: Box::pin(inner),
        buffer: BytesMut::new(),
        done: false,
    })
}

struct DeltaStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>,
    buffer: BytesMut,
    done: bool,
}

enum DecodedEvent {
    Delta(ChatDelta),
    Done,
    Skip,
    Invalid(serde_json::Error),
}

impl Stream for DeltaStream {
    type Item = Result<ChatDelta, UpstreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            // Drain complete events already in the buffer.
            while let Some(pos) = find_event_boundary(&this.buffer) {
                let event = this.buffer.split_to(pos + 2);
                match decode_event(&event) {
                    DecodedEvent::Delta(delta) => return Poll::Ready(Some(Ok(delta))),
                    DecodedEvent::Done => {
                        this.done = true;
                        return Poll::Ready(None);
                    }
                    DecodedEvent::Skip => continue,
                    DecodedEvent::Invalid(err) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(err.into())));
                    }
                }
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buffer.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(err))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    // A trailing event may have arrived without its terminator.
                    if !this.buffer.is_empty() {
                        let event = this.buffer.split().freeze();
                        if let DecodedEvent::Delta(delta) = decode_event(&event) {
                            return Poll::Ready(Some(Ok(delta)));
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Position of the first `\n\n` in the buffer.
fn find_event_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == b"\n\n")
}

fn decode_event(raw: &[u8]) -> DecodedEvent {
    let text = String::from_utf8_lossy(raw);
    for line in text.lines() {
        let Some(data) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            return DecodedEvent::Done;
        }
        return match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => {
                let mut delta = ChatDelta::default();
                if let Some(choice) = event.choices.first() {
                    delta.content = choice.delta.content.clone().unwrap_or_default();
                    delta.finish_reason = choice.finish_reason.clone();
                }
                DecodedEvent::Delta(delta)
            }
            Err(err) => DecodedEvent::Invalid(err),
        };
    }
    DecodedEvent::Skip
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks_to_stream(chunks: Vec<&'static [u8]>) -> ChatStream {
        delta_stream(futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok::<_, UpstreamError>(Bytes::from_static(chunk))),
        ))
    }

    async fn collect_deltas(stream: ChatStream) -> Vec<Result<ChatDelta, UpstreamError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn complete_event_decodes() {
        let chunks = vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n".as_slice(),
            b"data: [DONE]\n\n".as_slice(),
        ];
        let deltas = collect_deltas(chunks_to_stream(chunks)).await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap().content, "hi");
    }

    #[tokio::test]
    async fn event_split_across_chunks_is_buffered() {
        let chunks = vec![
            b"data: {\"choices\":[{\"del".as_slice(),
            b"ta\":{\"content\":\"Hello\"}}]}\n".as_slice(),
            b"\ndata: [DONE]\n\n".as_slice(),
        ];
        let deltas = collect_deltas(chunks_to_stream(chunks)).await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap().content, "Hello");
    }

    #[tokio::test]
    async fn multiple_events_in_one_chunk() {
        let chunks = vec![
            concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"b\"},\"finish_reason\":\"stop\"}]}\n\n",
                "data: [DONE]\n\n",
            )
            .as_bytes(),
        ];
        let deltas = collect_deltas(chunks_to_stream(chunks)).await;
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].as_ref().unwrap().content, "a");
        let last = deltas[1].as_ref().unwrap();
        assert_eq!(last.content, "b");
        assert_eq!(last.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn comment_keepalives_are_skipped() {
        let chunks = vec![
            b": OPENROUTER PROCESSING\n\n".as_slice(),
            b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n".as_slice(),
            b"data: [DONE]\n\n".as_slice(),
        ];
        let deltas = collect_deltas(chunks_to_stream(chunks)).await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap().content, "x");
    }

    #[tokio::test]
    async fn nothing_after_done_is_decoded() {
        let chunks = vec![
            b"data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n".as_slice(),
        ];
        let deltas = collect_deltas(chunks_to_stream(chunks)).await;
        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn trailing_event_without_terminator_is_flushed() {
        let chunks = vec![b"data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}".as_slice()];
        let deltas = collect_deltas(chunks_to_stream(chunks)).await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].as_ref().unwrap().content, "end");
    }

    #[tokio::test]
    async fn malformed_json_surfaces_an_error_and_ends() {
        let chunks = vec![
            b"data: {not json}\n\ndata: {\"choices\":[]}\n\n".as_slice(),
        ];
        let deltas = collect_deltas(chunks_to_stream(chunks)).await;
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].is_err());
    }

    #[tokio::test]
    async fn transport_error_is_forwarded() {
        let items: Vec<Result<Bytes, UpstreamError>> = vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            )),
            Err(UpstreamError::Api {
                status: 500,
                message: "connection reset".into(),
            }),
        ];
        let deltas = collect_deltas(delta_stream(futures_util::stream::iter(items))).await;
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].as_ref().unwrap().content, "a");
        assert!(deltas[1].is_err());
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        let deltas = collect_deltas(chunks_to_stream(vec![])).await;
        assert!(deltas.is_empty());
    }
}
