//! Server-Sent Events (SSE) framing for streaming run responses
//!
//! Turns a chunked byte stream into discrete [`RawEvent`] frames:
//! - `field: value` (or `field:value`) lines accumulate into a pending frame
//! - lines starting with `:` are comments
//! - a blank line dispatches the pending frame
//!
//! Lines are bounded by a configurable maximum length. Exceeding it is a
//! framing error, never a silent truncation.

use futures_util::{Stream, StreamExt};
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Default bound on a single line, matching the service's largest frames
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// One decoded SSE frame, before application-level interpretation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// Last numeric id seen on the stream, carried over across frames
    pub id: Option<u64>,
    /// Event tag; empty means the default `message` tag
    pub event: String,
    /// Payload, multiple `data:` lines joined with `\n`
    pub data: String,
}

impl RawEvent {
    /// The event tag with the SSE default applied
    pub fn event_type(&self) -> &str {
        if self.event.is_empty() {
            "message"
        } else {
            &self.event
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum FrameError {
    #[error("line exceeds maximum length of {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("invalid UTF-8 in event stream: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("failed to read event stream: {0}")]
    Transport(#[source] Arc<dyn StdError + Send + Sync>),
}

#[derive(Debug, Default)]
struct PendingFrame {
    event: Option<String>,
    data: Option<String>,
}

impl PendingFrame {
    fn push_data(&mut self, value: &str) {
        match self.data.as_mut() {
            Some(data) => {
                data.push('\n');
                data.push_str(value);
            }
            None => self.data = Some(value.to_string()),
        }
    }

    /// Emit the frame if it carries a payload or a tag, resetting it either way
    fn take(&mut self, id: Option<u64>) -> Option<RawEvent> {
        let frame = std::mem::take(self);
        if frame.event.is_none() && frame.data.is_none() {
            return None;
        }
        Some(RawEvent {
            id,
            event: frame.event.unwrap_or_default(),
            data: frame.data.unwrap_or_default(),
        })
    }
}

/// Lazy, forward-only reader of SSE frames over a chunked byte stream.
///
/// The reader owns its source and drops it as soon as the stream ends or
/// fails, so the underlying connection is released on the first terminal
/// outcome. After that every call returns `Ok(None)` without polling.
pub struct EventReader<S> {
    source: Option<S>,
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline
    scanned: usize,
    max_line_bytes: usize,
    pending: PendingFrame,
    last_id: Option<u64>,
    eof: bool,
}

impl<S, B, E> EventReader<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    pub fn new(source: S) -> Self {
        Self::with_max_line_bytes(source, DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(source: S, max_line_bytes: usize) -> Self {
        Self {
            source: Some(source),
            buffer: Vec::new(),
            scanned: 0,
            max_line_bytes,
            pending: PendingFrame::default(),
            last_id: None,
            eof: false,
        }
    }

    /// Read until the next complete frame.
    ///
    /// Returns `Ok(None)` at end of stream. A frame left open when the
    /// input ends is flushed as the final event.
    pub async fn next_event(&mut self) -> Result<Option<RawEvent>, FrameError> {
        let result = self.read_event().await;
        if result.is_err() {
            self.close();
            self.buffer.clear();
            self.scanned = 0;
            self.pending = PendingFrame::default();
            self.eof = true;
        }
        result
    }

    async fn read_event(&mut self) -> Result<Option<RawEvent>, FrameError> {
        loop {
            if let Some(line) = self.take_line()? {
                if let Some(event) = self.process_line(&line) {
                    return Ok(Some(event));
                }
                continue;
            }

            if self.eof {
                if !self.buffer.is_empty() {
                    // Trailing bytes without a newline form the last line
                    self.buffer.push(b'\n');
                    continue;
                }
                return Ok(self.pending.take(self.last_id));
            }

            self.fill().await?;
        }
    }

    /// Pull one chunk from the source into the line buffer
    async fn fill(&mut self) -> Result<(), FrameError> {
        let Some(source) = self.source.as_mut() else {
            self.eof = true;
            return Ok(());
        };

        match source.next().await {
            Some(Ok(chunk)) => {
                self.buffer.extend_from_slice(chunk.as_ref());
                Ok(())
            }
            Some(Err(e)) => {
                let source: Box<dyn StdError + Send + Sync> = e.into();
                Err(FrameError::Transport(Arc::from(source)))
            }
            None => {
                self.eof = true;
                self.close();
                Ok(())
            }
        }
    }

    fn take_line(&mut self) -> Result<Option<String>, FrameError> {
        let newline = self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|offset| self.scanned + offset);

        match newline {
            Some(pos) => {
                let content = if pos > 0 && self.buffer[pos - 1] == b'\r' {
                    pos - 1
                } else {
                    pos
                };
                if content > self.max_line_bytes {
                    return Err(FrameError::LineTooLong {
                        limit: self.max_line_bytes,
                    });
                }
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                self.scanned = 0;
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                decode_line(line).map(Some)
            }
            None if self.partial_line_len() > self.max_line_bytes => Err(FrameError::LineTooLong {
                limit: self.max_line_bytes,
            }),
            None => {
                self.scanned = self.buffer.len();
                Ok(None)
            }
        }
    }

    /// Length of the incomplete line, not counting a CR that may start its terminator
    fn partial_line_len(&self) -> usize {
        match self.buffer.last() {
            Some(b'\r') => self.buffer.len() - 1,
            _ => self.buffer.len(),
        }
    }

    fn process_line(&mut self, line: &str) -> Option<RawEvent> {
        if line.is_empty() {
            return self.pending.take(self.last_id);
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.pending.event = Some(value.to_string()),
            "data" => self.pending.push_data(value),
            "id" => match value.trim().parse::<u64>() {
                Ok(id) => self.last_id = Some(id),
                Err(_) => trace!(id = value, "ignoring non-numeric SSE id"),
            },
            _ => trace!(field, "ignoring SSE field"),
        }
        None
    }
}

impl<S> EventReader<S> {
    /// Drop the underlying source. Safe to call any number of times.
    pub fn close(&mut self) {
        self.source = None;
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }
}

fn decode_line(bytes: Vec<u8>) -> Result<String, FrameError> {
    String::from_utf8(bytes).map_err(|e| FrameError::InvalidUtf8(e.utf8_error()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tokio_test::{assert_err, assert_ok};

    pub(crate) type Chunk = Result<Vec<u8>, io::Error>;

    /// Test body that counts polls and records when it is dropped
    pub(crate) struct TrackedBody {
        chunks: std::vec::IntoIter<Chunk>,
        pub polls: Arc<AtomicUsize>,
        pub dropped: Arc<AtomicBool>,
    }

    impl TrackedBody {
        pub(crate) fn new(chunks: Vec<Chunk>) -> Self {
            Self {
                chunks: chunks.into_iter(),
                polls: Arc::new(AtomicUsize::new(0)),
                dropped: Arc::new(AtomicBool::new(false)),
            }
        }

        pub(crate) fn text(parts: &[&str]) -> Self {
            Self::new(parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect())
        }
    }

    impl Stream for TrackedBody {
        type Item = Chunk;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Chunk>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(self.chunks.next())
        }
    }

    impl Drop for TrackedBody {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn reader(parts: &[&str]) -> EventReader<TrackedBody> {
        EventReader::new(TrackedBody::text(parts))
    }

    async fn collect(reader: &mut EventReader<TrackedBody>) -> Vec<RawEvent> {
        let mut events = Vec::new();
        while let Some(event) = reader.next_event().await.unwrap() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_two_frames_in_order() {
        let mut r = reader(&["event: message\ndata: {\"answer\":\"a\"}\n\ndata: {\"answer\":\"b\"}\n\n"]);

        let first = r.next_event().await.unwrap().unwrap();
        assert_eq!(first.event, "message");
        assert_eq!(first.data, r#"{"answer":"a"}"#);

        let second = r.next_event().await.unwrap().unwrap();
        assert_eq!(second.event, "");
        assert_eq!(second.event_type(), "message");
        assert_eq!(second.data, r#"{"answer":"b"}"#);

        assert!(r.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_multiline_data_joined() {
        let mut r = reader(&["data: one\ndata: two\ndata:three\n\n"]);
        let events = collect(&mut r).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn test_frame_split_across_chunks() {
        let mut r = reader(&["da", "ta: {\"answ", "er\":1}\r", "\n", "\r\n", "data: x\n", "\n"]);
        let events = collect(&mut r).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, r#"{"answer":1}"#);
        assert_eq!(events[1].data, "x");
    }

    #[tokio::test]
    async fn test_comments_and_empty_frames_skipped() {
        let mut r = reader(&[": keep-alive\n\n\n\ndata: hello\n: trailing comment\n\n"]);
        let events = collect(&mut r).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[tokio::test]
    async fn test_event_only_frame_emitted() {
        let mut r = reader(&["event: ping\n\n"]);
        let event = r.next_event().await.unwrap().unwrap();
        assert_eq!(event.event, "ping");
        assert_eq!(event.data, "");
    }

    #[tokio::test]
    async fn test_id_carries_over_and_bad_id_ignored() {
        let mut r = reader(&[
            "id: 1\ndata: a\n\n",
            "data: b\n\n",
            "id: not-a-number\ndata: c\n\n",
            "id: 4\ndata: d\n\n",
        ]);
        let ids: Vec<_> = collect(&mut r).await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![Some(1), Some(1), Some(1), Some(4)]);
    }

    #[tokio::test]
    async fn test_unterminated_frame_flushed_at_end() {
        let mut r = reader(&["data: first\n\n", "data: partial"]);
        let events = collect(&mut r).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data, "partial");
    }

    #[tokio::test]
    async fn test_value_keeps_inner_whitespace() {
        let mut r = reader(&["data:  two spaces\nunknown: x\nretry: 100\n\n"]);
        let events = collect(&mut r).await;
        assert_eq!(events[0].data, " two spaces");
    }

    #[tokio::test]
    async fn test_oversized_line_is_error() {
        let body = TrackedBody::text(&["data: 0123456789abcdef\n\n", "data: ok\n\n"]);
        let dropped = body.dropped.clone();
        let mut r = EventReader::with_max_line_bytes(body, 8);

        let err = assert_err!(r.next_event().await);
        assert!(matches!(err, FrameError::LineTooLong { limit: 8 }));
        assert!(dropped.load(Ordering::SeqCst));
        assert!(r.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_partial_line_fails_before_newline() {
        let body = TrackedBody::text(&["data: aaaaaaaaaaaa", "aaaaaaaaaaaa"]);
        let mut r = EventReader::with_max_line_bytes(body, 16);
        assert!(matches!(
            r.next_event().await,
            Err(FrameError::LineTooLong { .. })
        ));
    }

    #[tokio::test]
    async fn test_transport_error_surfaces() {
        let body = TrackedBody::new(vec![
            Ok(b"data: a\n\n".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let polls = body.polls.clone();
        let mut r = EventReader::new(body);

        assert_eq!(assert_ok!(r.next_event().await).unwrap().data, "a");
        let err = assert_err!(r.next_event().await);
        assert!(matches!(err, FrameError::Transport(_)));
        assert!(err.to_string().contains("reset"));

        let seen = polls.load(Ordering::SeqCst);
        assert!(r.next_event().await.unwrap().is_none());
        assert_eq!(polls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_transport_error_mid_line_then_end() {
        let body = TrackedBody::new(vec![
            Ok(b"data: partial".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let polls = body.polls.clone();
        let mut r = EventReader::new(body);

        assert!(matches!(
            r.next_event().await,
            Err(FrameError::Transport(_))
        ));
        let seen = polls.load(Ordering::SeqCst);
        assert!(assert_ok!(r.next_event().await).is_none());
        assert!(assert_ok!(r.next_event().await).is_none());
        assert_eq!(polls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_oversized_line_over_chunks_then_end() {
        let body = TrackedBody::text(&["data: aaaa", "aaaaaaaaaaaaaa", "\n\ndata: b\n\n"]);
        let polls = body.polls.clone();
        let mut r = EventReader::with_max_line_bytes(body, 16);

        assert!(matches!(
            r.next_event().await,
            Err(FrameError::LineTooLong { limit: 16 })
        ));
        let seen = polls.load(Ordering::SeqCst);
        assert!(assert_ok!(r.next_event().await).is_none());
        assert_eq!(polls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_line_bound_excludes_crlf() {
        // "data: 0123456789" is exactly 16 bytes
        let body = TrackedBody::text(&["data: 0123456789\r", "\n\r\n"]);
        let mut r = EventReader::with_max_line_bytes(body, 16);
        assert_eq!(r.next_event().await.unwrap().unwrap().data, "0123456789");

        let body = TrackedBody::text(&["data: 0123456789a\r\n\r\n"]);
        let mut r = EventReader::with_max_line_bytes(body, 16);
        assert!(matches!(
            r.next_event().await,
            Err(FrameError::LineTooLong { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_error() {
        let body = TrackedBody::new(vec![Ok(vec![b'd', b'a', b't', b'a', b':', 0xff, b'\n'])]);
        let mut r = EventReader::new(body);
        assert!(matches!(
            r.next_event().await,
            Err(FrameError::InvalidUtf8(_))
        ));
    }

    #[tokio::test]
    async fn test_source_released_at_end() {
        let body = TrackedBody::text(&["data: a\n\n"]);
        let dropped = body.dropped.clone();
        let mut r = EventReader::new(body);
        collect(&mut r).await;
        assert!(r.is_closed());
        assert!(dropped.load(Ordering::SeqCst));
        r.close();
        assert!(r.is_closed());
    }
}
