//! Pull-based answer iteration over run responses
//!
//! A run either streams SSE frames (one answer per frame) or returns a
//! single JSON body. [`ResponseIterator`] exposes both behind one `next()`.

use super::response::ServerErrorBody;
use super::sse::{EventReader, FrameError, DEFAULT_MAX_LINE_BYTES};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::error::Error as StdError;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Response body as handed over by the transport
pub type BodyStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Errors raised while pulling answers.
///
/// Cloneable so a failed iterator can keep returning the same error.
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    #[error("requestID={request_id}, err={source}")]
    Framing {
        request_id: String,
        #[source]
        source: FrameError,
    },

    #[error("requestID={request_id}, transport error: {source}")]
    Transport {
        request_id: String,
        #[source]
        source: Arc<dyn StdError + Send + Sync>,
    },

    #[error("requestID={request_id}, failed to decode answer: {source}")]
    Decode {
        request_id: String,
        #[source]
        source: Arc<serde_json::Error>,
    },

    #[error("requestID={request_id}, server error {code}: {message}")]
    Server {
        request_id: String,
        code: String,
        message: String,
    },
}

impl StreamError {
    /// Correlation id of the request this error belongs to
    pub fn request_id(&self) -> &str {
        match self {
            StreamError::Framing { request_id, .. }
            | StreamError::Transport { request_id, .. }
            | StreamError::Decode { request_id, .. }
            | StreamError::Server { request_id, .. } => request_id,
        }
    }

    fn from_frame(err: FrameError, request_id: &str) -> Self {
        let request_id = request_id.to_string();
        match err {
            FrameError::Transport(source) => StreamError::Transport { request_id, source },
            source => StreamError::Framing { request_id, source },
        }
    }
}

/// Lifecycle of an iterator. Terminal states never go back to `Active`.
#[derive(Debug, Clone)]
pub enum StreamState {
    Active,
    Exhausted,
    Failed(StreamError),
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamState::Active)
    }
}

/// Decode one payload, recognising the service's error envelope first
pub(crate) fn decode_payload<T: DeserializeOwned>(
    payload: &[u8],
    request_id: &str,
) -> Result<T, StreamError> {
    if let Ok(failure) = serde_json::from_slice::<ServerErrorBody>(payload) {
        let code = failure.code_text();
        return Err(StreamError::Server {
            request_id: if failure.request_id.is_empty() {
                request_id.to_string()
            } else {
                failure.request_id
            },
            code,
            message: failure.message,
        });
    }

    serde_json::from_slice(payload).map_err(|e| StreamError::Decode {
        request_id: request_id.to_string(),
        source: Arc::new(e),
    })
}

/// Streaming variant: one answer per SSE frame
pub struct StreamingAnswers<T, S = BodyStream> {
    request_id: String,
    reader: EventReader<S>,
    state: StreamState,
    _answer: PhantomData<fn() -> T>,
}

impl<T, S, B, E> StreamingAnswers<T, S>
where
    T: DeserializeOwned,
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    pub fn new(body: S, request_id: impl Into<String>, max_line_bytes: usize) -> Self {
        Self {
            request_id: request_id.into(),
            reader: EventReader::with_max_line_bytes(body, max_line_bytes),
            state: StreamState::Active,
            _answer: PhantomData,
        }
    }

    pub async fn next(&mut self) -> Result<Option<T>, StreamError> {
        match &self.state {
            StreamState::Active => {}
            StreamState::Exhausted => return Ok(None),
            StreamState::Failed(err) => return Err(err.clone()),
        }

        match self.reader.next_event().await {
            Ok(Some(event)) => match decode_payload(event.data.as_bytes(), &self.request_id) {
                Ok(answer) => Ok(Some(answer)),
                Err(err) => Err(self.fail(err)),
            },
            Ok(None) => {
                self.finish();
                Ok(None)
            }
            Err(err) => Err(self.fail(StreamError::from_frame(err, &self.request_id))),
        }
    }
}

impl<T, S> StreamingAnswers<T, S> {
    pub fn close(&mut self) {
        if !self.state.is_terminal() {
            self.finish();
        }
    }

    fn finish(&mut self) {
        self.reader.close();
        self.state = StreamState::Exhausted;
        debug!(request_id = %self.request_id, "answer stream exhausted");
    }

    fn fail(&mut self, err: StreamError) -> StreamError {
        self.reader.close();
        warn!(request_id = %self.request_id, error = %err, "answer stream failed");
        self.state = StreamState::Failed(err.clone());
        err
    }
}

/// Non-streaming variant: the whole body is one answer
pub struct BufferedAnswer<T, S = BodyStream> {
    request_id: String,
    body: Option<S>,
    state: StreamState,
    _answer: PhantomData<fn() -> T>,
}

impl<T, S, B, E> BufferedAnswer<T, S>
where
    T: DeserializeOwned,
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    pub fn new(body: S, request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            body: Some(body),
            state: StreamState::Active,
            _answer: PhantomData,
        }
    }

    /// Yields the decoded body once, then always `Ok(None)`
    pub async fn next(&mut self) -> Result<Option<T>, StreamError> {
        let Some(mut body) = self.body.take() else {
            return Ok(None);
        };
        // The body is released on return whatever the outcome
        let result = self.read_all(&mut body).await;
        drop(body);

        let outcome = result.and_then(|payload| decode_payload(&payload, &self.request_id));
        match outcome {
            Ok(answer) => {
                self.state = StreamState::Exhausted;
                Ok(Some(answer))
            }
            Err(err) => {
                warn!(request_id = %self.request_id, error = %err, "buffered answer failed");
                self.state = StreamState::Failed(err.clone());
                Err(err)
            }
        }
    }

    async fn read_all(&self, body: &mut S) -> Result<Vec<u8>, StreamError> {
        let mut payload = Vec::new();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => payload.extend_from_slice(chunk.as_ref()),
                Err(e) => {
                    let source: Box<dyn StdError + Send + Sync> = e.into();
                    return Err(StreamError::Transport {
                        request_id: self.request_id.clone(),
                        source: Arc::from(source),
                    });
                }
            }
        }
        Ok(payload)
    }
}

impl<T, S> BufferedAnswer<T, S> {
    pub fn close(&mut self) {
        self.body = None;
        if !self.state.is_terminal() {
            self.state = StreamState::Exhausted;
        }
    }
}

/// Answers of one run, streamed or buffered depending on the request
pub enum ResponseIterator<T, S = BodyStream> {
    Streaming(StreamingAnswers<T, S>),
    Buffered(BufferedAnswer<T, S>),
}

impl<T, S, B, E> ResponseIterator<T, S>
where
    T: DeserializeOwned,
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    pub fn new(
        body: S,
        request_id: impl Into<String>,
        streaming: bool,
        max_line_bytes: usize,
    ) -> Self {
        if streaming {
            ResponseIterator::Streaming(StreamingAnswers::new(body, request_id, max_line_bytes))
        } else {
            ResponseIterator::Buffered(BufferedAnswer::new(body, request_id))
        }
    }

    /// Streaming iterator with the default line bound
    pub fn streaming(body: S, request_id: impl Into<String>) -> Self {
        Self::new(body, request_id, true, DEFAULT_MAX_LINE_BYTES)
    }

    /// Buffered iterator over a single JSON body
    pub fn buffered(body: S, request_id: impl Into<String>) -> Self {
        Self::new(body, request_id, false, DEFAULT_MAX_LINE_BYTES)
    }

    /// Pull the next answer.
    ///
    /// `Ok(Some)` is an answer, `Ok(None)` the end of the run. Once the
    /// iterator has ended or failed it keeps returning the same outcome
    /// without touching the body again.
    pub async fn next(&mut self) -> Result<Option<T>, StreamError> {
        match self {
            ResponseIterator::Streaming(answers) => answers.next().await,
            ResponseIterator::Buffered(answer) => answer.next().await,
        }
    }

    /// Adapt into a `Stream` that ends after the first error
    pub fn into_stream(self) -> impl Stream<Item = Result<T, StreamError>> {
        stream::unfold(Some(self), |iterator| async move {
            let Some(mut iterator) = iterator else {
                return None;
            };
            match iterator.next().await {
                Ok(Some(answer)) => Some((Ok(answer), Some(iterator))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}

impl<T, S> ResponseIterator<T, S> {
    /// Abandon the run and release the body. Safe to call repeatedly.
    pub fn close(&mut self) {
        match self {
            ResponseIterator::Streaming(answers) => answers.close(),
            ResponseIterator::Buffered(answer) => answer.close(),
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            ResponseIterator::Streaming(answers) => &answers.request_id,
            ResponseIterator::Buffered(answer) => &answer.request_id,
        }
    }

    pub fn state(&self) -> &StreamState {
        match self {
            ResponseIterator::Streaming(answers) => &answers.state,
            ResponseIterator::Buffered(answer) => &answer.state,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, ResponseIterator::Streaming(_))
    }
}
