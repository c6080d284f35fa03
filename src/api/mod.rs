//! HTTP layer for the AppBuilder console API
//!
//! - [`AppBuilderClient`]: conversations, file upload and runs of one app
//! - [`AppsClient`]: listing and describing hosted apps
//! - [`ResponseIterator`]: pull-based answers of a run, streamed over SSE or buffered

mod apps;
mod client;
mod request;
mod response;
mod sse;
mod streaming;

pub use apps::AppsClient;
pub use client::AppBuilderClient;
pub use request::{
    DescribeAppsRequest, FunctionSpec, GetAppListRequest, RunRequest, Tool, ToolChoice,
    ToolChoiceFunction, ToolOutput,
};
pub use response::{
    AnswerEvent, App, DescribeAppsResponse, FunctionCall, GetAppListResponse, RunAnswer, ToolCall,
    Usage,
};
pub use sse::{EventReader, FrameError, RawEvent, DEFAULT_MAX_LINE_BYTES};
pub use streaming::{
    BodyStream, BufferedAnswer, ResponseIterator, StreamError, StreamState, StreamingAnswers,
};

use crate::config::ConfigError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("requestID={request_id}, rate limited: retry after {retry_after_secs} seconds")]
    RateLimited {
        request_id: String,
        retry_after_secs: u64,
    },

    #[error("requestID={request_id}, http status code is {status}, body is {body}")]
    Status {
        request_id: String,
        status: u16,
        body: String,
    },

    #[error("requestID={request_id}, err={source}")]
    Read {
        request_id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("requestID={request_id}, err={source}")]
    Decode {
        request_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("requestID={request_id}, missing {field}, body={body}")]
    MissingField {
        request_id: String,
        field: &'static str,
        body: String,
    },

    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ApiError {
    /// Correlation id, for errors raised after the service answered
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ApiError::RateLimited { request_id, .. }
            | ApiError::Status { request_id, .. }
            | ApiError::Read { request_id, .. }
            | ApiError::Decode { request_id, .. }
            | ApiError::MissingField { request_id, .. } => Some(request_id),
            _ => None,
        }
    }
}

/// Executes prepared requests. Retries, pooling and TLS belong here.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error>;
}

#[async_trait]
impl HttpTransport for reqwest::Client {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
        reqwest::Client::execute(self, request).await
    }
}
