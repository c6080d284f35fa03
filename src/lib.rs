//! AppBuilder - client for hosted conversational apps
//!
//! This library talks to the AppBuilder console API: it lists and describes
//! hosted apps, opens conversations, uploads files and runs conversational
//! turns.
//!
//! ## Key Features
//!
//! - **Streaming Runs**: Server-Sent-Events answers pulled one at a time through [`ResponseIterator`]
//! - **Buffered Runs**: The same pull interface over a single JSON reply
//! - **Tool Calls**: Declare local functions and feed their outputs back into a run
//! - **Explicit Configuration**: TOML file plus environment overrides, passed to every client

pub mod api;
pub mod config;

pub use api::{
    ApiError, App, AppBuilderClient, AppsClient, EventReader, HttpTransport, RawEvent,
    ResponseIterator, RunAnswer, RunRequest, StreamError, StreamState,
};
pub use config::{Config, ConfigBuilder, ConfigError};
