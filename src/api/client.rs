//! Client for conversations and runs of a single app

use super::request::RunRequest;
use super::response::RunAnswer;
use super::streaming::{BodyStream, ResponseIterator};
use super::{ApiError, HttpTransport};
use crate::config::Config;
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub(crate) const REQUEST_ID_HEADER: &str = "X-Appbuilder-Request-Id";

/// Shared request plumbing: URL, auth headers, status check
#[derive(Clone)]
pub(crate) struct Gateway {
    config: Arc<Config>,
    /// Only used to assemble requests; `transport` sends them
    builder: reqwest::Client,
    transport: Arc<dyn HttpTransport>,
}

impl Gateway {
    pub(crate) fn new(config: Config) -> Result<Self, ApiError> {
        let client = sdk_client()?;
        Ok(Self {
            config: Arc::new(config),
            builder: client.clone(),
            transport: Arc::new(client),
        })
    }

    pub(crate) fn with_transport(
        config: Config,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            config: Arc::new(config),
            builder: sdk_client()?,
            transport,
        })
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Start a request to a console endpoint with auth headers and a fresh request id
    pub(crate) fn request(
        &self,
        method: Method,
        suffix: &str,
    ) -> Result<(RequestBuilder, String), ApiError> {
        let url = self.config.service_url(suffix)?;
        let authorization = self
            .config
            .authorization()
            .ok_or_else(|| ApiError::Auth("secret key is not configured".to_string()))?;
        let request_id = Uuid::new_v4().to_string();

        let builder = self
            .builder
            .request(method, url)
            .header(USER_AGENT, sdk_user_agent())
            .header(AUTHORIZATION, authorization)
            .header("X-Appbuilder-Origin", "appbuilder_sdk")
            .header("X-Appbuilder-Sdk-Config", sdk_config_header())
            .header(REQUEST_ID_HEADER, &request_id)
            .timeout(self.config.timeout());

        Ok((builder, request_id))
    }

    /// Send and check the status. Returns the response and its correlation id.
    pub(crate) async fn send(
        &self,
        builder: RequestBuilder,
        request_id: String,
    ) -> Result<(Response, String), ApiError> {
        let request = builder.build()?;
        debug!("{}", curl_command(&request));

        let response = self.transport.execute(request).await?;
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or(request_id);

        check_status(response, request_id).await
    }

    /// Send and decode a JSON reply
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        request_id: String,
    ) -> Result<(T, String), ApiError> {
        let (body, request_id) = self.send_for_body(builder, request_id).await?;
        let value = serde_json::from_slice(&body).map_err(|source| ApiError::Decode {
            request_id: request_id.clone(),
            source,
        })?;
        Ok((value, request_id))
    }

    async fn send_for_body(
        &self,
        builder: RequestBuilder,
        request_id: String,
    ) -> Result<(Vec<u8>, String), ApiError> {
        let (response, request_id) = self.send(builder, request_id).await?;
        match response.bytes().await {
            Ok(body) => Ok((body.to_vec(), request_id)),
            Err(source) => Err(ApiError::Read { request_id, source }),
        }
    }
}

fn sdk_client() -> Result<reqwest::Client, ApiError> {
    Ok(reqwest::Client::builder()
        .user_agent(sdk_user_agent())
        .build()?)
}

fn sdk_user_agent() -> String {
    format!("appbuilder-sdk-rust/{}", env!("CARGO_PKG_VERSION"))
}

async fn check_status(response: Response, request_id: String) -> Result<(Response, String), ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok((response, request_id));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        if let Some(retry_after_secs) = retry_after {
            return Err(ApiError::RateLimited {
                request_id,
                retry_after_secs,
            });
        }
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            debug!(request_id = %request_id, error = %e, "failed to read error body");
            String::new()
        }
    };
    Err(ApiError::Status {
        request_id,
        status: status.as_u16(),
        body,
    })
}

fn sdk_config_header() -> String {
    json!({
        "appbuilder_sdk_version": env!("CARGO_PKG_VERSION"),
        "appbuilder_sdk_language": "rust",
    })
    .to_string()
}

/// Equivalent curl command for debugging, with the credential masked
pub(crate) fn curl_command(request: &Request) -> String {
    let mut parts = vec![format!("curl -L '{}'", request.url()), format!("-X {}", request.method())];

    for (name, value) in request.headers() {
        let value = if name == AUTHORIZATION {
            "***"
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        parts.push(format!("-H '{}: {}'", name, value));
    }

    if let Some(body) = request.body().and_then(|b| b.as_bytes()) {
        parts.push(format!("-d '{}'", String::from_utf8_lossy(body)));
    }

    parts.join(" \\\n  ")
}

/// Client bound to one app
#[derive(Clone)]
pub struct AppBuilderClient {
    app_id: String,
    gateway: Gateway,
}

impl AppBuilderClient {
    pub fn new(app_id: impl Into<String>, config: Config) -> Result<Self, ApiError> {
        let app_id = non_empty_app_id(app_id.into())?;
        Ok(Self {
            app_id,
            gateway: Gateway::new(config)?,
        })
    }

    /// Use a caller-supplied transport instead of the default reqwest client
    pub fn with_transport(
        app_id: impl Into<String>,
        config: Config,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ApiError> {
        let app_id = non_empty_app_id(app_id.into())?;
        Ok(Self {
            app_id,
            gateway: Gateway::with_transport(config, transport)?,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn config(&self) -> &Config {
        self.gateway.config()
    }

    /// Open a new conversation and return its id
    pub async fn create_conversation(&self) -> Result<String, ApiError> {
        let (builder, request_id) = self.gateway.request(Method::POST, "/app/conversation")?;
        let builder = builder.json(&json!({ "app_id": self.app_id }));

        let (body, request_id): (Value, String) = self.gateway.send_json(builder, request_id).await?;
        string_field(&body, "conversation_id", request_id)
    }

    /// Upload a local file into a conversation and return the file id
    pub async fn upload_local_file(
        &self,
        conversation_id: &str,
        path: impl AsRef<Path>,
    ) -> Result<String, ApiError> {
        let path = path.as_ref();
        let contents = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let form = Form::new()
            .text("app_id", self.app_id.clone())
            .text("conversation_id", conversation_id.to_string())
            .part("file", Part::bytes(contents).file_name(file_name));

        let (builder, request_id) = self
            .gateway
            .request(Method::POST, "/app/conversation/file/upload")?;
        let builder = builder.multipart(form);

        let (body, request_id): (Value, String) = self.gateway.send_json(builder, request_id).await?;
        string_field(&body, "id", request_id)
    }

    /// Run one conversational turn
    pub async fn run(
        &self,
        conversation_id: &str,
        query: &str,
        file_ids: Vec<String>,
        stream: bool,
    ) -> Result<ResponseIterator<RunAnswer>, ApiError> {
        let request = RunRequest::new(self.app_id.clone(), conversation_id, query)
            .with_file_ids(file_ids)
            .with_stream(stream);
        self.run_with_tool_call(request).await
    }

    /// Run a turn with tools, tool outputs or a forced tool choice
    pub async fn run_with_tool_call(
        &self,
        mut request: RunRequest,
    ) -> Result<ResponseIterator<RunAnswer>, ApiError> {
        if request.conversation_id.is_empty() {
            return Err(ApiError::InvalidArgument(
                "conversation_id mustn't be empty".to_string(),
            ));
        }
        if request.app_id.is_empty() {
            request.app_id = self.app_id.clone();
        }

        let (builder, request_id) = self.gateway.request(Method::POST, "/app/conversation/runs")?;
        let builder = builder.json(&request);
        let (response, request_id) = self.gateway.send(builder, request_id).await?;

        debug!(request_id = %request_id, stream = request.stream, "run accepted");
        let body: BodyStream = response.bytes_stream().boxed();
        Ok(ResponseIterator::new(
            body,
            request_id,
            request.stream,
            self.config().stream.max_line_bytes,
        ))
    }
}

fn non_empty_app_id(app_id: String) -> Result<String, ApiError> {
    if app_id.is_empty() {
        return Err(ApiError::InvalidArgument("app_id is empty".to_string()));
    }
    Ok(app_id)
}

fn string_field(body: &Value, field: &'static str, request_id: String) -> Result<String, ApiError> {
    match body.get(field).and_then(Value::as_str) {
        Some(value) => Ok(value.to_string()),
        None => Err(ApiError::MissingField {
            request_id,
            field,
            body: body.to_string(),
        }),
    }
}
