//! Listing and describing the apps hosted for an account

use super::client::Gateway;
use super::request::{DescribeAppsRequest, GetAppListRequest};
use super::response::{App, DescribeAppsResponse, GetAppListResponse};
use super::{ApiError, HttpTransport};
use crate::config::Config;
use reqwest::Method;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct AppsClient {
    gateway: Gateway,
}

impl AppsClient {
    pub fn new(config: Config) -> Result<Self, ApiError> {
        Ok(Self {
            gateway: Gateway::new(config)?,
        })
    }

    pub fn with_transport(
        config: Config,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            gateway: Gateway::with_transport(config, transport)?,
        })
    }

    /// One page of apps, newest first
    pub async fn list(&self, request: GetAppListRequest) -> Result<Vec<App>, ApiError> {
        let (builder, request_id) = self.gateway.request(Method::GET, "/apps")?;
        let builder = builder.query(&request);

        let (response, request_id): (GetAppListResponse, String) =
            self.gateway.send_json(builder, request_id).await?;
        debug!(request_id = %request_id, count = response.data.len(), "listed apps");
        Ok(response.data)
    }

    /// Marker-paged description of apps
    pub async fn describe(
        &self,
        request: DescribeAppsRequest,
    ) -> Result<DescribeAppsResponse, ApiError> {
        let (builder, request_id) = self
            .gateway
            .request(Method::POST, "/app?Action=DescribeApps")?;
        let builder = builder.json(&request);

        let (response, _): (DescribeAppsResponse, String) =
            self.gateway.send_json(builder, request_id).await?;
        Ok(response)
    }
}
