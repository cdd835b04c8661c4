//! Request/response calls to the companion server.

use std::time::Duration;

use async_trait::async_trait;
use iapadmin_protocol::client::{
    ComputeInstancesRequest, InstanceOperationRequest, OperationRequest, ProjectRequest,
    VerifyTokenRequest,
};
use iapadmin_protocol::server::{
    application_error, HealthStatus, ProjectResponse, VerifyTokenResponse,
};
use iapadmin_protocol::{ConfigDocument, Instance, PreparedOperation};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::endpoints::Endpoints;
use crate::error::{ClientError, Result};

/// The companion server's HTTP surface.
///
/// Application errors (a JSON body with an `error` field) come back as
/// `ClientError::Server`, transport failures as `ClientError::Unreachable`.
#[async_trait]
pub trait CompanionApi: Send + Sync {
    async fn health(&self) -> Result<HealthStatus>;

    async fn verify_token(&self, request: &VerifyTokenRequest) -> Result<VerifyTokenResponse>;

    async fn get_config(&self) -> Result<ConfigDocument>;

    async fn compute_instances(&self, request: &ComputeInstancesRequest) -> Result<Vec<Instance>>;

    async fn send_operation(&self, request: &OperationRequest) -> Result<PreparedOperation>;

    async fn send_project_operation(&self, request: &ProjectRequest) -> Result<ProjectResponse>;

    async fn send_instance_operation(
        &self,
        request: &InstanceOperationRequest,
    ) -> Result<PreparedOperation>;

    async fn run_pre_rdp_operations(&self, request: &ProjectRequest) -> Result<()>;
}

/// `CompanionApi` over HTTP with a cookie jar, so the session cookie set by
/// `/health` or `/verifyidtoken` rides along on later calls.
#[derive(Clone)]
pub struct HttpCompanion {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpCompanion {
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Channel(e.to_string()))?;

        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(component = "api", event = "api.request", method = "GET", url = %url);
        let response = self.client.get(url).send().await?;
        decode_response(response).await
    }

    async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        debug!(component = "api", event = "api.request", method = "POST", url = %url);
        let response = self.client.post(url).json(body).send().await?;
        decode_response(response).await
    }
}

async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await?;
    let body: Value = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text)?
    };
    decode_body(status, body)
}

/// Map a status and JSON body onto the error taxonomy, then decode.
pub(crate) fn decode_body<T: DeserializeOwned>(
    status: reqwest::StatusCode,
    body: Value,
) -> Result<T> {
    if let Some(message) = application_error(&body) {
        return Err(ClientError::Server(message));
    }
    if !status.is_success() {
        return Err(ClientError::Server(format!("server error: {status}")));
    }
    Ok(serde_json::from_value(body)?)
}

#[async_trait]
impl CompanionApi for HttpCompanion {
    async fn health(&self) -> Result<HealthStatus> {
        self.get_json(&self.endpoints.health()).await
    }

    async fn verify_token(&self, request: &VerifyTokenRequest) -> Result<VerifyTokenResponse> {
        self.post_json(&self.endpoints.verify_token(), request).await
    }

    async fn get_config(&self) -> Result<ConfigDocument> {
        self.get_json(&self.endpoints.get_config()).await
    }

    async fn compute_instances(&self, request: &ComputeInstancesRequest) -> Result<Vec<Instance>> {
        self.post_json(&self.endpoints.compute_instances(), request)
            .await
    }

    async fn send_operation(&self, request: &OperationRequest) -> Result<PreparedOperation> {
        self.post_json(&self.endpoints.send_operation(), request).await
    }

    async fn send_project_operation(&self, request: &ProjectRequest) -> Result<ProjectResponse> {
        self.post_json(&self.endpoints.send_project_operation(), request)
            .await
    }

    async fn send_instance_operation(
        &self,
        request: &InstanceOperationRequest,
    ) -> Result<PreparedOperation> {
        self.post_json(&self.endpoints.send_instance_operation(), request)
            .await
    }

    async fn run_pre_rdp_operations(&self, request: &ProjectRequest) -> Result<()> {
        let _: Value = self
            .post_json(&self.endpoints.run_pre_rdp_operations(), request)
            .await?;
        Ok(())
    }
}
