//! In-process fake of the companion server for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use iapadmin_protocol::client::{
    ComputeInstancesRequest, InstanceOperationRequest, OperationRequest, ProjectRequest,
    VerifyTokenRequest,
};
use iapadmin_protocol::server::{HealthStatus, ProjectResponse, VerifyTokenResponse};
use iapadmin_protocol::{ConfigDocument, Instance, PreparedOperation};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::api::{decode_body, CompanionApi};
use crate::channel::{ChannelConnector, ChannelSink, ChannelStream, ChannelTransport};
use crate::error::{ClientError, Result};

/// Canned responses keyed by endpoint. Every body goes through the same
/// decoding as the HTTP client, so `{"error": ...}` bodies behave alike.
#[derive(Default)]
pub(crate) struct FakeApi {
    pub config: Mutex<Value>,
    pub instances: Mutex<Value>,
    pub project: Mutex<Value>,
    pub pre_rdp: Mutex<Value>,
    /// Per-operation prepare responses; unlisted names get a ready payload
    pub prepared: Mutex<HashMap<String, Value>>,
    pub unreachable: AtomicBool,
    pub requests: Mutex<Vec<(&'static str, Value)>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(json!([])),
            pre_rdp: Mutex::new(json!({})),
            ..Self::default()
        }
    }

    pub fn with_config(config: Value) -> Self {
        let fake = Self::new();
        *fake.config.lock().unwrap() = config;
        fake
    }

    pub fn set_instances(&self, value: Value) {
        *self.instances.lock().unwrap() = value;
    }

    pub fn set_project(&self, value: Value) {
        *self.project.lock().unwrap() = value;
    }

    pub fn set_pre_rdp(&self, value: Value) {
        *self.pre_rdp.lock().unwrap() = value;
    }

    pub fn set_prepared(&self, name: &str, value: Value) {
        self.prepared
            .lock()
            .unwrap()
            .insert(name.to_string(), value);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Bodies sent to `endpoint`, oldest first
    pub fn sent(&self, endpoint: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| *name == endpoint)
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn respond<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        body: &B,
        response: Value,
    ) -> Result<T> {
        self.requests
            .lock()
            .unwrap()
            .push((endpoint, serde_json::to_value(body).unwrap()));
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ClientError::Unreachable {
                detail: "connection refused".into(),
            });
        }
        decode_body(StatusCode::OK, response)
    }
}

#[async_trait]
impl CompanionApi for FakeApi {
    async fn health(&self) -> Result<HealthStatus> {
        self.respond("health", &Value::Null, json!({"status": "ok"}))
    }

    async fn verify_token(&self, request: &VerifyTokenRequest) -> Result<VerifyTokenResponse> {
        self.respond("verify_token", request, json!({"email": "ops@example.com"}))
    }

    async fn get_config(&self) -> Result<ConfigDocument> {
        let config = self.config.lock().unwrap().clone();
        self.respond("get_config", &Value::Null, config)
    }

    async fn compute_instances(&self, request: &ComputeInstancesRequest) -> Result<Vec<Instance>> {
        let instances = self.instances.lock().unwrap().clone();
        self.respond("compute_instances", request, instances)
    }

    async fn send_operation(&self, request: &OperationRequest) -> Result<PreparedOperation> {
        let response = self
            .prepared
            .lock()
            .unwrap()
            .get(&request.name)
            .cloned()
            .unwrap_or_else(|| {
                json!({
                    "operation": request.name,
                    "hash": format!("hash-{}", request.name),
                    "status": "ready"
                })
            });
        self.respond("send_operation", request, response)
    }

    async fn send_project_operation(&self, request: &ProjectRequest) -> Result<ProjectResponse> {
        let project = self.project.lock().unwrap().clone();
        self.respond("send_project_operation", request, project)
    }

    async fn send_instance_operation(
        &self,
        request: &InstanceOperationRequest,
    ) -> Result<PreparedOperation> {
        let response = json!({
            "operation": request.name,
            "hash": format!("hash-{}-{}", request.name, request.instance.name),
            "status": "ready"
        });
        self.respond("send_instance_operation", request, response)
    }

    async fn run_pre_rdp_operations(&self, request: &ProjectRequest) -> Result<()> {
        let response = self.pre_rdp.lock().unwrap().clone();
        let _: Value = self.respond("run_pre_rdp_operations", request, response)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory channel
// ---------------------------------------------------------------------------

struct MemorySink(mpsc::UnboundedSender<String>);

#[async_trait]
impl ChannelSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.0.send(text).map_err(|_| ClientError::ChannelClosed)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct MemoryStream(mpsc::UnboundedReceiver<Result<String>>);

#[async_trait]
impl ChannelStream for MemoryStream {
    async fn next_text(&mut self) -> Option<Result<String>> {
        self.0.recv().await
    }
}

/// Server end of an in-memory channel
pub(crate) struct MemoryServer {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: Option<mpsc::UnboundedSender<Result<String>>>,
}

impl MemoryServer {
    /// Next text the client wrote
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    pub fn send_json(&self, value: Value) {
        if let Some(tx) = &self.outgoing {
            let _ = tx.send(Ok(value.to_string()));
        }
    }

    pub fn fail(&self, message: &str) {
        if let Some(tx) = &self.outgoing {
            let _ = tx.send(Err(ClientError::Channel(message.to_string())));
        }
    }

    /// Close from the server side
    pub fn close(&mut self) {
        self.outgoing = None;
    }
}

pub(crate) fn memory_pair() -> (ChannelTransport, MemoryServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    let transport = ChannelTransport {
        sink: Box::new(MemorySink(client_tx)),
        stream: Box::new(MemoryStream(client_rx)),
    };
    let server = MemoryServer {
        incoming: server_rx,
        outgoing: Some(server_tx),
    };
    (transport, server)
}

/// Connector that hands the server end of every connection to the test
pub(crate) struct MemoryConnector {
    servers: mpsc::UnboundedSender<(String, MemoryServer)>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, MemoryServer)>) {
        let (servers, rx) = mpsc::unbounded_channel();
        (Self { servers }, rx)
    }
}

#[async_trait]
impl ChannelConnector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<ChannelTransport> {
        let (transport, server) = memory_pair();
        self.servers
            .send((url.to_string(), server))
            .map_err(|_| ClientError::ChannelClosed)?;
        Ok(transport)
    }
}
