//! Companion server endpoint layout.
//!
//! Every HTTP and WebSocket URL is derived from one base URL so the CLI
//! and tests can point the console at any server.

pub const DEFAULT_SERVER_URL: &str = "http://localhost:23966";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    http_base: String,
    ws_base: String,
}

impl Endpoints {
    pub fn new(server_url: &str) -> Self {
        let http_base = server_url.trim_end_matches('/').to_string();
        let ws_base = if let Some(rest) = http_base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = http_base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{http_base}")
        };
        Self { http_base, ws_base }
    }

    pub fn base(&self) -> &str {
        &self.http_base
    }

    fn http(&self, path: &str) -> String {
        format!("{}{}", self.http_base, path)
    }

    fn ws(&self, path: &str) -> String {
        format!("{}{}", self.ws_base, path)
    }

    pub fn health(&self) -> String {
        self.http("/health")
    }

    pub fn verify_token(&self) -> String {
        self.http("/verifyidtoken")
    }

    pub fn get_config(&self) -> String {
        self.http("/admin/get-config")
    }

    pub fn compute_instances(&self) -> String {
        self.http("/gcloud/compute-instances")
    }

    pub fn send_operation(&self) -> String {
        self.http("/admin/operation-to-run")
    }

    pub fn send_project_operation(&self) -> String {
        self.http("/admin/get-project")
    }

    pub fn send_instance_operation(&self) -> String {
        self.http("/admin/instance-operation-to-run")
    }

    pub fn run_pre_rdp_operations(&self) -> String {
        self.http("/admin/pre-rdp")
    }

    /// Streaming channel for operation output
    pub fn operation_channel(&self) -> String {
        self.ws("/admin/run-operation")
    }

    /// Streaming channel for private RDP negotiation
    pub fn rdp_channel(&self) -> String {
        self.ws("/gcloud/start-private-rdp")
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}
