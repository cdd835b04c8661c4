//! Project and compute-instance directory.
//!
//! Every listing replaces the previous one wholesale. Anything that held on
//! to an instance must look it up again by name afterwards.

use iapadmin_protocol::client::{
    ComputeInstancesRequest, ProjectRequest, ProjectRequestType, Variables,
};
use iapadmin_protocol::Instance;
use tracing::{info, warn};

use crate::api::CompanionApi;
use crate::error::{ClientError, Result};

/// How the project is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectMode {
    /// Use the project the server's project operation reports
    Get,
    /// Check an operator supplied project name
    Validate(String),
}

#[derive(Debug, Default)]
pub struct Directory {
    project: Option<String>,
    instances: Vec<Instance>,
    error: Option<String>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Message from the last failed resolve or listing
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn find(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|i| i.name == name)
    }

    /// Resolve the project, then list its instances.
    ///
    /// The request always carries the current common-parameter values.
    pub async fn resolve_project(
        &mut self,
        api: &dyn CompanionApi,
        mode: ProjectMode,
        commons: &Variables,
    ) -> Result<String> {
        let (request_type, project_name) = match mode {
            ProjectMode::Get => (ProjectRequestType::Get, String::new()),
            ProjectMode::Validate(name) => (ProjectRequestType::Validate, name),
        };
        let request = ProjectRequest {
            request_type,
            project_name,
            variables: commons.clone(),
        };

        let response = match api.send_project_operation(&request).await {
            Ok(response) => response,
            Err(err) => return Err(self.fail(err)),
        };

        let Some(project) = response.project.filter(|p| !p.trim().is_empty()) else {
            let err = ClientError::Server(
                response
                    .error
                    .unwrap_or_else(|| "Project could not be resolved".to_string()),
            );
            return Err(self.fail(err));
        };
        let project = project.trim().to_string();

        info!(
            component = "directory",
            event = "directory.project_resolved",
            project = %project,
            "Project resolved"
        );
        self.list_instances(api, &project).await?;
        Ok(project)
    }

    /// Fetch and normalize the instances of `project`, replacing the listing.
    pub async fn list_instances(&mut self, api: &dyn CompanionApi, project: &str) -> Result<usize> {
        let request = ComputeInstancesRequest {
            project: project.to_string(),
        };
        match api.compute_instances(&request).await {
            Ok(raw) => {
                self.replace(project, raw);
                info!(
                    component = "directory",
                    event = "directory.instances_listed",
                    project = %project,
                    count = self.instances.len(),
                    "Instances listed"
                );
                Ok(self.instances.len())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Install a fresh listing for `project`
    pub fn replace(&mut self, project: &str, raw: Vec<Instance>) {
        self.project = Some(project.to_string());
        self.instances = raw
            .into_iter()
            .map(|instance| normalize_instance(instance, project))
            .collect();
        self.error = None;
    }

    pub fn clear(&mut self) {
        self.instances.clear();
        self.error = None;
    }

    fn fail(&mut self, err: ClientError) -> ClientError {
        warn!(
            component = "directory",
            event = "directory.failed",
            error = %err,
            "Directory request failed"
        );
        self.instances.clear();
        self.error = Some(err.user_message());
        err
    }
}

/// Strip resource-path prefixes and derive the RDP affordance.
pub fn normalize_instance(mut instance: Instance, project: &str) -> Instance {
    instance.zone = last_segment(&instance.zone).to_string();
    if let Some(nic) = instance.network_interfaces.first_mut() {
        nic.network = last_segment(&nic.network).to_string();
    }
    instance.project = project.to_string();
    instance.display_private_rdp_dom = instance.has_windows_disk();
    instance
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
