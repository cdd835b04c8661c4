//! Admin console
//!
//! Single owner of the catalog, instance directory, session registry and
//! per-instance RDP gates. Every user action of the admin page is a method
//! here; channel output comes back through `next_event`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use iapadmin_protocol::client::{ProjectRequest, ProjectRequestType, Variables};
use iapadmin_protocol::{Instance, OutputMessage, PreparedOperation};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::api::CompanionApi;
use crate::catalog::{Capabilities, Catalog};
use crate::channel::{ChannelConnector, ChannelHandle, Opening, SessionEvent};
use crate::directory::{Directory, ProjectMode};
use crate::dispatcher;
use crate::endpoints::Endpoints;
use crate::error::{ClientError, Result};
use crate::rdp::{self, RdpEffect, RdpInput, RdpPhase, RdpState};
use crate::registry::{Notice, SessionId, SessionKind, SessionRegistry};

/// What one applied channel event changed
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleUpdate {
    Opened {
        session: SessionId,
    },
    Output {
        session: SessionId,
        message: OutputMessage,
    },
    Errored {
        session: SessionId,
        message: String,
    },
    Closed {
        session: SessionId,
    },
    /// Event for a session that is no longer registered
    Stale,
}

/// An instance operation prepared and waiting to be started
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInstanceOperation {
    pub operation: String,
    pub instance: String,
    pub prepared: PreparedOperation,
}

pub struct Console {
    api: Arc<dyn CompanionApi>,
    connector: Arc<dyn ChannelConnector>,
    endpoints: Endpoints,
    catalog: Option<Catalog>,
    config_error: Option<String>,
    directory: Directory,
    registry: SessionRegistry,
    rdp: HashMap<String, RdpState>,
    pending_instance_operation: Option<PendingInstanceOperation>,
    notice: Option<Notice>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Console {
    pub fn new(
        api: Arc<dyn CompanionApi>,
        connector: Arc<dyn ChannelConnector>,
        endpoints: Endpoints,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            api,
            connector,
            endpoints,
            catalog: None,
            config_error: None,
            directory: Directory::new(),
            registry: SessionRegistry::new(),
            rdp: HashMap::new(),
            pending_instance_operation: None,
            notice: None,
            events_tx,
            events_rx,
        }
    }

    // -- Read access --------------------------------------------------------

    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }

    /// Message from the last failed config load
    pub fn config_error(&self) -> Option<&str> {
        self.config_error.as_deref()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.catalog
            .as_ref()
            .map(Catalog::capabilities)
            .unwrap_or_default()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn rdp_phase(&self, instance: &str) -> RdpPhase {
        self.rdp
            .get(instance)
            .map(|state| state.phase.clone())
            .unwrap_or(RdpPhase::Idle)
    }

    pub fn pending_instance_operation(&self) -> Option<&PendingInstanceOperation> {
        self.pending_instance_operation.as_ref()
    }

    /// The current confirmation, unless it has expired
    pub fn notice(&self) -> Option<&Notice> {
        self.notice
            .as_ref()
            .filter(|notice| !notice.is_expired(Instant::now()))
    }

    fn catalog_ref(&self) -> Result<&Catalog> {
        self.catalog
            .as_ref()
            .ok_or_else(|| ClientError::InvalidConfig("configuration not loaded".to_string()))
    }

    fn catalog_mut(&mut self) -> Result<&mut Catalog> {
        self.catalog
            .as_mut()
            .ok_or_else(|| ClientError::InvalidConfig("configuration not loaded".to_string()))
    }

    fn commons(&self) -> Variables {
        self.catalog
            .as_ref()
            .map(Catalog::common_variables)
            .unwrap_or_default()
    }

    // -- Config -------------------------------------------------------------

    pub async fn load_config(&mut self) -> Result<Capabilities> {
        let loaded = match self.api.get_config().await {
            Ok(doc) => Catalog::from_document(doc),
            Err(err) => Err(err),
        };
        match loaded {
            Ok(catalog) => {
                let capabilities = catalog.capabilities();
                info!(
                    component = "console",
                    event = "console.config_loaded",
                    operations = catalog.operations().len(),
                    workflows = catalog.workflows().len(),
                    "Configuration loaded"
                );
                self.catalog = Some(catalog);
                self.config_error = None;
                Ok(capabilities)
            }
            Err(err) => {
                warn!(
                    component = "console",
                    event = "console.config_failed",
                    error = %err,
                    "Configuration load failed"
                );
                self.catalog = None;
                self.config_error = Some(err.user_message());
                Err(err)
            }
        }
    }

    pub fn set_common(&mut self, name: &str, value: &str) -> Result<()> {
        self.catalog_mut()?.set_common(name, value)
    }

    pub fn set_param(&mut self, operation: &str, name: &str, value: &str) -> Result<()> {
        self.catalog_mut()?
            .operation_named_mut(operation)?
            .set_param(name, value)
    }

    // -- Directory ----------------------------------------------------------

    pub async fn resolve_project(&mut self, mode: ProjectMode) -> Result<String> {
        let commons = self.commons();
        let result = self
            .directory
            .resolve_project(self.api.as_ref(), mode, &commons)
            .await;
        self.reapply_rdp_state();
        result
    }

    pub async fn list_instances(&mut self, project: &str) -> Result<usize> {
        let result = self.directory.list_instances(self.api.as_ref(), project).await;
        self.reapply_rdp_state();
        result
    }

    /// Re-list the current project, resolving the default one if none is set
    pub async fn refresh(&mut self) -> Result<usize> {
        match self.directory.project().map(str::to_string) {
            Some(project) => self.list_instances(&project).await,
            None => {
                self.resolve_project(ProjectMode::Get).await?;
                Ok(self.directory.instances().len())
            }
        }
    }

    fn reapply_rdp_state(&mut self) {
        for (name, state) in &self.rdp {
            if let Some(instance) = self.directory.find_mut(name) {
                state.apply_to(instance);
            }
        }
    }

    // -- Operations ---------------------------------------------------------

    pub async fn prepare(&mut self, operation: &str) -> Result<PreparedOperation> {
        let api = Arc::clone(&self.api);
        let catalog = self.catalog_mut()?;
        let commons = catalog.common_variables();
        let op = catalog.operation_named_mut(operation)?;
        dispatcher::prepare(api.as_ref(), op, &commons).await
    }

    pub async fn prepare_workflow(&mut self, workflow: &str) -> Result<Vec<PreparedOperation>> {
        let api = Arc::clone(&self.api);
        let catalog = self.catalog_mut()?;
        dispatcher::prepare_workflow(api.as_ref(), catalog, workflow).await
    }

    pub fn clear_prepared(&mut self, operation: &str) -> Result<()> {
        self.catalog_mut()?
            .operation_named_mut(operation)?
            .clear_prepared();
        Ok(())
    }

    /// Start a prepared operation in a new session.
    ///
    /// The descriptor's prepared payload moves into the session.
    pub async fn start_prepared(&mut self, operation: &str) -> Result<SessionId> {
        let op = self.catalog_mut()?.operation_named_mut(operation)?;
        let prepared = op
            .prepared
            .take()
            .ok_or_else(|| ClientError::NotPrepared(operation.to_string()))?;
        let name = op.name.clone();
        self.start_operation_session(&name, prepared).await
    }

    pub async fn prepare_instance_operation(
        &mut self,
        operation: &str,
        instance: &str,
    ) -> Result<PreparedOperation> {
        let catalog = self.catalog_ref()?;
        let op = catalog.instance_operation(operation)?;
        let target = self
            .directory
            .find(instance)
            .ok_or_else(|| ClientError::UnknownInstance(instance.to_string()))?;
        let commons = catalog.common_variables();

        let prepared =
            dispatcher::prepare_instance_operation(self.api.as_ref(), op, target, &commons)
                .await?;
        self.pending_instance_operation = Some(PendingInstanceOperation {
            operation: operation.to_string(),
            instance: instance.to_string(),
            prepared: prepared.clone(),
        });
        Ok(prepared)
    }

    pub async fn start_instance_operation(&mut self) -> Result<SessionId> {
        let pending = self
            .pending_instance_operation
            .take()
            .ok_or_else(|| ClientError::NotPrepared("instance operation".to_string()))?;
        let label = format!("{} {}", pending.operation, pending.instance);
        self.start_operation_session(&label, pending.prepared).await
    }

    async fn start_operation_session(
        &mut self,
        label: &str,
        prepared: PreparedOperation,
    ) -> Result<SessionId> {
        let id = self.registry.push_operation(label, prepared.clone());
        let opened = ChannelHandle::open(
            self.connector.as_ref(),
            &self.endpoints.operation_channel(),
            id.clone(),
            Opening::Operation(prepared),
            self.events_tx.clone(),
        )
        .await;

        match opened {
            Ok(handle) => {
                self.registry.attach_channel(&id, handle)?;
                info!(
                    component = "console",
                    event = "console.session_started",
                    session_id = %id,
                    label = %label,
                    "Operation session started"
                );
                self.notice = Some(Notice::started(label));
                Ok(id)
            }
            Err(err) => {
                self.registry.remove(&id);
                Err(err)
            }
        }
    }

    // -- Private RDP --------------------------------------------------------

    /// Start RDP for `instance`, or end it if it is already running.
    pub async fn click_rdp(&mut self, instance: &str) -> Result<RdpPhase> {
        let target = self
            .directory
            .find(instance)
            .ok_or_else(|| ClientError::UnknownInstance(instance.to_string()))?;
        let running = target.rdp_running;
        let preflight_enabled = self.capabilities().pre_rdp;

        self.drive_rdp(
            instance,
            RdpInput::Clicked {
                running,
                preflight_enabled,
            },
        )
        .await;
        Ok(self.rdp_phase(instance))
    }

    pub async fn send_rdp_credentials(
        &mut self,
        instance: &str,
        username: &str,
        password: &str,
    ) -> Result<()> {
        let session = self
            .registry
            .find_rdp(instance)
            .ok_or_else(|| ClientError::UnknownInstance(instance.to_string()))?;
        let channel = session.channel().ok_or(ClientError::ChannelClosed)?;
        channel.send_credentials(username, password).await
    }

    /// Feed one input through the instance's gate and execute the effects,
    /// including any inputs the effects produce.
    async fn drive_rdp(&mut self, instance: &str, input: RdpInput) {
        let mut pending = VecDeque::from([input]);
        while let Some(input) = pending.pop_front() {
            let state = self
                .rdp
                .remove(instance)
                .unwrap_or_else(|| RdpState::new(instance));
            let (state, effects) = rdp::transition(state, input);
            if let Some(target) = self.directory.find_mut(instance) {
                state.apply_to(target);
            }
            self.rdp.insert(instance.to_string(), state);

            for effect in effects {
                if let Some(next) = self.execute_rdp_effect(instance, effect).await {
                    pending.push_back(next);
                }
            }
        }
    }

    async fn execute_rdp_effect(&mut self, instance: &str, effect: RdpEffect) -> Option<RdpInput> {
        match effect {
            RdpEffect::SendPreflight => {
                let project = self
                    .directory
                    .find(instance)
                    .map(|i| i.project.clone())
                    .or_else(|| self.directory.project().map(str::to_string))
                    .unwrap_or_default();
                let request = ProjectRequest {
                    request_type: ProjectRequestType::PreRdp,
                    project_name: project,
                    variables: self.commons(),
                };
                match self.api.run_pre_rdp_operations(&request).await {
                    Ok(()) => Some(RdpInput::PreflightSucceeded),
                    Err(err) => {
                        warn!(
                            component = "console",
                            event = "console.preflight_failed",
                            instance = %instance,
                            error = %err,
                            "Pre-RDP operations failed"
                        );
                        Some(RdpInput::PreflightFailed(err.user_message()))
                    }
                }
            }

            RdpEffect::RegisterSession => {
                let target = self.directory.find(instance).cloned().unwrap_or_else(|| Instance {
                    name: instance.to_string(),
                    ..Instance::default()
                });
                let id = self.registry.push_rdp(instance);
                let opened = ChannelHandle::open(
                    self.connector.as_ref(),
                    &self.endpoints.rdp_channel(),
                    id.clone(),
                    Opening::Rdp(target),
                    self.events_tx.clone(),
                )
                .await;
                match opened.and_then(|handle| self.registry.attach_channel(&id, handle)) {
                    Ok(()) => {
                        info!(
                            component = "console",
                            event = "console.rdp_started",
                            session_id = %id,
                            instance = %instance,
                            "Private RDP session started"
                        );
                        None
                    }
                    Err(err) => Some(RdpInput::ConnectFailed(err.user_message())),
                }
            }

            RdpEffect::SendEnd => {
                let session_id = self.registry.find_rdp(instance).map(|s| s.id.clone())?;
                let session = self.registry.get_mut(&session_id)?;
                session.end_rdp_requested = true;
                if let Some(channel) = session.channel() {
                    if let Err(err) = channel.request_end_rdp().await {
                        warn!(
                            component = "console",
                            event = "console.end_rdp_failed",
                            instance = %instance,
                            error = %err,
                            "End RDP not delivered"
                        );
                    }
                }
                None
            }

            RdpEffect::Notice(text) => {
                self.notice = Some(Notice::new(text));
                None
            }

            RdpEffect::ReleaseSession => {
                if let Some(id) = self.registry.find_rdp(instance).map(|s| s.id.clone()) {
                    self.registry.remove(&id);
                    info!(
                        component = "console",
                        event = "console.rdp_released",
                        session_id = %id,
                        instance = %instance,
                        "Private RDP session released"
                    );
                }
                None
            }
        }
    }

    // -- Tabs ---------------------------------------------------------------

    pub fn select_tab(&mut self, index: usize) -> Result<()> {
        self.registry.select_tab(index)
    }

    /// Close the selected tab.
    ///
    /// An operation session sends its end message and is dropped right away
    /// without waiting for the server. A live RDP session is asked to end; it
    /// stays, like one already closing, until the server closes its channel.
    pub async fn close_current_tab(&mut self) -> Result<()> {
        let index = self.registry.current_tab().ok_or(ClientError::UnknownSession(0))?;
        let session = self
            .registry
            .current_mut()
            .ok_or(ClientError::UnknownSession(index))?;
        session.close_requested = true;

        if let SessionKind::Rdp { instance } = &session.kind {
            let instance = instance.clone();
            let phase = self.rdp_phase(&instance);
            if phase.is_live() {
                self.drive_rdp(&instance, RdpInput::EndRequested).await;
                return Ok(());
            }
            // end already sent; the server's close releases the session
            if phase == RdpPhase::Closing {
                return Ok(());
            }
        } else if let Some(channel) = session.channel() {
            if let Err(err) = channel.request_close().await {
                warn!(
                    component = "console",
                    event = "console.close_failed",
                    session_id = %session.id,
                    error = %err,
                    "End operation not delivered"
                );
            }
        }

        let removed = self.registry.remove_at(index)?;
        info!(
            component = "console",
            event = "console.session_ended",
            session_id = %removed.id,
            "Session ended"
        );
        self.notice = Some(Notice::ended(&removed.label));
        Ok(())
    }

    // -- Channel events -----------------------------------------------------

    /// Wait for the next channel event and apply it.
    pub async fn next_event(&mut self) -> Option<ConsoleUpdate> {
        let event = self.events_rx.recv().await?;
        Some(self.apply_event(event).await)
    }

    pub async fn apply_event(&mut self, event: SessionEvent) -> ConsoleUpdate {
        let Some(session) = self.registry.get_mut(event.session()) else {
            return ConsoleUpdate::Stale;
        };
        let rdp_instance = session.rdp_instance().map(str::to_string);

        let (update, input) = match event {
            SessionEvent::Opened { session } => {
                (ConsoleUpdate::Opened { session }, Some(RdpInput::ChannelOpened))
            }
            SessionEvent::Frame { session: id, message } => {
                session.log.push(message.clone());
                let input = RdpInput::Inbound(message.clone());
                (ConsoleUpdate::Output { session: id, message }, Some(input))
            }
            SessionEvent::Errored { session: id, message } => {
                session.log.push(OutputMessage {
                    error: message.clone(),
                    ..OutputMessage::default()
                });
                let input = RdpInput::ChannelErrored(message.clone());
                (ConsoleUpdate::Errored { session: id, message }, Some(input))
            }
            SessionEvent::Closed { session } => {
                (ConsoleUpdate::Closed { session }, Some(RdpInput::ChannelClosed))
            }
        };

        if let (Some(instance), Some(input)) = (rdp_instance, input) {
            self.drive_rdp(&instance, input).await;
        }
        update
    }
}
