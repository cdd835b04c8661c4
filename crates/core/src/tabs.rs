//! Background tab coordinator for the browser-extension build.
//!
//! Keeps one admin tab, tracks the tabs opened for private RDP and answers
//! the popup, RDP pages and console content script.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use iapadmin_protocol::{BackgroundRequest, BackgroundResponse, ContentMessage, Instance};
use tracing::{debug, info, warn};

use crate::api::CompanionApi;
use crate::directory::Directory;
use crate::error::Result;

/// How often the popup asks for instances until some arrive
pub const POPUP_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_CONSOLE_HOST: &str = "console.cloud.google.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(pub u64);

/// Extension pages a tab can be opened on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Admin,
    Rdp,
}

impl Page {
    pub fn path(self) -> &'static str {
        match self {
            Page::Admin => "index.html?#/admin",
            Page::Rdp => "index.html?#/rdp",
        }
    }
}

/// The browser's tab API
#[async_trait]
pub trait TabHost: Send + Sync {
    async fn create_tab(&self, page: Page) -> Result<TabId>;

    async fn tab_exists(&self, tab: TabId) -> bool;

    async fn focus_tab(&self, tab: TabId) -> Result<()>;

    async fn close_tab(&self, tab: TabId) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdpTabStatus {
    /// Opened, page not loaded yet
    Created,
    /// Page loaded and picked up its instance
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdpTab {
    pub instance: Instance,
    pub tab: TabId,
    pub status: RdpTabStatus,
}

pub struct TabCoordinator<H: TabHost> {
    host: H,
    api: Arc<dyn CompanionApi>,
    console_host: String,
    admin_tab: Option<TabId>,
    rdp_tabs: Vec<RdpTab>,
    directory: Directory,
}

impl<H: TabHost> TabCoordinator<H> {
    pub fn new(host: H, api: Arc<dyn CompanionApi>, console_host: impl Into<String>) -> Self {
        Self {
            host,
            api,
            console_host: console_host.into(),
            admin_tab: None,
            rdp_tabs: Vec::new(),
            directory: Directory::new(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn admin_tab(&self) -> Option<TabId> {
        self.admin_tab
    }

    pub fn rdp_tabs(&self) -> &[RdpTab] {
        &self.rdp_tabs
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Open the admin tab, or bring the existing one forward.
    pub async fn on_icon_clicked(&mut self) -> Result<TabId> {
        if let Some(tab) = self.admin_tab {
            if self.host.tab_exists(tab).await {
                self.host.focus_tab(tab).await?;
                return Ok(tab);
            }
        }
        let tab = self.host.create_tab(Page::Admin).await?;
        info!(
            component = "tabs",
            event = "tabs.admin_opened",
            tab = tab.0,
            "Admin tab opened"
        );
        self.admin_tab = Some(tab);
        Ok(tab)
    }

    /// A tab finished loading. A ready RDP tab loading again was refreshed by
    /// the user; it is dropped, closed and its instance re-enabled. Returns
    /// true if that happened.
    pub async fn on_tab_complete(&mut self, tab: TabId) -> Result<bool> {
        let Some(index) = self
            .rdp_tabs
            .iter()
            .position(|t| t.tab == tab && t.status == RdpTabStatus::Ready)
        else {
            return Ok(false);
        };
        let removed = self.rdp_tabs.remove(index);
        debug!(
            component = "tabs",
            event = "tabs.rdp_refreshed",
            tab = tab.0,
            instance = %removed.instance.name,
            "RDP tab refreshed, closing"
        );
        self.set_running(&removed.instance.name, false);
        self.host.close_tab(tab).await?;
        Ok(true)
    }

    /// A tab was closed. A ready RDP tab gives its instance back to the popup.
    pub fn on_tab_removed(&mut self, tab: TabId) {
        if self.admin_tab == Some(tab) {
            self.admin_tab = None;
        }
        let Some(index) = self.rdp_tabs.iter().position(|t| t.tab == tab) else {
            return;
        };
        let removed = self.rdp_tabs.remove(index);
        if removed.status == RdpTabStatus::Ready {
            self.set_running(&removed.instance.name, false);
        }
    }

    pub async fn handle(
        &mut self,
        request: BackgroundRequest,
        sender: Option<TabId>,
    ) -> Result<BackgroundResponse> {
        match request {
            BackgroundRequest::PopupGetInstances => Ok(self.instances_response()),

            BackgroundRequest::StartPrivateRdp { instance } => {
                self.set_running(&instance.name, true);
                let tracked = self
                    .directory
                    .find(&instance.name)
                    .cloned()
                    .unwrap_or(instance);
                let tab = self.host.create_tab(Page::Rdp).await?;
                info!(
                    component = "tabs",
                    event = "tabs.rdp_opened",
                    tab = tab.0,
                    instance = %tracked.name,
                    "RDP tab opened"
                );
                self.rdp_tabs.push(RdpTab {
                    instance: tracked,
                    tab,
                    status: RdpTabStatus::Created,
                });
                Ok(BackgroundResponse::Instances {
                    instances: self.directory.instances().to_vec(),
                    project_name: None,
                    error: None,
                })
            }

            BackgroundRequest::RdpGetInstance => {
                let entry = match sender {
                    Some(tab) => self.rdp_tabs.iter_mut().find(|t| t.tab == tab),
                    None => None,
                };
                match entry {
                    Some(entry) => {
                        entry.status = RdpTabStatus::Ready;
                        Ok(BackgroundResponse::Instance {
                            instance: entry.instance.clone(),
                        })
                    }
                    None => {
                        warn!(
                            component = "tabs",
                            event = "tabs.untracked_rdp_tab",
                            "Instance requested from an untracked tab"
                        );
                        Ok(BackgroundResponse::Ack { ok: false })
                    }
                }
            }

            BackgroundRequest::RdpEnded { instance } => {
                self.set_running(&instance.name, false);
                Ok(BackgroundResponse::Ack { ok: true })
            }
        }
    }

    /// The browser finished loading `url` in some tab. On a compute page of
    /// the cloud console with a `project` query parameter, list the project's
    /// instances and return the push for the content script.
    pub async fn on_console_navigation(&mut self, url: &str) -> Result<Option<ContentMessage>> {
        let Some(project) = project_from_console_url(url, &self.console_host) else {
            return Ok(None);
        };
        self.directory
            .list_instances(self.api.as_ref(), &project)
            .await?;
        Ok(Some(ContentMessage::ComputeInstances {
            compute_instances: self.directory.instances().to_vec(),
        }))
    }

    fn instances_response(&self) -> BackgroundResponse {
        let instances = self.directory.instances().to_vec();
        let project_name = instances.first().map(|i| i.project.clone());
        BackgroundResponse::Instances {
            instances,
            project_name,
            error: self.directory.error().map(str::to_string),
        }
    }

    fn set_running(&mut self, name: &str, running: bool) {
        if let Some(instance) = self.directory.find_mut(name) {
            instance.rdp_running = running;
        }
    }
}

/// Pull `project` out of a cloud console compute URL
pub fn project_from_console_url(url: &str, console_host: &str) -> Option<String> {
    let (page, query) = url.split_once('?')?;
    if !page.contains(&format!("{console_host}/compute/")) {
        return None;
    }
    query
        .split(['&', '#'])
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "project")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Poll `source` every `every` until it reports instances or an error.
pub async fn wait_for_instances<F, Fut>(mut source: F, every: Duration) -> BackgroundResponse
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BackgroundResponse>,
{
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let response = source().await;
        if let BackgroundResponse::Instances {
            instances, error, ..
        } = &response
        {
            let has_error = error.as_deref().is_some_and(|e| !e.is_empty());
            if !instances.is_empty() || has_error {
                return response;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeHost {
        next_id: AtomicU64,
        open: Mutex<Vec<(TabId, Page)>>,
        focused: Mutex<Vec<TabId>>,
    }

    impl FakeHost {
        fn is_open(&self, tab: TabId) -> bool {
            self.open.lock().unwrap().iter().any(|(t, _)| *t == tab)
        }

        fn user_closes(&self, tab: TabId) {
            self.open.lock().unwrap().retain(|(t, _)| *t != tab);
        }
    }

    #[async_trait]
    impl TabHost for FakeHost {
        async fn create_tab(&self, page: Page) -> Result<TabId> {
            let tab = TabId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            self.open.lock().unwrap().push((tab, page));
            Ok(tab)
        }

        async fn tab_exists(&self, tab: TabId) -> bool {
            self.is_open(tab)
        }

        async fn focus_tab(&self, tab: TabId) -> Result<()> {
            self.focused.lock().unwrap().push(tab);
            Ok(())
        }

        async fn close_tab(&self, tab: TabId) -> Result<()> {
            self.user_closes(tab);
            Ok(())
        }
    }

    const CONSOLE_URL: &str =
        "https://console.cloud.google.com/compute/instances?project=prod-123&authuser=0";

    async fn coordinator_with_vm() -> (TabCoordinator<FakeHost>, Arc<FakeApi>) {
        let api = Arc::new(FakeApi::new());
        api.set_instances(json!([{"name": "vm1", "zone": "projects/p/zones/z1"}]));
        let mut coordinator =
            TabCoordinator::new(FakeHost::default(), api.clone(), DEFAULT_CONSOLE_HOST);
        coordinator.on_console_navigation(CONSOLE_URL).await.unwrap();
        (coordinator, api)
    }

    fn vm1() -> Instance {
        Instance {
            name: "vm1".into(),
            ..Instance::default()
        }
    }

    #[test]
    fn extracts_project_from_compute_urls_only() {
        assert_eq!(
            project_from_console_url(CONSOLE_URL, DEFAULT_CONSOLE_HOST).as_deref(),
            Some("prod-123")
        );
        assert!(project_from_console_url(
            "https://console.cloud.google.com/storage/browser?project=prod-123",
            DEFAULT_CONSOLE_HOST
        )
        .is_none());
        assert!(project_from_console_url(
            "https://console.cloud.google.com/compute/instances",
            DEFAULT_CONSOLE_HOST
        )
        .is_none());
        assert!(project_from_console_url(
            "https://console.cloud.google.com/compute/instances?project=",
            DEFAULT_CONSOLE_HOST
        )
        .is_none());
    }

    #[tokio::test]
    async fn admin_tab_is_a_singleton() {
        let api = Arc::new(FakeApi::new());
        let mut coordinator = TabCoordinator::new(FakeHost::default(), api, DEFAULT_CONSOLE_HOST);

        let first = coordinator.on_icon_clicked().await.unwrap();
        let again = coordinator.on_icon_clicked().await.unwrap();
        assert_eq!(first, again);
        assert_eq!(coordinator.host().focused.lock().unwrap().as_slice(), &[first]);

        coordinator.host().user_closes(first);
        let recreated = coordinator.on_icon_clicked().await.unwrap();
        assert_ne!(recreated, first);
        assert_eq!(coordinator.admin_tab(), Some(recreated));
    }

    #[tokio::test]
    async fn console_navigation_lists_and_pushes_instances() {
        let (coordinator, api) = coordinator_with_vm().await;
        assert_eq!(api.sent("compute_instances"), vec![json!({"project": "prod-123"})]);
        assert_eq!(coordinator.directory().instances()[0].zone, "z1");
    }

    #[tokio::test]
    async fn popup_gets_instances_with_project() {
        let (mut coordinator, _) = coordinator_with_vm().await;
        let response = coordinator
            .handle(BackgroundRequest::PopupGetInstances, None)
            .await
            .unwrap();
        match response {
            BackgroundResponse::Instances {
                instances,
                project_name,
                error,
            } => {
                assert_eq!(instances.len(), 1);
                assert_eq!(project_name.as_deref(), Some("prod-123"));
                assert!(error.is_none());
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[tokio::test]
    async fn rdp_tab_lifecycle() {
        let (mut coordinator, _) = coordinator_with_vm().await;

        coordinator
            .handle(BackgroundRequest::StartPrivateRdp { instance: vm1() }, None)
            .await
            .unwrap();
        assert!(coordinator.directory().find("vm1").unwrap().rdp_running);
        let tab = coordinator.rdp_tabs()[0].tab;
        assert_eq!(coordinator.rdp_tabs()[0].status, RdpTabStatus::Created);

        // first load of a created tab is not a refresh
        assert!(!coordinator.on_tab_complete(tab).await.unwrap());

        let response = coordinator
            .handle(BackgroundRequest::RdpGetInstance, Some(tab))
            .await
            .unwrap();
        assert!(matches!(response, BackgroundResponse::Instance { ref instance } if instance.name == "vm1"));
        assert_eq!(coordinator.rdp_tabs()[0].status, RdpTabStatus::Ready);

        coordinator.on_tab_removed(tab);
        assert!(coordinator.rdp_tabs().is_empty());
        assert!(!coordinator.directory().find("vm1").unwrap().rdp_running);
    }

    #[tokio::test]
    async fn refreshed_ready_tab_is_closed() {
        let (mut coordinator, _) = coordinator_with_vm().await;
        coordinator
            .handle(BackgroundRequest::StartPrivateRdp { instance: vm1() }, None)
            .await
            .unwrap();
        let tab = coordinator.rdp_tabs()[0].tab;
        coordinator
            .handle(BackgroundRequest::RdpGetInstance, Some(tab))
            .await
            .unwrap();

        assert!(coordinator.on_tab_complete(tab).await.unwrap());
        assert!(coordinator.rdp_tabs().is_empty());
        assert!(!coordinator.host().is_open(tab));

        // the browser reports the removal after the close
        coordinator.on_tab_removed(tab);
        assert!(!coordinator.directory().find("vm1").unwrap().rdp_running);

        coordinator
            .handle(BackgroundRequest::StartPrivateRdp { instance: vm1() }, None)
            .await
            .unwrap();
        assert_eq!(coordinator.rdp_tabs().len(), 1);
    }

    #[tokio::test]
    async fn rdp_ended_and_untracked_requests() {
        let (mut coordinator, _) = coordinator_with_vm().await;
        coordinator
            .handle(BackgroundRequest::StartPrivateRdp { instance: vm1() }, None)
            .await
            .unwrap();

        let response = coordinator
            .handle(BackgroundRequest::RdpEnded { instance: vm1() }, None)
            .await
            .unwrap();
        assert_eq!(response, BackgroundResponse::Ack { ok: true });
        assert!(!coordinator.directory().find("vm1").unwrap().rdp_running);

        let response = coordinator
            .handle(BackgroundRequest::RdpGetInstance, Some(TabId(999)))
            .await
            .unwrap();
        assert_eq!(response, BackgroundResponse::Ack { ok: false });
    }

    #[tokio::test]
    async fn listing_error_reaches_the_popup() {
        let api = Arc::new(FakeApi::new());
        api.set_instances(json!({"error": "gCloud Auth"}));
        let mut coordinator = TabCoordinator::new(FakeHost::default(), api, DEFAULT_CONSOLE_HOST);
        assert!(coordinator.on_console_navigation(CONSOLE_URL).await.is_err());

        let response = coordinator
            .handle(BackgroundRequest::PopupGetInstances, None)
            .await
            .unwrap();
        assert_eq!(
            response,
            BackgroundResponse::Instances {
                instances: vec![],
                project_name: None,
                error: Some("gCloud Auth".into()),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn popup_poll_stops_once_instances_arrive() {
        let calls = AtomicU64::new(0);
        let response = wait_for_instances(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    BackgroundResponse::Instances {
                        instances: if n >= 2 { vec![vm1()] } else { vec![] },
                        project_name: None,
                        error: None,
                    }
                }
            },
            POPUP_POLL_INTERVAL,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(response, BackgroundResponse::Instances { ref instances, .. } if instances.len() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn popup_poll_stops_on_error() {
        let response = wait_for_instances(
            || async {
                BackgroundResponse::Instances {
                    instances: vec![],
                    project_name: None,
                    error: Some("gCloud Auth".into()),
                }
            },
            POPUP_POLL_INTERVAL,
        )
        .await;
        assert!(matches!(response, BackgroundResponse::Instances { error: Some(_), .. }));
    }
}
