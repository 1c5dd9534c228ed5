//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use container_scheduler::builders::TaskSchedulerBuilder;
use container_scheduler::config::{DispatcherConfig, SchedulerConfig};
use container_scheduler::core::{
    AllocatedContainer, AppFinalStatus, ContainerSignature, ContainerSignatureMatcher,
    InMemoryAuditSink, LaunchSpec, TaskRequest, TaskScheduler, TaskSchedulerAppCallback,
};
use container_scheduler::infra::InMemoryRmClient;
use container_scheduler::util::serde::{
    ApplicationAccessType, ContainerId, ContainerStatus, Cookie, FinalApplicationStatus, NodeId,
    NodeReport, Priority, Resource, TaskId,
};
use parking_lot::Mutex;

/// What the application observed, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Registered(Resource),
    TaskAllocated {
        task: TaskId,
        cookie: Cookie,
        container: ContainerId,
    },
    ContainerCompleted {
        task: Option<TaskId>,
        container: ContainerId,
    },
    BeingReleased(ContainerId),
    NodesUpdated(usize),
    ShutdownRequested,
    Error(String),
}

/// Application callback that records everything it is told.
pub struct RecordingApp {
    events: Mutex<Vec<AppEvent>>,
    progress: Mutex<f32>,
    final_status: Mutex<AppFinalStatus>,
    panic_on_allocation: AtomicBool,
    allocation_delay: Mutex<Duration>,
}

impl Default for RecordingApp {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            progress: Mutex::new(0.0),
            final_status: Mutex::new(AppFinalStatus::new(FinalApplicationStatus::Succeeded, "done")),
            panic_on_allocation: AtomicBool::new(false),
            allocation_delay: Mutex::new(Duration::ZERO),
        }
    }
}

impl RecordingApp {
    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().clone()
    }

    pub fn allocations(&self) -> Vec<(TaskId, Cookie, ContainerId)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::TaskAllocated {
                    task,
                    cookie,
                    container,
                } => Some((task, cookie, container)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::Error(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn set_progress(&self, progress: f32) {
        *self.progress.lock() = progress;
    }

    pub fn panic_on_allocation(&self, enabled: bool) {
        self.panic_on_allocation.store(enabled, Ordering::SeqCst);
    }

    /// Make every `task_allocated` take `delay` before recording.
    pub fn set_allocation_delay(&self, delay: Duration) {
        *self.allocation_delay.lock() = delay;
    }

    fn push(&self, event: AppEvent) {
        self.events.lock().push(event);
    }
}

impl TaskSchedulerAppCallback for RecordingApp {
    fn task_allocated(&self, task: TaskId, cookie: Cookie, container: AllocatedContainer) {
        assert!(
            !self.panic_on_allocation.load(Ordering::SeqCst),
            "application rejected {task}"
        );
        let delay = *self.allocation_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.push(AppEvent::TaskAllocated {
            task,
            cookie,
            container: container.id,
        });
    }

    fn container_completed(&self, task: Option<TaskId>, status: ContainerStatus) {
        self.push(AppEvent::ContainerCompleted {
            task,
            container: status.container_id,
        });
    }

    fn container_being_released(&self, container_id: ContainerId) {
        self.push(AppEvent::BeingReleased(container_id));
    }

    fn nodes_updated(&self, nodes: Vec<NodeReport>) {
        self.push(AppEvent::NodesUpdated(nodes.len()));
    }

    fn app_shutdown_requested(&self) {
        self.push(AppEvent::ShutdownRequested);
    }

    fn set_application_registration_data(
        &self,
        max_capability: Resource,
        _acls: HashMap<ApplicationAccessType, String>,
        _client_to_am_token_key: Vec<u8>,
    ) {
        self.push(AppEvent::Registered(max_capability));
    }

    fn on_error(&self, error: anyhow::Error) {
        self.push(AppEvent::Error(error.to_string()));
    }

    fn get_progress(&self) -> f32 {
        *self.progress.lock()
    }

    fn get_final_app_status(&self) -> AppFinalStatus {
        self.final_status.lock().clone()
    }
}

pub struct Harness {
    pub scheduler: Arc<TaskScheduler>,
    pub client: Arc<InMemoryRmClient>,
    pub app: Arc<RecordingApp>,
}

impl Harness {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::build(config, None)
    }

    pub fn with_matcher(config: SchedulerConfig, matcher: Arc<dyn ContainerSignatureMatcher>) -> Self {
        Self::build(config, Some(matcher))
    }

    fn build(config: SchedulerConfig, matcher: Option<Arc<dyn ContainerSignatureMatcher>>) -> Self {
        let client = Arc::new(InMemoryRmClient::new(Resource::new(8192, 8)));
        let app = Arc::new(RecordingApp::default());
        let mut builder = TaskSchedulerBuilder::new(config)
            .client(client.clone())
            .app(app.clone())
            .audit(Box::new(InMemoryAuditSink::new(256)));
        if let Some(matcher) = matcher {
            builder = builder.matcher(matcher);
        }
        let scheduler = Arc::new(builder.build().unwrap());
        scheduler.start().unwrap();
        scheduler.drain().unwrap();
        client.clear_calls();
        Self {
            scheduler,
            client,
            app,
        }
    }

    pub fn drain(&self) {
        self.scheduler.drain().unwrap();
    }
}

pub fn config() -> SchedulerConfig {
    SchedulerConfig::new().with_dispatcher(DispatcherConfig::new())
}

pub fn signature(memory_mb: u64) -> ContainerSignature {
    ContainerSignature::new(LaunchSpec::with_resource(Resource::new(memory_mb, 1)))
}

pub fn request(task: u64, priority: u32, memory_mb: u64, signature: &ContainerSignature) -> TaskRequest {
    TaskRequest::new(
        TaskId(task),
        Resource::new(memory_mb, 1),
        Priority(priority),
        signature.clone(),
    )
}

pub fn container(id: &str, memory_mb: u64, priority: u32) -> AllocatedContainer {
    AllocatedContainer::new(
        ContainerId::new(id),
        NodeId::new("host1", 8041),
        Resource::new(memory_mb, 1),
        Priority(priority),
    )
}
