//! The application-facing callback interface and its dispatching wrapper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::DispatcherConfig;
use crate::core::dispatcher::{CallbackDispatcher, DispatcherStats, PanicHook};
use crate::core::ledger::AllocatedContainer;
use crate::core::DispatchError;
use crate::util::serde::{
    ApplicationAccessType, ContainerId, ContainerStatus, Cookie, FinalApplicationStatus, NodeReport,
    Resource, TaskId,
};

/// Final status reported when the application unregisters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppFinalStatus {
    /// Outcome.
    pub status: FinalApplicationStatus,
    /// Free-form diagnostics.
    pub message: String,
    /// Where the finished application can be inspected.
    pub tracking_url: String,
}

impl AppFinalStatus {
    /// A status with an empty tracking URL.
    pub fn new(status: FinalApplicationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            tracking_url: String::new(),
        }
    }
}

/// Notifications the scheduler delivers to the application.
///
/// Methods run on a dispatcher worker thread, never on the thread that
/// triggered them. Implementations may call back into the scheduler.
pub trait TaskSchedulerAppCallback: Send + Sync + 'static {
    /// A container was assigned to a task.
    fn task_allocated(&self, task: TaskId, cookie: Cookie, container: AllocatedContainer);

    /// A container finished. `task` is `None` for an idle container.
    fn container_completed(&self, task: Option<TaskId>, status: ContainerStatus);

    /// The task running in `container_id` must give it up. The application
    /// acknowledges by calling `deallocate_container`.
    fn container_being_released(&self, container_id: ContainerId);

    /// Node membership or health changed.
    fn nodes_updated(&self, nodes: Vec<NodeReport>);

    /// The cluster asked the application to shut down.
    fn app_shutdown_requested(&self);

    /// Data returned by registration.
    fn set_application_registration_data(
        &self,
        max_capability: Resource,
        acls: HashMap<ApplicationAccessType, String>,
        client_to_am_token_key: Vec<u8>,
    );

    /// An asynchronous error, including panics raised by other callbacks.
    fn on_error(&self, error: anyhow::Error);

    /// Application progress in `[0, 1]`.
    fn get_progress(&self) -> f32;

    /// Final status used when unregistering.
    fn get_final_app_status(&self) -> AppFinalStatus;
}

/// Delivers [`TaskSchedulerAppCallback`] methods through a
/// [`CallbackDispatcher`].
pub struct AppCallbackDispatcher {
    app: Arc<dyn TaskSchedulerAppCallback>,
    dispatcher: CallbackDispatcher,
}

impl std::fmt::Debug for AppCallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCallbackDispatcher")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl AppCallbackDispatcher {
    /// Wrap `app`. A panicking callback is reported to `app.on_error`.
    ///
    /// # Errors
    ///
    /// Dispatcher construction failures.
    pub fn new(
        app: Arc<dyn TaskSchedulerAppCallback>,
        config: DispatcherConfig,
    ) -> Result<Self, DispatchError> {
        let hook_app = Arc::clone(&app);
        let hook: PanicHook = Arc::new(move |name, message| {
            hook_app.on_error(anyhow::anyhow!(
                "application callback `{name}` panicked: {message}"
            ));
        });
        let dispatcher = CallbackDispatcher::with_panic_hook(config, Some(hook))?;
        Ok(Self { app, dispatcher })
    }

    /// Dispatch `task_allocated`. Callbacks about one container are
    /// delivered in order.
    ///
    /// # Errors
    ///
    /// Dispatch failures.
    pub fn task_allocated(
        &self,
        task: TaskId,
        cookie: Cookie,
        container: AllocatedContainer,
    ) -> Result<(), DispatchError> {
        let app = Arc::clone(&self.app);
        let key = container.id.clone();
        self.dispatcher.dispatch_keyed(&key, "task_allocated", move || {
            app.task_allocated(task, cookie, container);
        })
    }

    /// Dispatch `container_completed`, after anything already dispatched for
    /// the same container.
    ///
    /// # Errors
    ///
    /// Dispatch failures.
    pub fn container_completed(
        &self,
        task: Option<TaskId>,
        status: ContainerStatus,
    ) -> Result<(), DispatchError> {
        let app = Arc::clone(&self.app);
        let key = status.container_id.clone();
        self.dispatcher.dispatch_keyed(&key, "container_completed", move || {
            app.container_completed(task, status);
        })
    }

    /// Dispatch `container_being_released`.
    ///
    /// # Errors
    ///
    /// Dispatch failures.
    pub fn container_being_released(&self, container_id: ContainerId) -> Result<(), DispatchError> {
        let app = Arc::clone(&self.app);
        let key = container_id.clone();
        self.dispatcher.dispatch_keyed(&key, "container_being_released", move || {
            app.container_being_released(container_id);
        })
    }

    /// Dispatch `nodes_updated`.
    ///
    /// # Errors
    ///
    /// Dispatch failures.
    pub fn nodes_updated(&self, nodes: Vec<NodeReport>) -> Result<(), DispatchError> {
        let app = Arc::clone(&self.app);
        self.dispatcher
            .dispatch("nodes_updated", move || app.nodes_updated(nodes))
    }

    /// Dispatch `app_shutdown_requested`.
    ///
    /// # Errors
    ///
    /// Dispatch failures.
    pub fn app_shutdown_requested(&self) -> Result<(), DispatchError> {
        let app = Arc::clone(&self.app);
        self.dispatcher
            .dispatch("app_shutdown_requested", move || app.app_shutdown_requested())
    }

    /// Dispatch `set_application_registration_data`.
    ///
    /// # Errors
    ///
    /// Dispatch failures.
    pub fn set_application_registration_data(
        &self,
        max_capability: Resource,
        acls: HashMap<ApplicationAccessType, String>,
        client_to_am_token_key: Vec<u8>,
    ) -> Result<(), DispatchError> {
        let app = Arc::clone(&self.app);
        self.dispatcher.dispatch("set_application_registration_data", move || {
            app.set_application_registration_data(max_capability, acls, client_to_am_token_key);
        })
    }

    /// Dispatch `on_error`.
    ///
    /// # Errors
    ///
    /// Dispatch failures.
    pub fn on_error(&self, error: anyhow::Error) -> Result<(), DispatchError> {
        let app = Arc::clone(&self.app);
        self.dispatcher.dispatch("on_error", move || app.on_error(error))
    }

    /// Dispatch `on_error` only if the queue has room right now.
    ///
    /// # Errors
    ///
    /// `QueueFull` or `Shutdown`.
    pub fn try_on_error(&self, error: anyhow::Error) -> Result<(), DispatchError> {
        let app = Arc::clone(&self.app);
        self.dispatcher.try_dispatch("on_error", move || app.on_error(error))
    }

    /// Ask the application for its progress and wait for the answer.
    ///
    /// # Errors
    ///
    /// Dispatch failures, timeout, or a panicking callback.
    pub fn get_progress(&self) -> Result<f32, DispatchError> {
        let app = Arc::clone(&self.app);
        self.dispatcher.call("get_progress", move || app.get_progress())
    }

    /// Ask the application for its final status and wait for the answer.
    ///
    /// # Errors
    ///
    /// Dispatch failures, timeout, or a panicking callback.
    pub fn get_final_app_status(&self) -> Result<AppFinalStatus, DispatchError> {
        let app = Arc::clone(&self.app);
        self.dispatcher
            .call("get_final_app_status", move || app.get_final_app_status())
    }

    /// See [`CallbackDispatcher::drain`].
    ///
    /// # Errors
    ///
    /// `DrainTimeout`.
    pub fn drain(&self) -> Result<(), DispatchError> {
        self.dispatcher.drain()
    }

    /// See [`CallbackDispatcher::drain_timeout`].
    ///
    /// # Errors
    ///
    /// `DrainTimeout`.
    pub fn drain_timeout(&self, timeout: Duration) -> Result<(), DispatchError> {
        self.dispatcher.drain_timeout(timeout)
    }

    /// See [`CallbackDispatcher::drain_async`].
    ///
    /// # Errors
    ///
    /// `DrainTimeout` or `Internal`.
    #[cfg(feature = "tokio-runtime")]
    pub async fn drain_async(&self, timeout: Duration) -> Result<(), DispatchError> {
        self.dispatcher.drain_async(timeout).await
    }

    /// Dispatcher counters.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    /// Shut the dispatcher down.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}
