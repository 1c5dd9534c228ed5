//! Assemble a [`TaskScheduler`] from configuration and collaborators.

use std::sync::Arc;

use crate::config::{MatcherKind, SchedulerConfig};
use crate::core::audit::AuditSink;
use crate::core::callback::TaskSchedulerAppCallback;
use crate::core::matcher::{
    AlwaysMatchesMatcher, ContainerSignatureMatcher, IdentityMatcher, LaunchContextMatcher,
};
use crate::core::scheduler::TaskScheduler;
use crate::core::SchedulerError;
use crate::infra::rm::ResourceManagerClient;

/// The built-in matcher for `kind`.
#[must_use]
pub fn matcher_for(kind: MatcherKind) -> Arc<dyn ContainerSignatureMatcher> {
    match kind {
        MatcherKind::AlwaysMatch => Arc::new(AlwaysMatchesMatcher),
        MatcherKind::Identity => Arc::new(IdentityMatcher),
        MatcherKind::LaunchContext => Arc::new(LaunchContextMatcher),
    }
}

/// Builder for [`TaskScheduler`].
///
/// ```rust,ignore
/// let scheduler = TaskSchedulerBuilder::new(SchedulerConfig::from_env()?)
///     .client(Arc::new(InMemoryRmClient::new(Resource::new(8192, 8))))
///     .app(app)
///     .build()?;
/// scheduler.start()?;
/// ```
#[derive(Default)]
pub struct TaskSchedulerBuilder {
    config: SchedulerConfig,
    matcher: Option<Arc<dyn ContainerSignatureMatcher>>,
    client: Option<Arc<dyn ResourceManagerClient>>,
    app: Option<Arc<dyn TaskSchedulerAppCallback>>,
    audit: Option<Box<dyn AuditSink>>,
}

impl TaskSchedulerBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Use `matcher` instead of the one named by the configuration.
    #[must_use]
    pub fn matcher(mut self, matcher: Arc<dyn ContainerSignatureMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Resource-manager client. Required.
    #[must_use]
    pub fn client(mut self, client: Arc<dyn ResourceManagerClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Application callbacks. Required.
    #[must_use]
    pub fn app(mut self, app: Arc<dyn TaskSchedulerAppCallback>) -> Self {
        self.app = Some(app);
        self
    }

    /// Record scheduling decisions to `sink`.
    #[must_use]
    pub fn audit(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Build the scheduler.
    ///
    /// # Errors
    ///
    /// `Config` when a required collaborator is missing or the configuration
    /// is invalid.
    pub fn build(self) -> Result<TaskScheduler, SchedulerError> {
        let client = self
            .client
            .ok_or_else(|| SchedulerError::Config("resource manager client is required".into()))?;
        let app = self
            .app
            .ok_or_else(|| SchedulerError::Config("application callback is required".into()))?;
        let matcher = self
            .matcher
            .unwrap_or_else(|| matcher_for(self.config.matcher));
        TaskScheduler::new(self.config, matcher, client, app, self.audit)
    }
}
