//! Scheduler configuration structures.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::DispatcherConfig;

/// Built-in container signature matching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    /// Any container satisfies any request.
    AlwaysMatch,
    /// Only the same signature instance is an exact match.
    Identity,
    /// Compare resource, localized files and environment.
    LaunchContext,
}

impl FromStr for MatcherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "always_match" => Ok(Self::AlwaysMatch),
            "identity" => Ok(Self::Identity),
            "launch_context" => Ok(Self::LaunchContext),
            other => Err(format!("unknown matcher `{other}`")),
        }
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Host the application master advertises on registration.
    pub app_host: String,
    /// Port the application master advertises on registration.
    pub app_port: u16,
    /// Tracking URL advertised on registration and unregistration.
    pub tracking_url: String,
    /// Keep containers of finished tasks for later requests.
    pub reuse_enabled: bool,
    /// Take containers from lower-priority work when the cluster is full.
    pub preemption_enabled: bool,
    /// Release containers idle for longer than this. `None` keeps them.
    pub idle_release_timeout_ms: Option<u64>,
    /// Event loop tick used to check for expired idle containers.
    pub idle_check_interval_ms: u64,
    /// How long to expect the completion of a container released on
    /// arrival before forgetting it.
    pub release_completion_timeout_ms: u64,
    /// Bounded depth of the inbound cluster event queue.
    pub event_queue_depth: usize,
    /// Matching policy when none is supplied explicitly.
    pub matcher: MatcherKind,
    /// Callback dispatcher settings.
    pub dispatcher: DispatcherConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            app_host: "localhost".into(),
            app_port: 0,
            tracking_url: String::new(),
            reuse_enabled: true,
            preemption_enabled: true,
            idle_release_timeout_ms: None,
            idle_check_interval_ms: 1_000,
            release_completion_timeout_ms: 600_000,
            event_queue_depth: 1024,
            matcher: MatcherKind::AlwaysMatch,
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable container reuse.
    #[must_use]
    pub const fn with_reuse(mut self, enabled: bool) -> Self {
        self.reuse_enabled = enabled;
        self
    }

    /// Enable or disable preemption.
    #[must_use]
    pub const fn with_preemption(mut self, enabled: bool) -> Self {
        self.preemption_enabled = enabled;
        self
    }

    /// Release idle containers after `timeout_ms`.
    #[must_use]
    pub const fn with_idle_release_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_release_timeout_ms = Some(timeout_ms);
        self
    }

    /// Forget containers released on arrival after `timeout_ms` without a
    /// completion.
    #[must_use]
    pub const fn with_release_completion_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.release_completion_timeout_ms = timeout_ms;
        self
    }

    /// Select the built-in matcher.
    #[must_use]
    pub const fn with_matcher(mut self, matcher: MatcherKind) -> Self {
        self.matcher = matcher;
        self
    }

    /// Replace the dispatcher settings.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Validate scheduler configuration values.
    ///
    /// # Errors
    ///
    /// A message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.app_host.trim().is_empty() {
            return Err("app_host must not be empty".into());
        }
        if self.idle_check_interval_ms == 0 {
            return Err("idle_check_interval_ms must be greater than 0".into());
        }
        if self.release_completion_timeout_ms == 0 {
            return Err("release_completion_timeout_ms must be greater than 0".into());
        }
        if self.event_queue_depth == 0 {
            return Err("event_queue_depth must be greater than 0".into());
        }
        if self.idle_release_timeout_ms == Some(0) {
            return Err("idle_release_timeout_ms must be greater than 0 when set".into());
        }
        self.dispatcher
            .validate()
            .map_err(|e| format!("dispatcher invalid: {e}"))
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the process environment, reading a `.env`
    /// file first if present. `SCHEDULER_*` variables override defaults.
    ///
    /// # Errors
    ///
    /// Unparsable variable or validation failure.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Unparsable variable or validation failure.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(host) = lookup("SCHEDULER_APP_HOST") {
            cfg.app_host = host;
        }
        if let Some(url) = lookup("SCHEDULER_TRACKING_URL") {
            cfg.tracking_url = url;
        }
        parse_var(&lookup, "SCHEDULER_APP_PORT", &mut cfg.app_port)?;
        parse_var(&lookup, "SCHEDULER_REUSE_ENABLED", &mut cfg.reuse_enabled)?;
        parse_var(&lookup, "SCHEDULER_PREEMPTION_ENABLED", &mut cfg.preemption_enabled)?;
        parse_var(&lookup, "SCHEDULER_IDLE_CHECK_INTERVAL_MS", &mut cfg.idle_check_interval_ms)?;
        parse_var(&lookup, "SCHEDULER_EVENT_QUEUE_DEPTH", &mut cfg.event_queue_depth)?;
        parse_var(
            &lookup,
            "SCHEDULER_RELEASE_COMPLETION_TIMEOUT_MS",
            &mut cfg.release_completion_timeout_ms,
        )?;
        parse_var(&lookup, "SCHEDULER_MATCHER", &mut cfg.matcher)?;
        parse_var(&lookup, "SCHEDULER_CALLBACK_WORKERS", &mut cfg.dispatcher.workers)?;
        parse_var(&lookup, "SCHEDULER_CALLBACK_QUEUE_DEPTH", &mut cfg.dispatcher.queue_depth)?;
        parse_var(&lookup, "SCHEDULER_DRAIN_TIMEOUT_MS", &mut cfg.dispatcher.drain_timeout_ms)?;
        parse_var(&lookup, "SCHEDULER_ENQUEUE_TIMEOUT_MS", &mut cfg.dispatcher.enqueue_timeout_ms)?;
        parse_var(&lookup, "SCHEDULER_CALL_TIMEOUT_MS", &mut cfg.dispatcher.call_timeout_ms)?;

        let mut idle_timeout = 0_u64;
        if parse_var(&lookup, "SCHEDULER_IDLE_RELEASE_TIMEOUT_MS", &mut idle_timeout)? {
            cfg.idle_release_timeout_ms = Some(idle_timeout);
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<bool, String>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(false);
    };
    *slot = raw
        .trim()
        .parse()
        .map_err(|e| format!("{key}: cannot parse `{raw}`: {e}"))?;
    Ok(true)
}
