//! # Container Scheduler
//!
//! The container-scheduling core of a DAG execution engine running on a
//! shared cluster. Tasks ask for containers; the scheduler turns those asks
//! into cluster container requests, assigns the containers the cluster
//! grants, keeps finished tasks' containers around for reuse, and takes
//! containers back from lower-priority work when a more important task is
//! starved.
//!
//! ## Components
//!
//! - **Signature matching** (`core::matcher`): decides whether a held
//!   container can serve a task (superset) and whether it was launched for
//!   exactly that task (exact match)
//! - **Request ledger** (`core::ledger`): outstanding requests keyed by
//!   cookie, and the held container set
//! - **Callback dispatch** (`core::dispatcher`, `core::callback`): delivers
//!   application notifications on worker threads, isolates panics, and
//!   supports draining
//! - **Scheduler** (`core::scheduler`): the orchestrator, including reuse
//!   and preemption (`core::preemption`)
//! - **Resource-manager boundary** (`infra`): the protocol client trait, an
//!   in-memory client, and the inbound event loop
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use container_scheduler::builders::TaskSchedulerBuilder;
//! use container_scheduler::config::SchedulerConfig;
//! use container_scheduler::core::{ContainerSignature, LaunchSpec, TaskRequest};
//! use container_scheduler::infra::{InMemoryRmClient, SchedulerEventLoop};
//! use container_scheduler::util::serde::{Priority, Resource, TaskId};
//!
//! let config = SchedulerConfig::from_env()?;
//! let scheduler = Arc::new(
//!     TaskSchedulerBuilder::new(config.clone())
//!         .client(Arc::new(InMemoryRmClient::new(Resource::new(8192, 8))))
//!         .app(my_app)
//!         .build()?,
//! );
//! scheduler.start()?;
//! let events = SchedulerEventLoop::spawn(Arc::clone(&scheduler), &config)?;
//!
//! let signature = ContainerSignature::new(LaunchSpec::with_resource(Resource::new(1024, 1)));
//! let cookie = scheduler.request_task(
//!     TaskRequest::new(TaskId(1), Resource::new(1024, 1), Priority(5), signature)
//!         .on_nodes(["host1"]),
//! )?;
//!
//! // ... protocol client submits RmEvents through `events` ...
//!
//! events.stop();
//! scheduler.stop()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Configuration models for the scheduler and its dispatcher.
pub mod config;
/// Matching, bookkeeping, preemption, dispatch and the scheduler.
pub mod core;
/// Resource-manager boundary: client trait, in-memory client, event loop.
pub mod infra;
/// Shared utilities.
pub mod util;
