//! Container signature matching policies.
//!
//! A signature describes what a container was launched with. The scheduler
//! asks the matcher two questions:
//!
//! - `is_super_set(candidate, required)`: can a container launched with
//!   `candidate` run work that requires `required`?
//! - `is_exact_match(left, right)`: are the two interchangeable without a
//!   re-launch?
//!
//! Both fail with [`MatchError::MissingSignature`] when either side is absent.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::MatchError;
use crate::util::serde::Resource;

/// Launch requirements carried by a signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Resource allotment the container was sized for.
    pub resource: Resource,
    /// Localized files, name to version/uri.
    pub local_resources: BTreeMap<String, String>,
    /// Process environment.
    pub environment: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// A spec with only a resource requirement.
    #[must_use]
    pub fn with_resource(resource: Resource) -> Self {
        Self {
            resource,
            ..Self::default()
        }
    }

    /// Add a localized resource.
    #[must_use]
    pub fn local_resource(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.local_resources.insert(name.into(), version.into());
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

/// Opaque, cheaply clonable container signature.
///
/// Clones share one allocation, so the identity policy can tell a clone of a
/// signature apart from an equal but separately built one.
#[derive(Clone)]
pub struct ContainerSignature {
    spec: Arc<LaunchSpec>,
}

impl ContainerSignature {
    /// Wrap a launch spec.
    #[must_use]
    pub fn new(spec: LaunchSpec) -> Self {
        Self {
            spec: Arc::new(spec),
        }
    }

    /// The launch spec behind the signature.
    #[must_use]
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// True when both handles point at the same signature instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.spec, &other.spec)
    }
}

impl fmt::Debug for ContainerSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerSignature")
            .field("resource", &self.spec.resource)
            .field("local_resources", &self.spec.local_resources.len())
            .field("environment", &self.spec.environment.len())
            .finish()
    }
}

/// Pluggable reuse/preemption policy. Implementations must be pure.
pub trait ContainerSignatureMatcher: Send + Sync {
    /// True when a container launched with `candidate` can run work requiring
    /// `required`.
    ///
    /// # Errors
    ///
    /// [`MatchError::MissingSignature`] if either argument is `None`.
    fn is_super_set(
        &self,
        candidate: Option<&ContainerSignature>,
        required: Option<&ContainerSignature>,
    ) -> Result<bool, MatchError>;

    /// True when the signatures are interchangeable without a re-launch.
    ///
    /// # Errors
    ///
    /// [`MatchError::MissingSignature`] if either argument is `None`.
    fn is_exact_match(
        &self,
        left: Option<&ContainerSignature>,
        right: Option<&ContainerSignature>,
    ) -> Result<bool, MatchError>;
}

fn resolve<'a>(
    first: Option<&'a ContainerSignature>,
    first_name: &'static str,
    second: Option<&'a ContainerSignature>,
    second_name: &'static str,
) -> Result<(&'a ContainerSignature, &'a ContainerSignature), MatchError> {
    let first = first.ok_or(MatchError::MissingSignature {
        argument: first_name,
    })?;
    let second = second.ok_or(MatchError::MissingSignature {
        argument: second_name,
    })?;
    Ok((first, second))
}

/// Ignores signatures: any container satisfies any request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysMatchesMatcher;

impl ContainerSignatureMatcher for AlwaysMatchesMatcher {
    fn is_super_set(
        &self,
        candidate: Option<&ContainerSignature>,
        required: Option<&ContainerSignature>,
    ) -> Result<bool, MatchError> {
        resolve(candidate, "candidate", required, "required")?;
        Ok(true)
    }

    fn is_exact_match(
        &self,
        left: Option<&ContainerSignature>,
        right: Option<&ContainerSignature>,
    ) -> Result<bool, MatchError> {
        resolve(left, "left", right, "right")?;
        Ok(true)
    }
}

/// Any container can host any work, but only the very same signature
/// instance is an exact match. Keeps preemption conservative.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMatcher;

impl ContainerSignatureMatcher for IdentityMatcher {
    fn is_super_set(
        &self,
        candidate: Option<&ContainerSignature>,
        required: Option<&ContainerSignature>,
    ) -> Result<bool, MatchError> {
        resolve(candidate, "candidate", required, "required")?;
        Ok(true)
    }

    fn is_exact_match(
        &self,
        left: Option<&ContainerSignature>,
        right: Option<&ContainerSignature>,
    ) -> Result<bool, MatchError> {
        let (left, right) = resolve(left, "left", right, "right")?;
        Ok(left.same_instance(right))
    }
}

/// Compares launch specs: the candidate must be at least as large and carry
/// every localized resource and environment entry the requirement names.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchContextMatcher;

fn contains_all(have: &BTreeMap<String, String>, want: &BTreeMap<String, String>) -> bool {
    want.iter().all(|(k, v)| have.get(k) == Some(v))
}

impl ContainerSignatureMatcher for LaunchContextMatcher {
    fn is_super_set(
        &self,
        candidate: Option<&ContainerSignature>,
        required: Option<&ContainerSignature>,
    ) -> Result<bool, MatchError> {
        let (candidate, required) = resolve(candidate, "candidate", required, "required")?;
        let (have, want) = (candidate.spec(), required.spec());
        Ok(have.resource.covers(&want.resource)
            && contains_all(&have.local_resources, &want.local_resources)
            && contains_all(&have.environment, &want.environment))
    }

    fn is_exact_match(
        &self,
        left: Option<&ContainerSignature>,
        right: Option<&ContainerSignature>,
    ) -> Result<bool, MatchError> {
        let (left, right) = resolve(left, "left", right, "right")?;
        Ok(left.same_instance(right) || left.spec() == right.spec())
    }
}
