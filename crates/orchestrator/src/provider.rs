//! Resource provider interface
//!
//! A provider turns one resolved intent into a managed resource and hands
//! back a [`Handle`] with the resource's identifying attributes. The
//! orchestrator relies on two guarantees:
//!
//! - `apply` is idempotent per `(locality, unit, logical_id)`: an intent with
//!   the recorded fingerprint returns the recorded handle as
//!   [`ApplyOutcome::Unchanged`] without side effects; a changed fingerprint
//!   updates the resource in place and keeps its physical id.
//! - `rollback` removes exactly the handles it is given (the resources
//!   created during an aborted pass) and is safe to call more than once.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::context::CancellationToken;
use crate::types::{ApplyOutcome, Locality, ResolvedIntent, ResourceKind};

/// Identifying attributes of a realized resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    pub unit: String,
    pub logical_id: String,
    pub kind: ResourceKind,
    pub physical_id: String,
    /// Fingerprint of the intent the resource currently matches
    pub fingerprint: String,
    pub attributes: BTreeMap<String, String>,
}

impl Handle {
    /// Get an attribute (id, arn, endpoint, ...)
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Handle plus what `apply` did to reach it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub handle: Handle,
    pub outcome: ApplyOutcome,
}

/// Errors a provider may report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider refused the intent
    #[error("rejected: {0}")]
    Rejected(String),

    /// A property the resource kind needs was not set
    #[error("missing required property {property} for {kind}")]
    MissingProperty { kind: ResourceKind, property: String },

    /// The call saw cancellation before making any change
    #[error("aborted before any change was made")]
    Aborted,
}

/// Backend that realizes resource intents
///
/// # Example
///
/// ```ignore
/// use orchestrator::{Applied, ApplyOutcome, CancellationToken, Handle, Locality};
/// use orchestrator::{ProviderError, ResolvedIntent, ResourceProvider};
///
/// struct EchoProvider;
///
/// impl ResourceProvider for EchoProvider {
///     fn apply(
///         &self,
///         _locality: &Locality,
///         intent: &ResolvedIntent,
///         _cancel: &CancellationToken,
///     ) -> Result<Applied, ProviderError> {
///         Ok(Applied {
///             handle: Handle {
///                 unit: intent.unit.clone(),
///                 logical_id: intent.logical_id.clone(),
///                 kind: intent.kind,
///                 physical_id: intent.physical_name.clone(),
///                 fingerprint: intent.fingerprint.clone(),
///                 attributes: Default::default(),
///             },
///             outcome: ApplyOutcome::Created,
///         })
///     }
///
///     fn rollback(&self, _: &Locality, _: &str, _: &[Handle]) -> Result<(), ProviderError> {
///         Ok(())
///     }
/// }
/// ```
pub trait ResourceProvider: Send + Sync {
    /// Create or update the resource described by `intent`
    ///
    /// Providers should check `cancel` before making a change and return
    /// [`ProviderError::Aborted`] when it is set.
    fn apply(
        &self,
        locality: &Locality,
        intent: &ResolvedIntent,
        cancel: &CancellationToken,
    ) -> Result<Applied, ProviderError>;

    /// Remove resources created during an aborted pass of `unit`
    fn rollback(&self, locality: &Locality, unit: &str, created: &[Handle]) -> Result<(), ProviderError>;
}
