//! Cross-locality reference resolution
//!
//! The resolver owns the committed export table. Same-locality consumers
//! read exports directly once the producer is committed. Cross-locality
//! consumers get a [`DeferredRef`] naming a replicated parameter in their own
//! locality; the parameter only exists after the producer commits, and
//! [`ReferenceResolver::await_deferred`] blocks or fails according to the
//! [`ResolvePolicy`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::context::{CancellationToken, DeployContext};
use crate::error::{Error, Result, UnresolvedReason};
use crate::types::{Locality, ResolvePolicy};
use crate::unit::AttributeRef;

/// Longest single sleep while waiting, so cancellation is noticed promptly
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Lifecycle of a producing unit as seen by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProducerStatus {
    Pending,
    Completed,
    Failed,
}

/// Placeholder for an export that lives in another locality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredRef {
    pub reference: AttributeRef,
    /// Parameter the producer's export is replicated into
    pub parameter: String,
    pub producer: Locality,
    pub consumer: Locality,
}

/// What a consumer gets back when importing an attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Imported {
    Value(String),
    Deferred(DeferredRef),
}

#[derive(Debug, Default)]
struct StoreState {
    localities: HashMap<String, Locality>,
    status: HashMap<String, ProducerStatus>,
    exports: BTreeMap<String, BTreeMap<String, String>>,
    parameters: BTreeMap<(Locality, String), String>,
}

/// Export table shared by every unit of a run
#[derive(Debug)]
pub struct ReferenceResolver {
    context: DeployContext,
    policy: ResolvePolicy,
    cancel: CancellationToken,
    state: Mutex<StoreState>,
    committed: Condvar,
}

impl ReferenceResolver {
    pub fn new(context: DeployContext, policy: ResolvePolicy) -> Self {
        Self {
            context,
            policy,
            cancel: CancellationToken::new(),
            state: Mutex::new(StoreState::default()),
            committed: Condvar::new(),
        }
    }

    /// Abort waits when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a producing unit as pending
    pub fn register(&self, unit: &str, locality: &Locality) {
        let mut state = self.lock();
        state.localities.insert(unit.to_string(), locality.clone());
        state.status.insert(unit.to_string(), ProducerStatus::Pending);
    }

    /// Commit a unit's exports and replicate them into other localities
    ///
    /// Everything becomes visible at once: no reader can observe some keys
    /// of a commit without the others.
    pub fn commit(&self, unit: &str, exports: BTreeMap<String, String>, replicate_to: &[Locality]) {
        let mut state = self.lock();
        let producer = state.localities.get(unit).cloned();

        for target in replicate_to {
            if producer.as_ref() == Some(target) {
                continue;
            }
            for (key, value) in &exports {
                let name = self.context.parameter_name(unit, key);
                log::debug!("replicating {unit}.{key} into {target} as {name}");
                state.parameters.insert((target.clone(), name), value.clone());
            }
        }

        state.exports.insert(unit.to_string(), exports);
        state.status.insert(unit.to_string(), ProducerStatus::Completed);
        drop(state);
        self.committed.notify_all();
    }

    /// Record that a unit failed or was skipped; waiting consumers give up
    pub fn mark_failed(&self, unit: &str) {
        self.lock()
            .status
            .insert(unit.to_string(), ProducerStatus::Failed);
        self.committed.notify_all();
    }

    /// Import an attribute into a consumer locality
    ///
    /// Same-locality imports are read directly and fail unless the producer
    /// has committed. Cross-locality imports always return a deferred
    /// reference to be settled with [`Self::await_deferred`].
    pub fn import_attribute(&self, reference: &AttributeRef, consumer: &Locality) -> Result<Imported> {
        let state = self.lock();
        let Some(producer) = state.localities.get(&reference.unit) else {
            return Err(Error::unresolved(reference, UnresolvedReason::UnknownProducer));
        };

        if producer != consumer {
            return Ok(Imported::Deferred(DeferredRef {
                reference: reference.clone(),
                parameter: self.context.parameter_name(&reference.unit, &reference.key),
                producer: producer.clone(),
                consumer: consumer.clone(),
            }));
        }

        match state.status.get(&reference.unit) {
            Some(ProducerStatus::Completed) => state
                .exports
                .get(&reference.unit)
                .and_then(|exports| exports.get(&reference.key))
                .map(|value| Imported::Value(value.clone()))
                .ok_or_else(|| Error::unresolved(reference, UnresolvedReason::MissingExport)),
            Some(ProducerStatus::Failed) => {
                Err(Error::unresolved(reference, UnresolvedReason::ProducerFailed))
            }
            _ => Err(Error::unresolved(
                reference,
                UnresolvedReason::ProducerNotCompleted,
            )),
        }
    }

    /// Read a deferred reference's replicated parameter
    ///
    /// Never returns a value before the producer's commit. Under
    /// [`ResolvePolicy::Wait`] this blocks until the producer settles or the
    /// timeout elapses.
    pub fn await_deferred(&self, deferred: &DeferredRef) -> Result<String> {
        let reference = &deferred.reference;
        let key = (deferred.consumer.clone(), deferred.parameter.clone());
        let started = Instant::now();
        let mut state = self.lock();

        loop {
            if let Some(value) = state.parameters.get(&key) {
                return Ok(value.clone());
            }

            match state.status.get(&reference.unit) {
                Some(ProducerStatus::Completed) => {
                    return Err(Error::unresolved(reference, UnresolvedReason::MissingExport));
                }
                Some(ProducerStatus::Failed) => {
                    return Err(Error::unresolved(reference, UnresolvedReason::ProducerFailed));
                }
                Some(ProducerStatus::Pending) => {}
                None => {
                    return Err(Error::unresolved(reference, UnresolvedReason::UnknownProducer));
                }
            }

            if self.cancel.is_cancelled() {
                return Err(Error::unresolved(reference, UnresolvedReason::Cancelled));
            }

            let timeout = match self.policy {
                ResolvePolicy::FailFast => {
                    return Err(Error::unresolved(
                        reference,
                        UnresolvedReason::ProducerNotCompleted,
                    ));
                }
                ResolvePolicy::Wait(timeout) => timeout,
            };

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(Error::unresolved(
                    reference,
                    UnresolvedReason::TimedOut {
                        waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                    },
                ));
            }

            let slice = (timeout - waited).min(WAIT_SLICE);
            state = self
                .committed
                .wait_timeout(state, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Resolve a reference to its concrete value for a consumer locality
    pub fn resolve(&self, reference: &AttributeRef, consumer: &Locality) -> Result<String> {
        match self.import_attribute(reference, consumer)? {
            Imported::Value(value) => Ok(value),
            Imported::Deferred(deferred) => {
                log::debug!(
                    "waiting for {} in {} ({})",
                    deferred.reference,
                    deferred.consumer,
                    deferred.parameter
                );
                self.await_deferred(&deferred)
            }
        }
    }

    /// Committed exports per unit
    pub fn export_table(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.lock().exports.clone()
    }

    /// Replicated parameter value in a locality
    pub fn parameter(&self, locality: &Locality, name: &str) -> Option<String> {
        self.lock()
            .parameters
            .get(&(locality.clone(), name.to_string()))
            .cloned()
    }

    pub fn status(&self, unit: &str) -> Option<ProducerStatus> {
        self.lock().status.get(unit).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn syd() -> Locality {
        Locality::new("123456789012", "ap-southeast-2")
    }

    fn use1() -> Locality {
        Locality::new("123456789012", "us-east-1")
    }

    fn resolver(policy: ResolvePolicy) -> ReferenceResolver {
        let resolver = ReferenceResolver::new(DeployContext::new("cms", "123456789012"), policy);
        resolver.register("Compute", &syd());
        resolver.register("Database", &syd());
        resolver
    }

    fn hostname() -> BTreeMap<String, String> {
        BTreeMap::from([("origin_hostname".to_string(), "origin.example.com".to_string())])
    }

    #[test]
    fn test_same_locality_visible_only_after_commit() {
        let resolver = resolver(ResolvePolicy::FailFast);
        let reference = AttributeRef::new("Compute", "origin_hostname");

        let err = resolver.resolve(&reference, &syd()).unwrap_err();
        assert_eq!(
            err,
            Error::unresolved(&reference, UnresolvedReason::ProducerNotCompleted)
        );

        resolver.commit("Compute", hostname(), &[]);
        assert_eq!(
            resolver.import_attribute(&reference, &syd()).unwrap(),
            Imported::Value("origin.example.com".into())
        );
    }

    #[test]
    fn test_cross_locality_is_deferred_and_fails_fast_before_commit() {
        let resolver = resolver(ResolvePolicy::FailFast);
        let reference = AttributeRef::new("Compute", "origin_hostname");

        let Imported::Deferred(deferred) = resolver.import_attribute(&reference, &use1()).unwrap()
        else {
            panic!("expected a deferred reference");
        };
        assert_eq!(deferred.parameter, "/cms/exports/Compute/origin_hostname");
        assert!(resolver.await_deferred(&deferred).is_err());

        resolver.commit("Compute", hostname(), &[use1()]);
        assert_eq!(
            resolver.await_deferred(&deferred).unwrap(),
            "origin.example.com"
        );
        assert_eq!(
            resolver.parameter(&use1(), "/cms/exports/Compute/origin_hostname"),
            Some("origin.example.com".into())
        );
    }

    #[test]
    fn test_wait_times_out() {
        let resolver = resolver(ResolvePolicy::Wait(Duration::from_millis(60)));
        let reference = AttributeRef::new("Compute", "origin_hostname");
        let err = resolver.resolve(&reference, &use1()).unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedReference {
                reason: UnresolvedReason::TimedOut { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_wait_returns_once_another_thread_commits() {
        let resolver = Arc::new(resolver(ResolvePolicy::Wait(Duration::from_secs(10))));
        let reference = AttributeRef::new("Compute", "origin_hostname");

        let producer = {
            let resolver = Arc::clone(&resolver);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                resolver.commit("Compute", hostname(), &[use1()]);
            })
        };

        assert_eq!(
            resolver.resolve(&reference, &use1()).unwrap(),
            "origin.example.com"
        );
        producer.join().unwrap();
    }

    #[test]
    fn test_failed_producer_and_missing_keys() {
        let resolver = resolver(ResolvePolicy::Wait(Duration::from_secs(10)));
        resolver.mark_failed("Database");
        let err = resolver
            .resolve(&AttributeRef::new("Database", "endpoint"), &use1())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedReference {
                reason: UnresolvedReason::ProducerFailed,
                ..
            }
        ));

        resolver.commit("Compute", hostname(), &[use1()]);
        let err = resolver
            .resolve(&AttributeRef::new("Compute", "dns_name"), &use1())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedReference {
                reason: UnresolvedReason::MissingExport,
                ..
            }
        ));

        let err = resolver
            .resolve(&AttributeRef::new("Ghost", "x"), &syd())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedReference {
                reason: UnresolvedReason::UnknownProducer,
                ..
            }
        ));
    }

    #[test]
    fn test_cancellation_stops_waiting() {
        let token = CancellationToken::new();
        let resolver = resolver(ResolvePolicy::Wait(Duration::from_secs(10)))
            .with_cancellation(token.clone());
        token.cancel();
        let err = resolver
            .resolve(&AttributeRef::new("Compute", "origin_hostname"), &use1())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedReference {
                reason: UnresolvedReason::Cancelled,
                ..
            }
        ));
        assert_eq!(resolver.status("Compute"), Some(ProducerStatus::Pending));
    }
}
