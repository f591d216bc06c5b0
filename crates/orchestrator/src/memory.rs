//! In-memory reference provider
//!
//! Keeps every realized resource in a map keyed by locality, unit and
//! logical id, and synthesizes the attributes real resources expose (ids,
//! ARNs, endpoints). Used by tests and by the CLI, which persists the
//! records between runs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::context::CancellationToken;
use crate::provider::{Applied, Handle, ProviderError, ResourceProvider};
use crate::types::{ApplyOutcome, Locality, ResolvedIntent, ResourceKind};

/// Most availability zones a region offers
const MAX_AZS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ResourceKey {
    locality: Locality,
    unit: String,
    logical_id: String,
}

impl ResourceKey {
    fn new(locality: &Locality, unit: &str, logical_id: &str) -> Self {
        Self {
            locality: locality.clone(),
            unit: unit.to_string(),
            logical_id: logical_id.to_string(),
        }
    }
}

/// A recorded handle and the locality it lives in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHandle {
    pub locality: Locality,
    pub handle: Handle,
}

/// Provider that realizes intents in memory
#[derive(Debug, Default)]
pub struct MemoryProvider {
    resources: Mutex<BTreeMap<ResourceKey, Handle>>,
    failures: Mutex<HashSet<(String, String)>>,
    apply_calls: AtomicUsize,
    side_effects: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously recorded handles
    pub fn with_records(records: Vec<StoredHandle>) -> Self {
        let resources = records
            .into_iter()
            .map(|record| {
                let key = ResourceKey::new(
                    &record.locality,
                    &record.handle.unit,
                    &record.handle.logical_id,
                );
                (key, record.handle)
            })
            .collect();
        Self {
            resources: Mutex::new(resources),
            ..Self::default()
        }
    }

    /// Make every apply of `unit`/`logical_id` fail
    pub fn fail_on(&self, unit: &str, logical_id: &str) {
        lock(&self.failures).insert((unit.to_string(), logical_id.to_string()));
    }

    /// Number of `apply` calls received
    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Number of creates, updates and removals performed
    pub fn side_effects(&self) -> usize {
        self.side_effects.load(Ordering::SeqCst)
    }

    /// Number of handles removed by rollbacks
    pub fn rolled_back(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Recorded handle for a resource
    pub fn get(&self, locality: &Locality, unit: &str, logical_id: &str) -> Option<Handle> {
        lock(&self.resources)
            .get(&ResourceKey::new(locality, unit, logical_id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.resources).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All recorded handles, ordered by locality, unit and logical id
    pub fn snapshot(&self) -> Vec<StoredHandle> {
        lock(&self.resources)
            .iter()
            .map(|(key, handle)| StoredHandle {
                locality: key.locality.clone(),
                handle: handle.clone(),
            })
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ResourceProvider for MemoryProvider {
    fn apply(
        &self,
        locality: &Locality,
        intent: &ResolvedIntent,
        cancel: &CancellationToken,
    ) -> Result<Applied, ProviderError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);

        if cancel.is_cancelled() {
            return Err(ProviderError::Aborted);
        }
        if lock(&self.failures).contains(&(intent.unit.clone(), intent.logical_id.clone())) {
            return Err(ProviderError::Rejected(format!(
                "{} {} failed to stabilize",
                intent.kind, intent.logical_id
            )));
        }

        let key = ResourceKey::new(locality, &intent.unit, &intent.logical_id);
        let mut resources = lock(&self.resources);

        if let Some(existing) = resources.get_mut(&key) {
            if existing.fingerprint == intent.fingerprint {
                return Ok(Applied {
                    handle: existing.clone(),
                    outcome: ApplyOutcome::Unchanged,
                });
            }
            existing.attributes = synthesize(locality, intent, &existing.physical_id)?;
            existing.fingerprint.clone_from(&intent.fingerprint);
            self.side_effects.fetch_add(1, Ordering::SeqCst);
            return Ok(Applied {
                handle: existing.clone(),
                outcome: ApplyOutcome::Updated,
            });
        }

        let physical_id = format!(
            "{}-{}",
            intent.kind.id_prefix(),
            short_hash(&format!("{locality}/{}", intent.physical_name), 17)
        );
        let handle = Handle {
            unit: intent.unit.clone(),
            logical_id: intent.logical_id.clone(),
            kind: intent.kind,
            attributes: synthesize(locality, intent, &physical_id)?,
            physical_id,
            fingerprint: intent.fingerprint.clone(),
        };
        resources.insert(key, handle.clone());
        self.side_effects.fetch_add(1, Ordering::SeqCst);

        Ok(Applied {
            handle,
            outcome: ApplyOutcome::Created,
        })
    }

    fn rollback(&self, locality: &Locality, unit: &str, created: &[Handle]) -> Result<(), ProviderError> {
        let mut resources = lock(&self.resources);
        for handle in created.iter().rev() {
            let key = ResourceKey::new(locality, unit, &handle.logical_id);
            if resources
                .get(&key)
                .is_some_and(|current| current.physical_id == handle.physical_id)
            {
                resources.remove(&key);
                self.side_effects.fetch_add(1, Ordering::SeqCst);
                self.rollbacks.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

fn short_hash(text: &str, len: usize) -> String {
    let hash = blake3::hash(text.as_bytes()).to_hex();
    hash.as_str()[..len].to_string()
}

fn required<'a>(intent: &'a ResolvedIntent, property: &str) -> Result<&'a str, ProviderError> {
    intent
        .property(property)
        .ok_or_else(|| ProviderError::MissingProperty {
            kind: intent.kind,
            property: property.to_string(),
        })
}

/// Attributes a real resource of this kind would expose
fn synthesize(
    locality: &Locality,
    intent: &ResolvedIntent,
    physical_id: &str,
) -> Result<BTreeMap<String, String>, ProviderError> {
    let region = &locality.region;
    let name = &intent.physical_name;
    let hash = short_hash(physical_id, 12);

    let mut attributes = BTreeMap::from([
        ("id".to_string(), physical_id.to_string()),
        ("name".to_string(), name.clone()),
        (
            "arn".to_string(),
            format!(
                "arn:aws:{}:{region}:{}:{}/{name}",
                intent.kind.service(),
                locality.account,
                intent.kind
            ),
        ),
    ]);
    let mut set = |key: &str, value: String| {
        attributes.insert(key.to_string(), value);
    };

    match intent.kind {
        ResourceKind::Vpc => {
            let azs: usize = intent
                .property("max_azs")
                .and_then(|n| n.parse().ok())
                .unwrap_or(2)
                .min(MAX_AZS);
            let subnets = |tier: &str| {
                (0..azs)
                    .map(|az| format!("subnet-{}", short_hash(&format!("{physical_id}/{tier}/{az}"), 12)))
                    .collect::<Vec<_>>()
                    .join(",")
            };
            set("cidr", intent.property("cidr").unwrap_or("10.0.0.0/16").to_string());
            set("public_subnets", subnets("public"));
            set("private_subnets", subnets("private"));
        }
        ResourceKind::DatabaseInstance => {
            set("endpoint", format!("{name}.{hash}.{region}.rds.amazonaws.com"));
            set("port", intent.property("port").unwrap_or("3306").to_string());
        }
        ResourceKind::LoadBalancer => {
            set("dns_name", format!("{name}-{hash}.{region}.elb.amazonaws.com"));
            set("canonical_zone_id", format!("Z{}", hash.to_uppercase()));
        }
        ResourceKind::HostedZone => {
            set("zone_id", format!("Z{}", hash.to_uppercase()));
            set("zone_name", required(intent, "domain_name")?.to_string());
        }
        ResourceKind::DnsRecord => {
            let zone = required(intent, "zone_name")?;
            let fqdn = match intent.property("record_name") {
                Some(record) if !record.is_empty() => format!("{record}.{zone}"),
                _ => zone.to_string(),
            };
            set("fqdn", fqdn);
        }
        ResourceKind::Certificate => {
            if let Some(arn) = intent.property("certificate_arn") {
                set("arn", arn.to_string());
            }
        }
        ResourceKind::Distribution => {
            set("domain_name", format!("d{}.cloudfront.net", &hash[..12]));
            set("distribution_id", format!("E{}", hash.to_uppercase()));
        }
        ResourceKind::FileSystem => {
            set("file_system_id", format!("fs-{hash}"));
        }
        ResourceKind::AccessPoint => {
            set("access_point_id", format!("fsap-{hash}"));
        }
        _ => {}
    }

    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syd() -> Locality {
        Locality::new("123456789012", "ap-southeast-2")
    }

    fn vpc(max_azs: &str) -> ResolvedIntent {
        ResolvedIntent::new(
            "Network",
            "CmsVpc",
            ResourceKind::Vpc,
            "cms-network-cmsvpc-1234abcd",
            BTreeMap::from([("max_azs".to_string(), max_azs.to_string())]),
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_apply_is_idempotent() {
        let provider = MemoryProvider::new();
        let cancel = CancellationToken::new();

        let first = provider.apply(&syd(), &vpc("2"), &cancel).unwrap();
        let second = provider.apply(&syd(), &vpc("2"), &cancel).unwrap();

        assert_eq!(first.outcome, ApplyOutcome::Created);
        assert_eq!(second.outcome, ApplyOutcome::Unchanged);
        assert_eq!(first.handle, second.handle);
        assert_eq!(provider.side_effects(), 1);
        assert_eq!(provider.apply_calls(), 2);
    }

    #[test]
    fn test_changed_intent_updates_in_place() {
        let provider = MemoryProvider::new();
        let cancel = CancellationToken::new();

        let first = provider.apply(&syd(), &vpc("2"), &cancel).unwrap();
        let updated = provider.apply(&syd(), &vpc("3"), &cancel).unwrap();

        assert_eq!(updated.outcome, ApplyOutcome::Updated);
        assert_eq!(updated.handle.physical_id, first.handle.physical_id);
        assert_eq!(
            updated.handle.attribute("public_subnets").map(|s| s.split(',').count()),
            Some(3)
        );
    }

    #[test]
    fn test_subnets_are_capped_at_available_zones() {
        let provider = MemoryProvider::new();
        let applied = provider
            .apply(&syd(), &vpc("18446744073709551615"), &CancellationToken::new())
            .unwrap();
        assert_eq!(
            applied.handle.attribute("private_subnets").map(|s| s.split(',').count()),
            Some(MAX_AZS)
        );
    }

    #[test]
    fn test_cancelled_apply_has_no_side_effect() {
        let provider = MemoryProvider::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = provider.apply(&syd(), &vpc("2"), &cancel).unwrap_err();
        assert_eq!(err, ProviderError::Aborted);
        assert!(provider.is_empty());
    }

    #[test]
    fn test_rollback_removes_only_given_handles() {
        let provider = MemoryProvider::new();
        let cancel = CancellationToken::new();
        let applied = provider.apply(&syd(), &vpc("2"), &cancel).unwrap();

        provider.rollback(&syd(), "Network", &[applied.handle.clone()]).unwrap();
        provider.rollback(&syd(), "Network", &[applied.handle]).unwrap();
        assert!(provider.is_empty());
        assert_eq!(provider.rolled_back(), 1);
    }

    #[test]
    fn test_records_restore_state() {
        let provider = MemoryProvider::new();
        let cancel = CancellationToken::new();
        provider.apply(&syd(), &vpc("2"), &cancel).unwrap();

        let restored = MemoryProvider::with_records(provider.snapshot());
        let again = restored.apply(&syd(), &vpc("2"), &cancel).unwrap();
        assert_eq!(again.outcome, ApplyOutcome::Unchanged);
        assert_eq!(restored.side_effects(), 0);
    }

    #[test]
    fn test_injected_failure_and_missing_property() {
        let provider = MemoryProvider::new();
        let cancel = CancellationToken::new();
        provider.fail_on("Network", "CmsVpc");
        assert!(matches!(
            provider.apply(&syd(), &vpc("2"), &cancel),
            Err(ProviderError::Rejected(_))
        ));

        let record = ResolvedIntent::new(
            "Compute",
            "OriginAlias",
            ResourceKind::DnsRecord,
            "cms-compute-originalias-00000000",
            BTreeMap::new(),
            BTreeMap::new(),
        );
        assert!(matches!(
            provider.apply(&syd(), &record, &cancel),
            Err(ProviderError::MissingProperty { .. })
        ));
    }
}
