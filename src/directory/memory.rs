//! In-process directory for single-instance deployments.
//!
//! Two sharded maps, one per index direction. The extension index is the
//! claim point: an extension is reserved there first, so two connections can
//! never be granted the same address even under concurrent assignment.

use super::{Directory, Extension};
use crate::error::{SignalError, SignalResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

struct DirEntry {
    extension: Extension,
    last_activity: Instant,
}

pub struct MemoryDirectory {
    by_extension: DashMap<Extension, String>,
    by_connection: DashMap<String, DirEntry>,
    max_attempts: u32,
}

impl MemoryDirectory {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            by_extension: DashMap::new(),
            by_connection: DashMap::new(),
            max_attempts,
        }
    }

    fn remove_pair(&self, connection_id: &str) -> bool {
        match self.by_connection.remove(connection_id) {
            Some((_, entry)) => {
                // Guard against racing re-assignment of the same extension.
                self.by_extension
                    .remove_if(&entry.extension, |_, conn| conn == connection_id);
                true
            }
            None => false,
        }
    }

    /// Removes a connection only if it is still idle at removal time. A
    /// `touch` landing between the sweep's scan and this call keeps the
    /// entry alive.
    fn evict_if_stale(&self, connection_id: &str, now: Instant, max_idle: Duration) -> bool {
        match self.by_connection.remove_if(connection_id, |_, entry| {
            now.saturating_duration_since(entry.last_activity) > max_idle
        }) {
            Some((_, entry)) => {
                self.by_extension
                    .remove_if(&entry.extension, |_, conn| conn == connection_id);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.by_connection.len()
    }
}

#[async_trait::async_trait]
impl Directory for MemoryDirectory {
    async fn assign(&self, connection_id: &str) -> SignalResult<Extension> {
        for _ in 0..self.max_attempts {
            let candidate = Extension::generate(&mut rand::thread_rng());
            match self.by_extension.entry(candidate.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(connection_id.to_string());
                }
            }
            let previous = self.by_connection.insert(
                connection_id.to_string(),
                DirEntry {
                    extension: candidate.clone(),
                    last_activity: Instant::now(),
                },
            );
            if let Some(old) = previous {
                self.by_extension
                    .remove_if(&old.extension, |_, conn| conn == connection_id);
            }
            return Ok(candidate);
        }
        Err(SignalError::AddressSpaceExhausted {
            attempts: self.max_attempts,
        })
    }

    async fn resolve(&self, extension: &Extension) -> SignalResult<Option<String>> {
        Ok(self.by_extension.get(extension).map(|e| e.value().clone()))
    }

    async fn resolve_reverse(&self, connection_id: &str) -> SignalResult<Option<Extension>> {
        Ok(self
            .by_connection
            .get(connection_id)
            .map(|e| e.value().extension.clone()))
    }

    async fn touch(&self, connection_id: &str) -> SignalResult<()> {
        if let Some(mut entry) = self.by_connection.get_mut(connection_id) {
            entry.value_mut().last_activity = Instant::now();
        }
        Ok(())
    }

    async fn release(&self, connection_id: &str) -> SignalResult<()> {
        self.remove_pair(connection_id);
        Ok(())
    }

    async fn sweep(&self, max_idle: Duration) -> SignalResult<usize> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .by_connection
            .iter()
            .filter(|e| now.saturating_duration_since(e.value().last_activity) > max_idle)
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for connection_id in expired {
            if self.evict_if_stale(&connection_id, now, max_idle) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> SignalResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assign_then_resolve_both_ways() {
        let dir = MemoryDirectory::new(25);
        let ext = dir.assign("conn-1").await.unwrap();
        assert_eq!(dir.resolve(&ext).await.unwrap().as_deref(), Some("conn-1"));
        assert_eq!(dir.resolve_reverse("conn-1").await.unwrap(), Some(ext));
    }

    #[tokio::test]
    async fn indices_stay_mutual_inverses() {
        let dir = MemoryDirectory::new(25);
        let mut assigned = Vec::new();
        for i in 0..50 {
            let id = format!("conn-{i}");
            assigned.push((id.clone(), dir.assign(&id).await.unwrap()));
        }
        for (id, ext) in &assigned {
            assert_eq!(dir.resolve(ext).await.unwrap().as_deref(), Some(id.as_str()));
            assert_eq!(dir.resolve_reverse(id).await.unwrap().as_ref(), Some(ext));
        }
    }

    #[tokio::test]
    async fn release_is_idempotent_and_removes_both() {
        let dir = MemoryDirectory::new(25);
        let ext = dir.assign("conn-1").await.unwrap();
        dir.release("conn-1").await.unwrap();
        dir.release("conn-1").await.unwrap();
        assert_eq!(dir.resolve(&ext).await.unwrap(), None);
        assert_eq!(dir.resolve_reverse("conn-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn reassignment_replaces_previous_extension() {
        let dir = MemoryDirectory::new(25);
        let first = dir.assign("conn-1").await.unwrap();
        let second = dir.assign("conn-1").await.unwrap();
        assert_eq!(dir.resolve(&first).await.unwrap(), None);
        assert_eq!(dir.resolve(&second).await.unwrap().as_deref(), Some("conn-1"));
    }

    #[tokio::test]
    async fn sweep_removes_only_idle_entries() {
        let dir = MemoryDirectory::new(25);
        dir.assign("conn-1").await.unwrap();
        // Zero idle budget expires everything assigned before this point.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let removed = dir.sweep(Duration::from_millis(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(dir.len(), 0);
    }

    #[tokio::test]
    async fn touch_defers_sweep() {
        let dir = MemoryDirectory::new(25);
        dir.assign("conn-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        dir.touch("conn-1").await.unwrap();
        let removed = dir.sweep(Duration::from_millis(8)).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn eviction_rechecks_idle_time_at_removal() {
        let dir = MemoryDirectory::new(25);
        let ext = dir.assign("conn-1").await.unwrap();
        let scan_time = Instant::now() + Duration::from_secs(60);

        // A refresh after the scan picked the entry must veto the eviction.
        dir.by_connection.get_mut("conn-1").unwrap().value_mut().last_activity = scan_time;
        assert!(!dir.evict_if_stale("conn-1", scan_time, Duration::from_secs(30)));
        assert_eq!(dir.resolve(&ext).await.unwrap().as_deref(), Some("conn-1"));

        // Without the refresh the same entry is evicted.
        dir.by_connection.get_mut("conn-1").unwrap().value_mut().last_activity =
            scan_time - Duration::from_secs(31);
        assert!(dir.evict_if_stale("conn-1", scan_time, Duration::from_secs(30)));
        assert_eq!(dir.resolve(&ext).await.unwrap(), None);
    }

    #[tokio::test]
    async fn exhaustion_fails_assignment() {
        // A cap of zero attempts can never claim an address.
        let dir = MemoryDirectory::new(0);
        let err = dir.assign("conn-1").await.unwrap_err();
        assert!(matches!(
            err,
            SignalError::AddressSpaceExhausted { attempts: 0 }
        ));
    }

    #[tokio::test]
    async fn concurrent_assignments_stay_disjoint() {
        let dir = std::sync::Arc::new(MemoryDirectory::new(25));
        let mut handles = Vec::new();
        for i in 0..32 {
            let dir = dir.clone();
            handles.push(tokio::spawn(async move {
                dir.assign(&format!("conn-{i}")).await.unwrap()
            }));
        }
        let mut seen = std::collections::HashSet::new();
        for h in handles {
            assert!(seen.insert(h.await.unwrap()), "duplicate extension granted");
        }
    }
}
