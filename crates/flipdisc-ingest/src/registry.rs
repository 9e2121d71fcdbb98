//! Producer records.
//!
//! Every producer the server has seen gets a record: heartbeats arrive on
//! successful ingest, status transitions come from the supervisor. Records
//! are created on first observation and cleared on explicit stop.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProducerStatus {
    Running,
    Stopped,
    Restarting,
}

#[derive(Debug, Clone)]
pub struct ProducerRecord {
    pub id: String,
    pub last_heartbeat: Instant,
    pub restart_count: u32,
    pub status: ProducerStatus,
    pub last_error: Option<String>,
}

/// Serialisable view of a record for the control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub id: String,
    pub status: ProducerStatus,
    pub restart_count: u32,
    pub last_error: Option<String>,
    pub heartbeat_age_ms: u64,
}

#[derive(Debug, Default)]
pub struct ProducerRegistry {
    records: RwLock<HashMap<String, ProducerRecord>>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat, creating the record on first observation.
    pub async fn heartbeat(&self, id: &str) {
        let mut records = self.records.write().await;
        let now = Instant::now();
        records
            .entry(id.to_string())
            .and_modify(|r| r.last_heartbeat = now)
            .or_insert_with(|| ProducerRecord {
                id: id.to_string(),
                last_heartbeat: now,
                restart_count: 0,
                status: ProducerStatus::Running,
                last_error: None,
            });
    }

    pub async fn get(&self, id: &str) -> Option<ProducerRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn set_status(&self, id: &str, status: ProducerStatus, error: Option<String>) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(id) {
            record.status = status;
            record.last_error = error;
        }
    }

    pub async fn bump_restart_count(&self, id: &str) -> u32 {
        let mut records = self.records.write().await;
        match records.get_mut(id) {
            Some(record) => {
                record.restart_count += 1;
                record.restart_count
            }
            None => 0,
        }
    }

    /// Refresh the heartbeat after a supervised restart so the next sweep
    /// doesn't immediately re-trigger.
    pub async fn touch(&self, id: &str) {
        if let Some(record) = self.records.write().await.get_mut(id) {
            record.last_heartbeat = Instant::now();
        }
    }

    /// Remove the record entirely (explicit stop).
    pub async fn clear(&self, id: &str) {
        self.records.write().await.remove(id);
    }

    /// Ids of producers currently marked running whose heartbeat is older
    /// than `timeout_ms`.
    pub async fn stale_running(&self, timeout_ms: u64) -> Vec<String> {
        let records = self.records.read().await;
        let now = Instant::now();
        records
            .values()
            .filter(|r| {
                r.status == ProducerStatus::Running
                    && now.duration_since(r.last_heartbeat).as_millis() as u64 > timeout_ms
            })
            .map(|r| r.id.clone())
            .collect()
    }

    pub async fn snapshot(&self) -> Vec<ProducerInfo> {
        let records = self.records.read().await;
        let now = Instant::now();
        let mut infos: Vec<ProducerInfo> = records
            .values()
            .map(|r| ProducerInfo {
                id: r.id.clone(),
                status: r.status,
                restart_count: r.restart_count,
                last_error: r.last_error.clone(),
                heartbeat_age_ms: now.duration_since(r.last_heartbeat).as_millis() as u64,
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_heartbeat_creates_running_record() {
        let registry = ProducerRegistry::new();
        registry.heartbeat("orchestrator").await;
        let record = registry.get("orchestrator").await.unwrap();
        assert_eq!(record.status, ProducerStatus::Running);
        assert_eq!(record.restart_count, 0);
    }

    #[tokio::test]
    async fn test_stale_running_detection() {
        let registry = ProducerRegistry::new();
        registry.heartbeat("fresh").await;
        assert!(registry.stale_running(10_000).await.is_empty());
        // A zero timeout flags every running producer as stale once any
        // time at all has passed.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let stale = registry.stale_running(0).await;
        assert_eq!(stale, vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_stopped_producers_are_not_stale() {
        let registry = ProducerRegistry::new();
        registry.heartbeat("p").await;
        registry
            .set_status("p", ProducerStatus::Stopped, Some("done".to_string()))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(registry.stale_running(0).await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_record() {
        let registry = ProducerRegistry::new();
        registry.heartbeat("p").await;
        registry.clear("p").await;
        assert!(registry.get("p").await.is_none());
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_sorted_by_id() {
        let registry = ProducerRegistry::new();
        registry.heartbeat("zeta").await;
        registry.heartbeat("alpha").await;
        let infos = registry.snapshot().await;
        assert_eq!(infos[0].id, "alpha");
        assert_eq!(infos[1].id, "zeta");
    }
}
