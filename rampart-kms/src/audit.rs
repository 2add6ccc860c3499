//! Audit logging: every key operation emits a structured event.

use crate::types::{ElasticKeyId, MaterialKeyId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Audit events
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AuditAction {
    ElasticKeyCreated,
    ElasticKeyUpdated,
    ElasticKeyDeleted,
    ElasticKeyDisabled,
    ElasticKeyEnabled,
    MaterialKeyGenerated,
    MaterialKeyImported,
    MaterialKeyRevoked,
    EncryptPerformed,
    DecryptPerformed,
    SignPerformed,
    VerifyPerformed,
    WrappedKeyGenerated,
}

/// A structured audit event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Which tenant issued the operation.
    pub tenant_id: Option<TenantId>,
    /// Which key handle was involved.
    pub elastic_key_id: Option<ElasticKeyId>,
    /// Which material version, when one is addressed.
    pub material_key_id: Option<MaterialKeyId>,
    /// What happened.
    pub action: AuditAction,
    /// Success or failure.
    pub success: bool,
}

impl AuditEvent {
    pub fn operation(tenant_id: TenantId, action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            tenant_id: Some(tenant_id),
            elastic_key_id: None,
            material_key_id: None,
            action,
            success: true,
        }
    }

    pub fn with_elastic_key(mut self, id: ElasticKeyId) -> Self {
        self.elastic_key_id = Some(id);
        self
    }

    pub fn with_material_key(mut self, id: MaterialKeyId) -> Self {
        self.material_key_id = Some(id);
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.success = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Audit sink trait
// ---------------------------------------------------------------------------

/// Where audit events go. Implement this for your SIEM/log system.
///
/// Synchronous so it can be called from inside a transaction without a
/// runtime handle; async sinks should buffer through a channel.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

// ---------------------------------------------------------------------------
// Built-in sinks
// ---------------------------------------------------------------------------

/// Logs events via the `tracing` crate.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            timestamp = %event.timestamp,
            tenant_id = ?event.tenant_id,
            elastic_key_id = ?event.elastic_key_id,
            material_key_id = ?event.material_key_id,
            action = ?event.action,
            success = event.success,
            "audit"
        );
    }
}

/// Collects events in memory (for testing and the API layer).
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    pub async fn events_for_elastic_key(&self, id: ElasticKeyId) -> Vec<AuditEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.elastic_key_id == Some(id))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        // try_lock keeps the sink callable from inside a transaction.
        if let Ok(mut events) = self.events.try_lock() {
            events.push(event);
        }
    }
}
