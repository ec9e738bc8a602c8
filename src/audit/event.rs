//! Audit event taxonomy and query types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Closed set of audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Order lifecycle
    /// An order intent was proposed and validated.
    OrderProposed,
    /// A proposal was simulated.
    OrderSimulated,
    /// The risk gate rendered a decision.
    RiskGateEvaluated,
    /// A proposal was stored for approval.
    ProposalCreated,
    /// Human approval was requested.
    ApprovalRequested,
    /// Approval was granted and a token issued.
    ApprovalGranted,
    /// Approval was denied.
    ApprovalDenied,
    /// The auto-approval policy granted a token.
    AutoApprovalGranted,
    /// An order reached the broker.
    OrderSubmitted,
    /// Submission failed after the token was consumed.
    OrderSubmissionFailed,
    /// The broker reported a fill.
    OrderFilled,
    /// The broker reported a cancel.
    OrderCancelled,
    /// The broker rejected the order.
    OrderRejected,

    // Cancel / modify flow
    /// A cancel of a live order was requested.
    CancelRequested,
    /// A cancel was granted and executed.
    CancelGranted,
    /// A cancel was denied.
    CancelDenied,
    /// A modify of a live order was requested.
    ModifyRequested,
    /// A modify was granted and executed.
    ModifyGranted,
    /// A modify was denied.
    ModifyDenied,

    // System events
    /// The kill switch was activated.
    KillSwitchActivated,
    /// The kill switch was released.
    KillSwitchReleased,
    /// The risk policy was reloaded.
    PolicyReloaded,
    /// An internal error occurred.
    ErrorOccurred,

    // Broker connection
    /// Broker connection established.
    BrokerConnected,
    /// Broker connection lost.
    BrokerDisconnected,
    /// Broker reconnect in progress.
    BrokerReconnecting,

    // Data snapshots
    /// A portfolio snapshot was taken.
    PortfolioSnapshotTaken,
    /// A market snapshot was taken.
    MarketSnapshotTaken,

    // Tool gateway
    /// A tool call passed the gateway.
    ToolCalled,
    /// A tool call was rejected by the gateway.
    ToolRejected,

    // Scheduler
    /// An export job started.
    ExportJobStarted,
    /// An export job completed and persisted its payload.
    ExportJobCompleted,
    /// An export job failed.
    ExportJobFailed,
}

/// Immutable audit event.
///
/// All events are append-only and include full context for reconstruction.
/// The payload is opaque structured data; the log does not interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id.
    pub id: Uuid,
    /// Event kind.
    pub event_type: EventType,
    /// Correlation id tracing related events across the system.
    pub correlation_id: String,
    /// Event time, UTC.
    pub timestamp: DateTime<Utc>,
    /// Event-specific structured payload.
    pub data: serde_json::Value,
}

impl AuditEvent {
    /// Create a new event. An empty correlation id gets a generated UUID.
    #[must_use]
    pub fn new(
        event_type: EventType,
        correlation_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        let correlation_id = correlation_id.into();
        let correlation_id = if correlation_id.trim().is_empty() {
            Uuid::new_v4().to_string()
        } else {
            correlation_id.trim().to_string()
        };
        Self {
            id: Uuid::new_v4(),
            event_type,
            correlation_id,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Query parameters for searching audit events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    /// Filter by event types; empty means all.
    #[serde(default)]
    pub event_types: Vec<EventType>,
    /// Filter by correlation id.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Start of time range, inclusive.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// End of time range, inclusive.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Maximum results.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination.
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

impl AuditQuery {
    /// Query every event for one correlation id, in append order.
    #[must_use]
    pub fn for_correlation(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            limit: 1000,
            ..Self::default()
        }
    }
}

/// Statistics about stored audit events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    /// Total number of events.
    pub total_events: usize,
    /// Count per event type.
    pub event_type_counts: HashMap<String, usize>,
    /// Timestamp of the earliest event.
    pub earliest_event: Option<DateTime<Utc>>,
    /// Timestamp of the latest event.
    pub latest_event: Option<DateTime<Utc>>,
    /// Number of distinct correlation ids.
    pub correlation_id_count: usize,
}
