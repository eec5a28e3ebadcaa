use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::types::UserId;

/// entity an audit record is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Loan,
    Repayment,
    LoanType,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Loan => "LOAN",
            EntityKind::Repayment => "REPAYMENT",
            EntityKind::LoanType => "LOAN_TYPE",
        }
    }
}

/// every mutating call maps to exactly one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    // loans
    LoanCreated,
    LoanUpdated,
    LoanStatusUpdated,
    LoanDisbursed,
    LoanAssigned,
    LoanDeleted,

    // repayments
    RepaymentCreated,
    RepaymentUpdated,
    RepaymentDeleted,

    // loan products
    LoanTypeCreated,
    LoanTypeUpdated,
    LoanTypeStatusToggled,
    LoanTypeDeleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LoanCreated => "LOAN_CREATED",
            AuditAction::LoanUpdated => "LOAN_UPDATED",
            AuditAction::LoanStatusUpdated => "LOAN_STATUS_UPDATED",
            AuditAction::LoanDisbursed => "LOAN_DISBURSED",
            AuditAction::LoanAssigned => "LOAN_ASSIGNED",
            AuditAction::LoanDeleted => "LOAN_DELETED",
            AuditAction::RepaymentCreated => "REPAYMENT_CREATED",
            AuditAction::RepaymentUpdated => "REPAYMENT_UPDATED",
            AuditAction::RepaymentDeleted => "REPAYMENT_DELETED",
            AuditAction::LoanTypeCreated => "LOAN_TYPE_CREATED",
            AuditAction::LoanTypeUpdated => "LOAN_TYPE_UPDATED",
            AuditAction::LoanTypeStatusToggled => "LOAN_TYPE_STATUS_TOGGLED",
            AuditAction::LoanTypeDeleted => "LOAN_TYPE_DELETED",
        }
    }

    pub fn entity(&self) -> EntityKind {
        match self {
            AuditAction::LoanCreated
            | AuditAction::LoanUpdated
            | AuditAction::LoanStatusUpdated
            | AuditAction::LoanDisbursed
            | AuditAction::LoanAssigned
            | AuditAction::LoanDeleted => EntityKind::Loan,
            AuditAction::RepaymentCreated
            | AuditAction::RepaymentUpdated
            | AuditAction::RepaymentDeleted => EntityKind::Repayment,
            AuditAction::LoanTypeCreated
            | AuditAction::LoanTypeUpdated
            | AuditAction::LoanTypeStatusToggled
            | AuditAction::LoanTypeDeleted => EntityKind::LoanType,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// one audit record, emitted after the owning transaction commits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub entity: EntityKind,
    pub entity_id: Uuid,
    pub action: AuditAction,
    pub actor_id: UserId,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    /// snapshot `before` and `after` as json
    pub fn new<B: Serialize, A: Serialize>(
        action: AuditAction,
        entity_id: Uuid,
        actor_id: UserId,
        before: Option<&B>,
        after: Option<&A>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity: action.entity(),
            entity_id,
            action,
            actor_id,
            before: before.and_then(|b| serde_json::to_value(b).ok()),
            after: after.and_then(|a| serde_json::to_value(a).ok()),
            recorded_at,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// receiver of audit records
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// hand an event to the sink; failures are logged and dropped
pub(crate) fn dispatch(sink: &dyn AuditSink, event: AuditEvent) {
    let action = event.action;
    let entity_id = event.entity_id;
    if let Err(err) = sink.record(event) {
        warn!(%action, %entity_id, error = %err, "audit event not recorded");
    }
}

/// audit query
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub entity: Option<EntityKind>,
    pub entity_id: Option<Uuid>,
    pub actor_id: Option<UserId>,
    /// case-insensitive substring of the action name
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: usize,
    pub limit: usize,
}

/// in-memory audit log
#[derive(Debug, Default)]
pub struct EventStore {
    events: Mutex<Vec<AuditEvent>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn take_events(&self) -> Vec<AuditEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// matching events newest first, with the total before paging
    pub fn query(&self, query: &AuditQuery) -> (Vec<AuditEvent>, usize) {
        let action = query.action.as_ref().map(|a| a.to_uppercase());
        let matching: Vec<AuditEvent> = self
            .events
            .lock()
            .iter()
            .rev()
            .filter(|e| query.entity.map_or(true, |k| e.entity == k))
            .filter(|e| query.entity_id.map_or(true, |id| e.entity_id == id))
            .filter(|e| query.actor_id.map_or(true, |id| e.actor_id == id))
            .filter(|e| {
                action
                    .as_ref()
                    .map_or(true, |a| e.action.as_str().contains(a.as_str()))
            })
            .filter(|e| query.from.map_or(true, |from| e.recorded_at >= from))
            .filter(|e| query.to.map_or(true, |to| e.recorded_at <= to))
            .cloned()
            .collect();

        let total = matching.len();
        let page = query.page.max(1);
        let limit = if query.limit == 0 { total.max(1) } else { query.limit };
        let events = matching
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();
        (events, total)
    }

    /// full history of one record, newest first
    pub fn entity_trail(&self, entity: EntityKind, entity_id: Uuid) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .rev()
            .filter(|e| e.entity == entity && e.entity_id == entity_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for EventStore {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// forwards events to a channel consumer
pub struct ChannelSink {
    sender: Mutex<Sender<AuditEvent>>,
}

impl ChannelSink {
    pub fn new(sender: Sender<AuditEvent>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl AuditSink for ChannelSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.sender
            .lock()
            .send(event)
            .map_err(|_| AuditError::Unavailable("receiver dropped".to_string()))
    }
}

/// discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }
}
