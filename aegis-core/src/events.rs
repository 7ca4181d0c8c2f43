//! Live session updates
//!
//! Every store mutation is published as a [`SessionEvent`] on a broadcast
//! channel keyed by scan id. Publishing never waits on subscribers: a slow
//! subscriber lags and is resynchronized, an absent one is simply skipped.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::state::models::{Finding, FindingsSummary, Metadata, ScanSession, Severity};
use crate::state::task::{AgentStatus, AgentTask};

/// Default per-scan channel capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A session-state delta (or full snapshot) pushed to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Full state, sent first to every subscriber and after a resync
    Snapshot { session: Box<ScanSession> },
    /// `previous` is the status before this update
    TaskUpdated {
        scan_id: String,
        previous: AgentStatus,
        task: AgentTask,
    },
    FindingAppended { scan_id: String, finding: Finding },
    LogAppended { scan_id: String, line: String },
    /// Last event of a scan; the stream ends after it
    ScanFinished {
        scan_id: String,
        cancelled: bool,
        summary: FindingsSummary,
    },
}

impl SessionEvent {
    pub fn scan_id(&self) -> &str {
        match self {
            SessionEvent::Snapshot { session } => &session.scan_id,
            SessionEvent::TaskUpdated { scan_id, .. }
            | SessionEvent::FindingAppended { scan_id, .. }
            | SessionEvent::LogAppended { scan_id, .. }
            | SessionEvent::ScanFinished { scan_id, .. } => scan_id,
        }
    }

    /// True when no further events follow for this scan
    pub fn is_final(&self) -> bool {
        match self {
            SessionEvent::ScanFinished { .. } => true,
            SessionEvent::Snapshot { session } => session.finished_at.is_some(),
            _ => false,
        }
    }
}

/// Fan-out of session events, one channel per scan
pub struct Broadcaster {
    channels: RwLock<HashMap<String, broadcast::Sender<SessionEvent>>>,
    capacity: usize,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Broadcaster")
            .field("channels", &channels)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Create the channel for a scan (no-op if it already exists)
    pub fn open(&self, scan_id: &str) {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(scan_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
    }

    /// Publish an event; returns how many subscribers received it
    pub fn publish(&self, event: SessionEvent) -> usize {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = channels.get(event.scan_id()) else {
            return 0;
        };
        let delivered = sender.send(event).unwrap_or(0);
        trace!(delivered, "published session event");
        delivered
    }

    pub fn subscribe(&self, scan_id: &str) -> Option<broadcast::Receiver<SessionEvent>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scan_id)
            .map(broadcast::Sender::subscribe)
    }

    pub fn subscriber_count(&self, scan_id: &str) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scan_id)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drop the channel; live receivers observe a closed stream
    pub fn close(&self, scan_id: &str) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(scan_id);
    }
}

/// Narration-relevant event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceEventType {
    AgentStart,
    Finding,
    Completion,
}

/// State-change trigger a voice layer can turn into narration.
///
/// The core decides *when* something is worth narrating; wording and UI
/// focus belong to the voice layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceTrigger {
    pub scan_id: String,
    pub event_type: VoiceEventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl VoiceTrigger {
    /// Derive a trigger from a session event, if it warrants narration
    pub fn from_event(event: &SessionEvent) -> Option<Self> {
        let mut metadata = Metadata::new();
        let event_type = match event {
            SessionEvent::TaskUpdated { previous, task, .. }
                if *previous == AgentStatus::Pending && task.status == AgentStatus::Running =>
            {
                metadata.insert("agent".into(), task.agent.as_str().into());
                metadata.insert("display_name".into(), task.agent.display_name().into());
                VoiceEventType::AgentStart
            }
            SessionEvent::FindingAppended { finding, .. }
                if finding.severity >= Severity::High =>
            {
                metadata.insert("finding_id".into(), finding.id.clone().into());
                metadata.insert("title".into(), finding.title.clone().into());
                metadata.insert("severity".into(), finding.severity.as_str().into());
                metadata.insert("agent".into(), finding.source_agent.as_str().into());
                VoiceEventType::Finding
            }
            SessionEvent::ScanFinished {
                cancelled, summary, ..
            } => {
                metadata.insert("cancelled".into(), (*cancelled).into());
                metadata.insert("total_findings".into(), summary.total().into());
                metadata.insert("critical".into(), summary.critical.into());
                metadata.insert("high".into(), summary.high.into());
                VoiceEventType::Completion
            }
            _ => return None,
        };

        Some(Self {
            scan_id: event.scan_id().to_string(),
            event_type,
            timestamp: Utc::now(),
            metadata,
        })
    }
}
