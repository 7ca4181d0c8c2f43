//! Authoritative in-memory record of every scan
//!
//! Each session sits behind its own mutex. All mutations go through the
//! store, and the matching [`SessionEvent`] is published while that mutex is
//! still held, so subscribers observe deltas in mutation order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::events::{Broadcaster, SessionEvent};
use crate::state::archive::SessionArchive;
use crate::state::models::{AgentName, Finding, ScanSession};
use crate::state::task::{AgentTask, TransitionError};
use crate::{Error, Result};

type SessionCell = Arc<Mutex<ScanSession>>;

fn lock(cell: &SessionCell) -> MutexGuard<'_, ScanSession> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of scan sessions keyed by scan id
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionCell>>,
    broadcaster: Broadcaster,
    archive: Option<Arc<SessionArchive>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Broadcaster::default())
    }
}

impl SessionStore {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            broadcaster,
            archive: None,
        }
    }

    /// Persist snapshots to `archive` and use it for lookups of evicted scans
    pub fn with_archive(mut self, archive: Arc<SessionArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    fn cell(&self, scan_id: &str) -> Option<SessionCell> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scan_id)
            .cloned()
    }

    fn cell_or_err(&self, scan_id: &str) -> Result<SessionCell> {
        self.cell(scan_id)
            .ok_or_else(|| Error::SessionNotFound(scan_id.to_string()))
    }

    fn persist(&self, session: &ScanSession) {
        if let Some(archive) = &self.archive
            && let Err(e) = archive.save(session)
        {
            warn!(scan_id = %session.scan_id, "Failed to archive session: {}", e);
        }
    }

    /// Register a new session; its agent set is fixed from here on
    pub fn create(&self, session: ScanSession) -> Result<ScanSession> {
        let scan_id = session.scan_id.clone();
        {
            let mut sessions = self
                .sessions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if sessions.contains_key(&scan_id) {
                return Err(Error::Config(format!("scan id already in use: {}", scan_id)));
            }
            self.broadcaster.open(&scan_id);
            sessions.insert(scan_id.clone(), Arc::new(Mutex::new(session.clone())));
        }
        self.persist(&session);
        debug!(scan_id = %scan_id, agents = session.agent_tasks.len(), "session created");
        Ok(session)
    }

    /// Snapshot of a session, falling back to the archive once evicted
    pub fn get(&self, scan_id: &str) -> Result<ScanSession> {
        if let Some(cell) = self.cell(scan_id) {
            return Ok(lock(&cell).clone());
        }
        if let Some(archive) = &self.archive
            && let Some(session) = archive.load(scan_id)?
        {
            return Ok(session);
        }
        Err(Error::SessionNotFound(scan_id.to_string()))
    }

    /// Most recently created session
    pub fn latest(&self) -> Result<Option<ScanSession>> {
        let cells: Vec<SessionCell> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let in_memory = cells
            .iter()
            .map(|c| lock(c).clone())
            .max_by_key(|s| s.created_at);

        let archived = match &self.archive {
            Some(archive) => archive.latest()?,
            None => None,
        };

        Ok(match (in_memory, archived) {
            (Some(m), Some(a)) if a.created_at > m.created_at => Some(a),
            (Some(m), _) => Some(m),
            (None, a) => a,
        })
    }

    /// Append a finding unless one with the same id exists.
    ///
    /// Returns `true` when the finding was stored.
    pub fn append_finding(&self, scan_id: &str, finding: Finding) -> Result<bool> {
        let cell = self.cell_or_err(scan_id)?;
        let mut session = lock(&cell);
        if session.contains_finding(&finding.id) {
            debug!(scan_id, finding_id = %finding.id, "duplicate finding discarded");
            return Ok(false);
        }
        session.findings.push(finding.clone());
        self.broadcaster.publish(SessionEvent::FindingAppended {
            scan_id: scan_id.to_string(),
            finding,
        });
        Ok(true)
    }

    /// Apply a state machine transition to one agent's task.
    ///
    /// The closure runs against a copy; the session only changes if it
    /// succeeds. Terminal transitions are archived.
    pub fn update_task<F>(&self, scan_id: &str, agent: AgentName, apply: F) -> Result<AgentTask>
    where
        F: FnOnce(&mut AgentTask) -> std::result::Result<(), TransitionError>,
    {
        let cell = self.cell_or_err(scan_id)?;
        let mut session = lock(&cell);
        let Some(task) = session.task_mut(agent) else {
            return Err(Error::Config(format!(
                "agent {} is not part of scan {}",
                agent, scan_id
            )));
        };

        let mut updated = task.clone();
        apply(&mut updated)?;
        if updated == *task {
            return Ok(updated);
        }
        let previous = task.status;
        *task = updated.clone();

        self.broadcaster.publish(SessionEvent::TaskUpdated {
            scan_id: scan_id.to_string(),
            previous,
            task: updated.clone(),
        });
        if updated.status.is_terminal() {
            self.persist(&session);
        }
        Ok(updated)
    }

    pub fn append_log(&self, scan_id: &str, line: impl Into<String>) -> Result<()> {
        let line = line.into();
        let cell = self.cell_or_err(scan_id)?;
        let mut session = lock(&cell);
        session.logs.push(line.clone());
        self.broadcaster.publish(SessionEvent::LogAppended {
            scan_id: scan_id.to_string(),
            line,
        });
        Ok(())
    }

    pub fn set_workspace(&self, scan_id: &str, path: impl Into<String>) -> Result<()> {
        let cell = self.cell_or_err(scan_id)?;
        lock(&cell).workspace_path = Some(path.into());
        Ok(())
    }

    /// Flag the session as cancelled; returns `false` if it already was
    pub fn mark_cancelled(&self, scan_id: &str) -> Result<bool> {
        let cell = self.cell_or_err(scan_id)?;
        let mut session = lock(&cell);
        if session.cancelled {
            return Ok(false);
        }
        session.cancelled = true;
        Ok(true)
    }

    /// Close the session and emit `scan_finished`. Idempotent.
    pub fn mark_finished(&self, scan_id: &str) -> Result<ScanSession> {
        let cell = self.cell_or_err(scan_id)?;
        let mut session = lock(&cell);
        if session.finished_at.is_none() {
            session.finished_at = Some(Utc::now());
            self.broadcaster.publish(SessionEvent::ScanFinished {
                scan_id: scan_id.to_string(),
                cancelled: session.cancelled,
                summary: session.findings_summary(),
            });
            self.persist(&session);
        }
        Ok(session.clone())
    }

    /// Snapshot plus a receiver for every later delta, taken atomically
    pub fn subscribe(self: &Arc<Self>, scan_id: &str) -> Result<Subscription> {
        let (snapshot, receiver) = self.snapshot_and_receiver(scan_id)?;
        Ok(Subscription {
            scan_id: scan_id.to_string(),
            store: Arc::clone(self),
            pending: Some(SessionEvent::Snapshot {
                session: Box::new(snapshot),
            }),
            receiver,
        })
    }

    fn snapshot_and_receiver(
        &self,
        scan_id: &str,
    ) -> Result<(ScanSession, Option<broadcast::Receiver<SessionEvent>>)> {
        match self.cell(scan_id) {
            Some(cell) => {
                let session = lock(&cell);
                let receiver = self.broadcaster.subscribe(scan_id);
                Ok((session.clone(), receiver))
            }
            // Archived sessions are final: snapshot only
            None => Ok((self.get(scan_id)?, None)),
        }
    }

    /// Drop finished sessions older than `retention` that nobody watches.
    ///
    /// Returns the evicted scan ids.
    pub fn evict_expired(&self, retention: Duration) -> Vec<String> {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - retention;

        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(id, cell)| {
                let finished = lock(cell).finished_at;
                matches!(finished, Some(at) if at <= cutoff)
                    && self.broadcaster.subscriber_count(id) == 0
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
            self.broadcaster.close(id);
            debug!(scan_id = %id, "evicted session");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered view of one session: a snapshot, then deltas.
///
/// Ends after `scan_finished`. A subscriber that falls behind the channel
/// receives a fresh snapshot instead of the missed deltas.
pub struct Subscription {
    scan_id: String,
    store: Arc<SessionStore>,
    pending: Option<SessionEvent>,
    receiver: Option<broadcast::Receiver<SessionEvent>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("scan_id", &self.scan_id)
            .field("open", &self.receiver.is_some())
            .finish()
    }
}

impl Subscription {
    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    fn deliver(&mut self, event: SessionEvent) -> Option<SessionEvent> {
        if event.is_final() {
            self.receiver = None;
        }
        Some(event)
    }

    /// Next event, or `None` once the stream has ended
    pub async fn next(&mut self) -> Option<SessionEvent> {
        if let Some(event) = self.pending.take() {
            return self.deliver(event);
        }

        let receiver = self.receiver.as_mut()?;
        match receiver.recv().await {
            Ok(event) => self.deliver(event),
            Err(RecvError::Lagged(missed)) => {
                warn!(scan_id = %self.scan_id, missed, "subscriber lagged, resyncing");
                match self.store.snapshot_and_receiver(&self.scan_id) {
                    Ok((snapshot, receiver)) => {
                        self.receiver = receiver;
                        self.deliver(SessionEvent::Snapshot {
                            session: Box::new(snapshot),
                        })
                    }
                    Err(e) => {
                        warn!(scan_id = %self.scan_id, "resync failed: {}", e);
                        self.receiver = None;
                        None
                    }
                }
            }
            Err(RecvError::Closed) => {
                self.receiver = None;
                None
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = SessionEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::state::models::{Metadata, RepoSource, ScanMode, Severity};
    use crate::state::task::AgentStatus;

    fn new_session(id: &str) -> ScanSession {
        let repo = RepoSource::new("/src/app");
        ScanSession::new(
            id,
            ScanMode::Standard,
            Some(&repo),
            None,
            &[AgentName::Static, AgentName::Secret, AgentName::Report],
        )
    }

    fn finding(id: &str) -> Finding {
        Finding {
            id: id.to_string(),
            title: "Hardcoded key".into(),
            description: String::new(),
            remediation: String::new(),
            severity: Severity::High,
            source_agent: AgentName::Secret,
            metadata: Metadata::new(),
        }
    }

    fn store() -> Arc<SessionStore> {
        Arc::new(SessionStore::new(Broadcaster::new(16)))
    }

    #[test]
    fn test_create_and_get() {
        let store = store();
        store.create(new_session("s1")).unwrap();
        assert_eq!(store.get("s1").unwrap().scan_id, "s1");
        assert!(matches!(store.get("nope"), Err(Error::SessionNotFound(_))));
        assert!(store.create(new_session("s1")).is_err());
    }

    #[test]
    fn test_append_finding_dedups_by_id() {
        let store = store();
        store.create(new_session("s1")).unwrap();
        assert!(store.append_finding("s1", finding("f1")).unwrap());
        assert!(!store.append_finding("s1", finding("f1")).unwrap());
        assert!(store.append_finding("s1", finding("f2")).unwrap());
        assert_eq!(store.get("s1").unwrap().findings.len(), 2);
    }

    #[test]
    fn test_update_task_rejects_invalid_transition_without_mutation() {
        let store = store();
        store.create(new_session("s1")).unwrap();

        let err = store
            .update_task("s1", AgentName::Static, |t| t.complete("early"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition(_)));
        assert_eq!(
            store.get("s1").unwrap().task(AgentName::Static).unwrap().status,
            AgentStatus::Pending
        );

        let task = store
            .update_task("s1", AgentName::Static, |t| t.start("go"))
            .unwrap();
        assert_eq!(task.status, AgentStatus::Running);

        assert!(
            store
                .update_task("s1", AgentName::Fuzzer, |t| t.start("go"))
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_subscribe_gets_snapshot_then_ordered_deltas() {
        let store = store();
        store.create(new_session("s1")).unwrap();
        store.append_log("s1", "before subscribe").unwrap();

        let mut sub = store.subscribe("s1").unwrap();

        store
            .update_task("s1", AgentName::Static, |t| t.start("go"))
            .unwrap();
        store.append_finding("s1", finding("f1")).unwrap();
        store.append_log("s1", "after subscribe").unwrap();
        store.mark_finished("s1").unwrap();

        match sub.next().await.unwrap() {
            SessionEvent::Snapshot { session } => {
                assert_eq!(session.logs, vec!["before subscribe".to_string()]);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
        assert!(matches!(
            sub.next().await.unwrap(),
            SessionEvent::TaskUpdated { .. }
        ));
        assert!(matches!(
            sub.next().await.unwrap(),
            SessionEvent::FindingAppended { .. }
        ));
        assert!(matches!(
            sub.next().await.unwrap(),
            SessionEvent::LogAppended { .. }
        ));
        assert!(matches!(
            sub.next().await.unwrap(),
            SessionEvent::ScanFinished { .. }
        ));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_resynced_with_snapshot() {
        let store = Arc::new(SessionStore::new(Broadcaster::new(2)));
        store.create(new_session("s1")).unwrap();
        let mut sub = store.subscribe("s1").unwrap();
        assert!(matches!(
            sub.next().await.unwrap(),
            SessionEvent::Snapshot { .. }
        ));

        for i in 0..10 {
            store.append_log("s1", format!("line {}", i)).unwrap();
        }

        match sub.next().await.unwrap() {
            SessionEvent::Snapshot { session } => assert_eq!(session.logs.len(), 10),
            other => panic!("expected resync snapshot, got {:?}", other),
        }

        store.append_log("s1", "fresh").unwrap();
        match sub.next().await.unwrap() {
            SessionEvent::LogAppended { line, .. } => assert_eq!(line, "fresh"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscribe_to_finished_session_yields_snapshot_only() {
        let store = store();
        store.create(new_session("s1")).unwrap();
        store.mark_finished("s1").unwrap();

        let mut sub = store.subscribe("s1").unwrap();
        assert!(sub.next().await.unwrap().is_final());
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn test_mark_finished_is_idempotent() {
        let store = store();
        store.create(new_session("s1")).unwrap();
        let first = store.mark_finished("s1").unwrap();
        let second = store.mark_finished("s1").unwrap();
        assert_eq!(first.finished_at, second.finished_at);
    }

    #[test]
    fn test_evict_expired_only_finished_unwatched_sessions() {
        let store = store();
        store.create(new_session("running")).unwrap();
        store.create(new_session("done")).unwrap();
        store.create(new_session("watched")).unwrap();
        store.mark_finished("done").unwrap();
        store.mark_finished("watched").unwrap();
        let _sub = store.subscribe("watched").unwrap();

        let evicted = store.evict_expired(Duration::ZERO);
        assert_eq!(evicted, vec!["done".to_string()]);
        assert_eq!(store.len(), 2);
        assert!(store.get("done").is_err());
    }

    #[test]
    fn test_archive_fallback_after_eviction() {
        let archive = Arc::new(SessionArchive::open_in_memory().unwrap());
        let store = Arc::new(SessionStore::new(Broadcaster::new(8)).with_archive(archive));
        store.create(new_session("s1")).unwrap();
        store
            .update_task("s1", AgentName::Static, |t| t.start("go"))
            .unwrap();
        store
            .update_task("s1", AgentName::Static, |t| {
                t.fail(ErrorKind::AdapterTimeout, "timed out")
            })
            .unwrap();
        store.mark_finished("s1").unwrap();
        store.evict_expired(Duration::ZERO);

        let archived = store.get("s1").unwrap();
        assert_eq!(
            archived.task(AgentName::Static).unwrap().error,
            Some(ErrorKind::AdapterTimeout)
        );
        assert_eq!(store.latest().unwrap().unwrap().scan_id, "s1");
    }

    #[test]
    fn test_latest_picks_newest_session() {
        let store = store();
        assert!(store.latest().unwrap().is_none());

        let older = new_session("older");
        let mut newer = new_session("newer");
        newer.created_at = older.created_at + chrono::Duration::seconds(1);
        store.create(older).unwrap();
        store.create(newer).unwrap();
        assert_eq!(store.latest().unwrap().unwrap().scan_id, "newer");
    }
}
