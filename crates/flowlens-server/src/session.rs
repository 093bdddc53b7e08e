use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};

use flowlens_core::config::LedgerConfig;
use flowlens_core::control::ControlMessage;
use flowlens_ledger::catalog::NodeCatalog;
use flowlens_ledger::session::WatchSession;

use crate::types::{SessionSummary, ViewSnapshot};

/// Capacity of each session's view broadcast channel.
const UPDATE_CAPACITY: usize = 64;

/// One watched target: the live session, its pending control messages and
/// the channel view snapshots are published on.
pub struct SessionSlot {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    state: RwLock<SlotState>,
    updates: broadcast::Sender<Arc<ViewSnapshot>>,
}

pub struct SlotState {
    pub session: WatchSession,
    pub outbox: Vec<ControlMessage>,
}

impl SessionSlot {
    fn new(session_id: String, session: WatchSession) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            session_id,
            created_at: Utc::now(),
            state: RwLock::new(SlotState {
                session,
                outbox: Vec::new(),
            }),
            updates,
        }
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, SlotState> {
        self.state.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, SlotState> {
        self.state.write().await
    }

    /// Current snapshot of the session's view.
    pub async fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot::of(&self.state.read().await.session)
    }

    /// Run `f` under the write lock. On success the resulting view is
    /// published before the lock is released, so subscribers see snapshots
    /// in the order the mutations happened. Nothing is published on error.
    pub async fn update<R, E>(
        &self,
        f: impl FnOnce(&mut SlotState) -> Result<R, E>,
    ) -> Result<(R, ViewSnapshot), E> {
        let mut state = self.state.write().await;
        let out = f(&mut state)?;
        let snapshot = ViewSnapshot::of(&state.session);
        // No subscribers is fine.
        let _ = self.updates.send(Arc::new(snapshot.clone()));
        Ok((out, snapshot))
    }

    /// Subscribe together with the snapshot the first update will follow.
    pub async fn subscribe(&self) -> (ViewSnapshot, broadcast::Receiver<Arc<ViewSnapshot>>) {
        let state = self.state.read().await;
        (ViewSnapshot::of(&state.session), self.updates.subscribe())
    }

    pub async fn summary(&self) -> SessionSummary {
        let state = self.state.read().await;
        let view = state.session.view();
        SessionSummary {
            session_id: self.session_id.clone(),
            target: state.session.target().map(str::to_string),
            root_run_id: view.root_run_id.clone(),
            status: view.status,
            event_count: view.event_count,
            pending_messages: state.outbox.len(),
            created_at: self.created_at,
        }
    }
}

/// In-memory store of watch sessions.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Arc<SessionSlot>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(
        &self,
        session_id: String,
        target: String,
        catalog: NodeCatalog,
        config: LedgerConfig,
    ) -> Arc<SessionSlot> {
        let mut session = WatchSession::new(catalog, config);
        session.watch(target);
        let slot = Arc::new(SessionSlot::new(session_id.clone(), session));
        self.sessions.write().await.insert(session_id, slot.clone());
        slot
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn delete(&self, session_id: &str) -> Option<Arc<SessionSlot>> {
        self.sessions.write().await.remove(session_id)
    }

    /// Sessions ordered by creation time.
    pub async fn list(&self) -> Vec<Arc<SessionSlot>> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<_> = sessions.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowlens_core::event::FlowEvent;
    use serde_json::json;

    async fn create(store: &SessionStore, id: &str) -> Arc<SessionSlot> {
        store
            .create(id.into(), format!("wf-{id}"), NodeCatalog::new(), LedgerConfig::default())
            .await
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = SessionStore::new();
        create(&store, "s1").await;
        let slot = store.get("s1").await.unwrap();
        assert_eq!(slot.session_id, "s1");
        assert_eq!(slot.read().await.session.target(), Some("wf-s1"));
        assert!(store.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn delete_session() {
        let store = SessionStore::new();
        create(&store, "s1").await;
        assert!(store.delete("s1").await.is_some());
        assert!(store.get("s1").await.is_none());
        assert!(store.delete("s1").await.is_none());
    }

    #[tokio::test]
    async fn list_sessions() {
        let store = SessionStore::new();
        create(&store, "s1").await;
        create(&store, "s2").await;
        let list = store.list().await;
        assert_eq!(list.len(), 2);
        assert!(list[0].created_at <= list[1].created_at);
    }

    #[tokio::test]
    async fn updates_reach_subscribers() {
        let store = SessionStore::new();
        let slot = create(&store, "s1").await;
        let (initial, mut rx) = slot.subscribe().await;
        assert!(initial.view.steps.is_empty());

        let event = FlowEvent::from_value(json!({"type": "node_start", "run_id": "r", "node_id": "a"})).unwrap();
        slot.update(|state| state.session.ingest(event)).await.unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.selected.as_deref(), Some("r:a:0"));
        assert_eq!(snapshot.view.steps.len(), 1);
    }

    #[tokio::test]
    async fn failed_update_publishes_nothing() {
        let store = SessionStore::new();
        let slot = create(&store, "s1").await;
        let (_, mut rx) = slot.subscribe().await;
        let result: Result<((), ViewSnapshot), &str> = slot.update(|_| Err("nope")).await;
        assert!(result.is_err());
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn concurrent_updates_publish_in_order() {
        let store = SessionStore::new();
        let slot = create(&store, "s1").await;
        let (_, mut rx) = slot.subscribe().await;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let slot = slot.clone();
            tasks.push(tokio::spawn(async move {
                let event = FlowEvent::from_value(
                    json!({"type": "node_start", "run_id": "r", "node_id": format!("n{i}")}),
                )
                .unwrap();
                slot.update(|state| state.session.ingest(event)).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut counts = Vec::new();
        while let Ok(snapshot) = rx.try_recv() {
            counts.push(snapshot.view.event_count);
        }
        assert_eq!(counts, (1..=16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn summary_reports_outbox_size() {
        let store = SessionStore::new();
        let slot = create(&store, "s1").await;
        slot.write().await.outbox.push(ControlMessage::Resume { response: json!("y") });
        let summary = slot.summary().await;
        assert_eq!(summary.pending_messages, 1);
        assert_eq!(summary.target.as_deref(), Some("wf-s1"));
        assert!(summary.root_run_id.is_none());
    }
}
