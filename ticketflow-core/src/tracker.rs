use crate::error::{EngineError, Result};
use crate::sla;
use crate::store::WorkflowStore;
use crate::types::*;
use chrono::Utc;
use std::sync::Arc;

/// Task-item state tracker.
///
/// Current status is a pure read derived from the append-only history log
/// (latest entry by `created_at`, tie-broken by sequence number), defaulting
/// to `New` when no history exists. [`Tracker::record_transition`] is the
/// sole mutator and always appends — never updates in place — which
/// sidesteps lost-update races on a mutable status column.
pub struct Tracker {
    store: Arc<dyn WorkflowStore>,
}

impl Tracker {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Derived current status. `New` when the item has no history.
    pub async fn current_status(&self, item_id: ItemId) -> Result<ItemStatus> {
        let latest = self
            .store
            .latest_history(item_id)
            .await
            .map_err(EngineError::Store)?;
        Ok(latest.map(|h| h.status).unwrap_or(ItemStatus::New))
    }

    /// Append a status change. Rejected when the item is already in a
    /// terminal status — the item's history ends there; the task continues
    /// via a new item if at all. The check here yields the typed error;
    /// the store repeats it inside its append critical section, so two
    /// racing calls cannot both extend a closed history.
    pub async fn record_transition(
        &self,
        item_id: ItemId,
        status: ItemStatus,
        changed_by: UserId,
    ) -> Result<TaskItemHistory> {
        let mut item = self
            .store
            .load_item(item_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or(EngineError::ItemNotFound(item_id))?;

        let current = self.current_status(item_id).await?;
        if current.is_terminal() {
            return Err(EngineError::ItemTerminal(current));
        }

        let now = Utc::now();
        let entry = self
            .store
            .append_history(item_id, status, changed_by, now)
            .await
            .map_err(EngineError::Store)?;

        if status.is_terminal() {
            item.acted_on = Some(now);
            self.store.save_item(&item).await.map_err(EngineError::Store)?;
        }

        Ok(entry)
    }

    /// SLA breach, computed on read for reporting: deadline in the past and
    /// the item not yet closed. Never stored as a flag.
    pub async fn is_breached(&self, item_id: ItemId) -> Result<bool> {
        let item = self
            .store
            .load_item(item_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or(EngineError::ItemNotFound(item_id))?;
        let status = self.current_status(item_id).await?;
        Ok(sla::is_breached(item.target_resolution, status, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use uuid::Uuid;

    async fn seeded_item(store: &Arc<MemoryStore>) -> TaskItem {
        let item = TaskItem {
            id: Uuid::now_v7(),
            task_id: Uuid::now_v7(),
            step_id: Uuid::now_v7(),
            role: Some(Uuid::now_v7()),
            assignee: Some(Uuid::now_v7()),
            origin: AssignmentOrigin::System,
            assigned_on: Utc::now(),
            acted_on: None,
            target_resolution: None,
            transferred_to: None,
        };
        store.save_item(&item).await.unwrap();
        item
    }

    #[tokio::test]
    async fn status_defaults_to_new_without_history() {
        let store = Arc::new(MemoryStore::new());
        let tracker = Tracker::new(store.clone());
        let item = seeded_item(&store).await;
        assert_eq!(
            tracker.current_status(item.id).await.unwrap(),
            ItemStatus::New
        );
    }

    #[tokio::test]
    async fn resolved_status_is_stable_across_reads() {
        let store = Arc::new(MemoryStore::new());
        let tracker = Tracker::new(store.clone());
        let item = seeded_item(&store).await;
        let user = Uuid::now_v7();

        tracker
            .record_transition(item.id, ItemStatus::InProgress, user)
            .await
            .unwrap();
        tracker
            .record_transition(item.id, ItemStatus::Resolved, user)
            .await
            .unwrap();

        // Reads never mutate or duplicate the latest row
        for _ in 0..3 {
            assert_eq!(
                tracker.current_status(item.id).await.unwrap(),
                ItemStatus::Resolved
            );
        }
        assert_eq!(store.history_for(item.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn terminal_item_rejects_further_transitions() {
        let store = Arc::new(MemoryStore::new());
        let tracker = Tracker::new(store.clone());
        let item = seeded_item(&store).await;
        let user = Uuid::now_v7();

        tracker
            .record_transition(item.id, ItemStatus::Escalated, user)
            .await
            .unwrap();
        let err = tracker
            .record_transition(item.id, ItemStatus::InProgress, user)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::ItemTerminal(ItemStatus::Escalated)
        ));
    }

    #[tokio::test]
    async fn terminal_transition_stamps_acted_on() {
        let store = Arc::new(MemoryStore::new());
        let tracker = Tracker::new(store.clone());
        let item = seeded_item(&store).await;

        tracker
            .record_transition(item.id, ItemStatus::Resolved, Uuid::now_v7())
            .await
            .unwrap();
        let stored = store.load_item(item.id).await.unwrap().unwrap();
        assert!(stored.acted_on.is_some());
    }

    #[tokio::test]
    async fn breach_is_computed_not_stored() {
        let store = Arc::new(MemoryStore::new());
        let tracker = Tracker::new(store.clone());

        let mut item = seeded_item(&store).await;
        item.target_resolution = Some(Utc::now() - Duration::hours(1));
        store.save_item(&item).await.unwrap();

        assert!(tracker.is_breached(item.id).await.unwrap());

        // Resolving clears the breach on the next read
        tracker
            .record_transition(item.id, ItemStatus::Resolved, Uuid::now_v7())
            .await
            .unwrap();
        assert!(!tracker.is_breached(item.id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let tracker = Tracker::new(store);
        let err = tracker
            .record_transition(Uuid::now_v7(), ItemStatus::InProgress, Uuid::now_v7())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ItemNotFound(_)));
    }
}
