//! The fair-share dispatch algorithm (spec.md §4.1 steps 1-6).

use super::DownloadDispatcher;
use crate::types::DownloadQueueItem;
use crate::Result;
use chrono::Utc;
use std::collections::VecDeque;
use tokio::task::JoinSet;
use tracing::debug;

impl DownloadDispatcher {
    /// Run one dispatch tick: fill up to `available` slots across groups in
    /// round-robin order, then launch each selected item on its own task.
    pub(super) async fn tick(&self, in_flight: &mut JoinSet<()>) -> Result<()> {
        let _guard = self.tick_lock.lock().await;

        let running = self.store.running_counts().await?;
        let available = self.config.max_total_concurrency as i64 - running.total as i64;
        if available <= 0 {
            return Ok(());
        }

        let now = Utc::now();
        let groups = self.store.waiting_group_keys(now).await?;
        if groups.is_empty() {
            return Ok(());
        }

        let mut per_group_queues: Vec<VecDeque<DownloadQueueItem>> = Vec::with_capacity(groups.len());
        for group in &groups {
            let capacity = self
                .config
                .max_group_concurrency
                .saturating_sub(running.for_group(group) as usize);
            if capacity == 0 {
                per_group_queues.push(VecDeque::new());
                continue;
            }
            let items = self
                .store
                .waiting_items_for_group(group, now, capacity as i64)
                .await?;
            per_group_queues.push(items.into());
        }

        let selected = round_robin_select(per_group_queues, available as usize);
        debug!(selected = selected.len(), available, groups = groups.len(), "dispatch tick selected items");

        for item in selected {
            self.store.mark_running(item.id, now).await?;
            let dispatcher = self.clone();
            in_flight.spawn(async move {
                dispatcher.execute_item(item).await;
            });
        }

        Ok(())
    }
}

/// Take one item from each group's queue in turn, skipping exhausted groups,
/// until `available` items are collected or every queue is empty.
fn round_robin_select(
    mut queues: Vec<VecDeque<DownloadQueueItem>>,
    available: usize,
) -> Vec<DownloadQueueItem> {
    let mut selected = Vec::with_capacity(available);

    'outer: loop {
        let mut made_progress = false;
        for queue in queues.iter_mut() {
            if selected.len() >= available {
                break 'outer;
            }
            if let Some(item) = queue.pop_front() {
                selected.push(item);
                made_progress = true;
            }
        }
        if !made_progress {
            break;
        }
    }

    selected
}
