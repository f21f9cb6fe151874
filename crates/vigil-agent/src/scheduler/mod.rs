//! Per-item sampling tasks.
//!
//! One lightweight task per active monitor item, armed by the
//! [`trigger::CustomTrigger`]. The scheduler owns the task set; `reshape`
//! reconciles it against each newly published plan.

pub mod trigger;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_collector::dispatch::ValueDispatcher;
use vigil_collector::error::DispatchError;
use vigil_common::types::MonitorItem;

use crate::services::metrics_sender::MetricsSender;
use trigger::{CustomTrigger, OUT_OF_WINDOW_RETRY};

struct ItemTask {
    item: MonitorItem,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// What a reshape did, for logging and tests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReshapeSummary {
    pub started: Vec<i64>,
    pub restarted: Vec<i64>,
    pub kept: Vec<i64>,
    pub removed: Vec<i64>,
}

pub struct ItemScheduler {
    dispatcher: Arc<ValueDispatcher>,
    sender: Arc<MetricsSender>,
    root: CancellationToken,
    tasks: Mutex<HashMap<i64, ItemTask>>,
}

impl ItemScheduler {
    pub fn new(
        dispatcher: Arc<ValueDispatcher>,
        sender: Arc<MetricsSender>,
        root: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            sender,
            root,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Reconcile running tasks against a newly published plan: removed ids are
    /// cancelled, changed ids restarted, identical ids left running, new ids
    /// started. Serialized by the lifecycle controller.
    pub fn reshape(&self, new_items: &[MonitorItem]) -> ReshapeSummary {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut summary = ReshapeSummary::default();

        let new_ids: std::collections::HashSet<i64> =
            new_items.iter().map(|i| i.item_id).collect();

        let removed: Vec<i64> = tasks
            .keys()
            .filter(|id| !new_ids.contains(id))
            .copied()
            .collect();
        for id in removed {
            if let Some(task) = tasks.remove(&id) {
                task.cancel.cancel();
                summary.removed.push(id);
            }
        }

        for item in new_items {
            if !item.has_schedule() {
                warn!(
                    item_id = item.item_id,
                    item_name = %item.item_name,
                    "Item has no interval configuration, skipping"
                );
                continue;
            }

            match tasks.get(&item.item_id) {
                Some(existing) if existing.item == *item => {
                    summary.kept.push(item.item_id);
                }
                Some(_) => {
                    if let Some(old) = tasks.remove(&item.item_id) {
                        old.cancel.cancel();
                    }
                    tasks.insert(item.item_id, self.spawn_task(item.clone()));
                    summary.restarted.push(item.item_id);
                }
                None => {
                    tasks.insert(item.item_id, self.spawn_task(item.clone()));
                    summary.started.push(item.item_id);
                }
            }
        }

        info!(
            started = summary.started.len(),
            restarted = summary.restarted.len(),
            kept = summary.kept.len(),
            removed = summary.removed.len(),
            "Item schedule reshaped"
        );
        summary
    }

    /// Ids with a live task, for invariant checks.
    pub fn task_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Cancel everything and wait for task exit. Called under the
    /// controller's shutdown ceiling.
    pub async fn shutdown(&self) {
        let drained: Vec<ItemTask> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain().map(|(_, task)| task).collect()
        };
        for task in &drained {
            task.cancel.cancel();
        }
        for task in drained {
            let _ = task.handle.await;
        }
    }

    fn spawn_task(&self, item: MonitorItem) -> ItemTask {
        let cancel = self.root.child_token();
        let task_cancel = cancel.clone();
        let dispatcher = self.dispatcher.clone();
        let sender = self.sender.clone();
        let task_item = item.clone();

        let handle = tokio::spawn(async move {
            run_item_task(task_item, dispatcher, sender, task_cancel).await;
        });

        ItemTask {
            item,
            cancel,
            handle,
        }
    }
}

async fn run_item_task(
    item: MonitorItem,
    dispatcher: Arc<ValueDispatcher>,
    sender: Arc<MetricsSender>,
    cancel: CancellationToken,
) {
    let trigger = CustomTrigger::for_item(&item);
    let mut last_completion: Option<DateTime<Local>> = None;
    let mut unknown_key_logged = false;

    debug!(item_id = item.item_id, item_key = %item.item_key, "Item task started");

    loop {
        let now = Local::now();
        let Some(next_fire) = trigger.next_fire_time(last_completion, now) else {
            warn!(
                item_id = item.item_id,
                item_name = %item.item_name,
                "Item has no usable schedule, task exiting"
            );
            return;
        };

        let delay = (next_fire - now).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(item_id = item.item_id, "Item task cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        if !trigger.should_execute_now(Local::now()) {
            debug!(
                item_id = item.item_id,
                "Outside execution window, re-arming"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(OUT_OF_WINDOW_RETRY) => {}
            }
            continue;
        }

        execute_item(&item, &dispatcher, &sender, &cancel, &mut unknown_key_logged).await;
        last_completion = Some(Local::now());
    }
}

async fn execute_item(
    item: &MonitorItem,
    dispatcher: &ValueDispatcher,
    sender: &MetricsSender,
    cancel: &CancellationToken,
    unknown_key_logged: &mut bool,
) {
    let timeout = Duration::from_secs(item.timeout_secs.max(1) as u64);
    let result = tokio::time::timeout(timeout, dispatcher.dispatch(&item.item_key, cancel)).await;

    match result {
        Err(_) => {
            warn!(
                item_id = item.item_id,
                item_key = %item.item_key,
                timeout_secs = item.timeout_secs,
                "Item dispatch timed out"
            );
        }
        Ok(Err(DispatchError::UnknownKey(key))) => {
            // WARN once per item per task lifetime; later occurrences stay at
            // debug so a command-map or plan fix can be picked up quietly.
            if !*unknown_key_logged {
                warn!(item_id = item.item_id, item_key = %key, "No value source for item");
                *unknown_key_logged = true;
            } else {
                debug!(item_id = item.item_id, item_key = %key, "Still no value source for item");
            }
        }
        Ok(Err(e)) => {
            warn!(
                item_id = item.item_id,
                item_key = %item.item_key,
                error = %e,
                "Item dispatch failed"
            );
        }
        Ok(Ok((value, source))) => {
            debug!(
                item_id = item.item_id,
                item_key = %item.item_key,
                source = %source,
                value = %value,
                "Item sampled"
            );
            if let Err(e) = sender.send_immediate(item.item_id, value).await {
                warn!(
                    item_id = item.item_id,
                    error = %e,
                    "Failed to send item sample"
                );
            }
        }
    }
}
