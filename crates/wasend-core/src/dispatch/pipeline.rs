//! Dispatch Pipeline - Schedules, delivers and tracks queued messages
//!
//! All queue mutation goes through one `tokio::sync::Mutex`, shared by the
//! background dispatch loop and the control methods. The loop never holds
//! the lock across a gateway call or a timer.

use super::counter::DailyCounter;
use super::export::DispatchLog;
use super::observer::Observers;
use super::policy::SchedulePolicy;
use super::stats::{compute_stats, StatsContext};
use super::template::TemplateRenderer;
use crate::clock::{Clock, SystemClock};
use crate::gateway::{DeliveryError, FailureKind, Gateway};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wasend_common::config::{PipelineConfig, PipelineConfigPatch};
use wasend_common::types::{
    Contact, ItemId, ItemStatus, PipelineStats, Priority, RunState, WorkItem,
};
use wasend_common::{Error, Result};
use wasend_storage::CounterStore;

/// Queue and policy, guarded together
struct PipelineState {
    queue: Vec<WorkItem>,
    config: PipelineConfig,
    policy: SchedulePolicy,
    /// Items dispatched since the last batch pause
    batch_processed: u32,
    batch_pause_until: Option<DateTime<Utc>>,
    /// Pending sent -> delivered transitions
    confirmations: HashMap<ItemId, AbortHandle>,
}

impl PipelineState {
    fn item_mut(&mut self, id: ItemId) -> Option<&mut WorkItem> {
        self.queue.iter_mut().find(|item| item.id == id)
    }

    /// Fail pending items whose attempts already reach the current limit
    ///
    /// Only happens after `max_attempts` is lowered below an item's count.
    fn fail_exhausted(&mut self) -> usize {
        let max_attempts = self.policy.max_attempts;
        let mut failed = 0;
        for item in &mut self.queue {
            if item.status == ItemStatus::Pending && item.attempts >= max_attempts && item.attempts > 0 {
                item.status = ItemStatus::Failed;
                if item.last_error.is_none() {
                    item.last_error = Some("attempt limit reached".to_string());
                }
                warn!(item_id = %item.id, attempts = item.attempts, max_attempts, "Attempt limit lowered, item failed");
                failed += 1;
            }
        }
        failed
    }
}

#[derive(Default)]
struct Control {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// One item handed from the planner to the gateway
struct Job {
    id: ItemId,
    recipient: Contact,
    message: String,
    attempt: u32,
    timeout: Duration,
}

enum Step {
    Dispatch(Job),
    Wait { until: DateTime<Utc>, poll: Duration },
    Continue,
    Finish,
}

/// Observer payload captured under the state lock
struct Snapshot {
    stats: PipelineStats,
    queue: Option<Vec<WorkItem>>,
}

struct Inner {
    state: Mutex<PipelineState>,
    gateway: Arc<dyn Gateway>,
    clock: Arc<dyn Clock>,
    counter: DailyCounter,
    renderer: TemplateRenderer,
    observers: Observers,
    wake: Notify,
    run_state: watch::Sender<RunState>,
    control: Mutex<Control>,
}

/// Outbound message dispatch pipeline
///
/// Cloning yields another handle to the same pipeline.
#[derive(Clone)]
pub struct DispatchPipeline {
    inner: Arc<Inner>,
}

impl DispatchPipeline {
    /// Create a pipeline reading the host clock
    pub fn new(
        config: PipelineConfig,
        gateway: Arc<dyn Gateway>,
        store: Arc<dyn CounterStore>,
    ) -> Result<Self> {
        Self::with_clock(config, gateway, store, Arc::new(SystemClock))
    }

    /// Create a pipeline with an explicit clock
    pub fn with_clock(
        config: PipelineConfig,
        gateway: Arc<dyn Gateway>,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let policy = SchedulePolicy::from_config(&config)?;
        let (run_state, _) = watch::channel(RunState::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PipelineState {
                    queue: Vec::new(),
                    config,
                    policy,
                    batch_processed: 0,
                    batch_pause_until: None,
                    confirmations: HashMap::new(),
                }),
                gateway,
                clock,
                counter: DailyCounter::new(store),
                renderer: TemplateRenderer::default(),
                observers: Observers::default(),
                wake: Notify::new(),
                run_state,
                control: Mutex::new(Control::default()),
            }),
        })
    }

    /// Render `template` for every contact and queue the results
    ///
    /// Every contact yields one item; an unusable number surfaces later as a
    /// blocked delivery.
    pub async fn enqueue(
        &self,
        contacts: Vec<Contact>,
        template: &str,
        priority: Priority,
    ) -> Result<Vec<ItemId>> {
        if template.trim().is_empty() {
            return Err(Error::Validation("Message template is empty".to_string()));
        }

        let now = self.inner.clock.now();
        let created_at = now.with_timezone(&Utc);

        let (ids, snapshot) = {
            let mut state = self.inner.state.lock().await;
            let mut ids = Vec::with_capacity(contacts.len());

            for contact in contacts {
                let message = self.inner.renderer.render(template, &contact, now);
                let scheduled_at = state.policy.schedule_for(ids.len(), priority, now);
                let item = WorkItem::new(
                    contact,
                    message,
                    template.to_string(),
                    priority,
                    scheduled_at,
                    created_at,
                );
                debug!(item_id = %item.id, %scheduled_at, "Scheduled message");
                ids.push(item.id);
                state.queue.push(item);
            }

            sort_queue(&mut state.queue);
            let snapshot = self.inner.snapshot(&state);
            (ids, snapshot)
        };

        info!(count = ids.len(), %priority, "Enqueued messages");
        self.inner.wake.notify_one();
        self.inner.publish(snapshot);
        Ok(ids)
    }

    /// Start the dispatch loop
    ///
    /// No-op while running or paused; use [`resume`](Self::resume) to leave
    /// the paused state.
    pub async fn start(&self) {
        let mut control = self.inner.control.lock().await;

        let current = *self.inner.run_state.borrow();
        if current != RunState::Idle {
            debug!(state = %current, "Start ignored");
            return;
        }

        // Reap a loop that went idle on its own
        if let Some(cancel) = control.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = control.handle.take() {
            join_loop(handle).await;
        }

        let today = self.inner.clock.now().date_naive();
        let daily_count = self.inner.counter.reload(today).await;

        {
            let mut state = self.inner.state.lock().await;
            state.batch_processed = 0;
            state.batch_pause_until = None;
        }

        let cancel = CancellationToken::new();
        self.inner.run_state.send_replace(RunState::Running);

        let inner = self.inner.clone();
        let token = cancel.clone();
        control.handle = Some(tokio::spawn(async move { inner.run(token).await }));
        control.cancel = Some(cancel);
        drop(control);

        info!(daily_count, "Dispatch pipeline started");
        self.inner.publish_current().await;
    }

    /// Suspend dispatching; an in-flight delivery still completes
    pub async fn pause(&self) -> bool {
        let changed = self.inner.transition(RunState::Running, RunState::Paused);
        if changed {
            info!("Dispatch pipeline paused");
            self.inner.publish_current().await;
        }
        changed
    }

    /// Continue a paused pipeline without rescheduling its items
    pub async fn resume(&self) -> bool {
        let changed = self.inner.transition(RunState::Paused, RunState::Running);
        if changed {
            info!("Dispatch pipeline resumed");
            self.inner.publish_current().await;
        }
        changed
    }

    /// Stop the loop and wait for it to exit
    ///
    /// An interrupted delivery returns its item to pending without counting
    /// the attempt. Queued items stay for a later [`start`](Self::start).
    pub async fn stop(&self) {
        let mut control = self.inner.control.lock().await;

        if let Some(cancel) = control.cancel.take() {
            cancel.cancel();
        }
        let previous = self.inner.run_state.send_replace(RunState::Idle);
        if let Some(handle) = control.handle.take() {
            join_loop(handle).await;
        }
        drop(control);

        if previous != RunState::Idle {
            info!("Dispatch pipeline stopped");
        }
        self.inner.publish_current().await;
    }

    /// Current run state
    pub fn run_state(&self) -> RunState {
        *self.inner.run_state.borrow()
    }

    /// Resolve once the pipeline is idle (drained, capped or stopped)
    pub async fn wait_until_idle(&self) {
        let mut rx = self.inner.run_state.subscribe();
        // The sender lives as long as `self`
        let _ = rx.wait_for(|state| *state == RunState::Idle).await;
    }

    /// Return a failed or blocked item to pending with a fresh attempt budget
    pub async fn retry_item(&self, id: ItemId) -> bool {
        let now = self.inner.clock.now().with_timezone(&Utc);

        let snapshot = {
            let mut state = self.inner.state.lock().await;
            let Some(item) = state.item_mut(id) else {
                return false;
            };
            if !item.status.is_retryable() {
                return false;
            }

            item.status = ItemStatus::Pending;
            item.attempts = 0;
            item.last_error = None;
            item.scheduled_at = now;
            self.inner.snapshot(&state)
        };

        info!(item_id = %id, "Item queued for retry");
        self.inner.wake.notify_one();
        self.inner.publish(snapshot);
        true
    }

    /// Delete one item whatever its status
    pub async fn remove_from_queue(&self, id: ItemId) -> bool {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            let Some(index) = state.queue.iter().position(|item| item.id == id) else {
                return false;
            };
            state.queue.remove(index);
            if let Some(confirmation) = state.confirmations.remove(&id) {
                confirmation.abort();
            }
            self.inner.snapshot(&state)
        };

        debug!(item_id = %id, "Item removed from queue");
        self.inner.wake.notify_one();
        self.inner.publish(snapshot);
        true
    }

    /// Drop every item and cancel pending delivery confirmations
    pub async fn clear_queue(&self) {
        let (removed, snapshot) = {
            let mut state = self.inner.state.lock().await;
            let removed = state.queue.len();
            state.queue.clear();
            for (_, confirmation) in state.confirmations.drain() {
                confirmation.abort();
            }
            (removed, self.inner.snapshot(&state))
        };

        info!(removed, "Queue cleared");
        self.inner.wake.notify_one();
        self.inner.publish(snapshot);
    }

    /// Merge a partial configuration; applies from the next loop iteration
    ///
    /// On error the live configuration is left untouched.
    pub async fn update_config(&self, patch: PipelineConfigPatch) -> Result<()> {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            let config = state.config.merged(&patch)?;
            let policy = SchedulePolicy::from_config(&config)?;
            state.config = config;
            state.policy = policy;
            state.fail_exhausted();
            self.inner.snapshot(&state)
        };

        info!("Pipeline configuration updated");
        self.inner.wake.notify_one();
        self.inner.publish(snapshot);
        Ok(())
    }

    /// Current aggregate statistics
    pub async fn get_stats(&self) -> PipelineStats {
        let today = self.inner.clock.now().date_naive();
        self.inner.counter.current(today).await;

        let state = self.inner.state.lock().await;
        self.inner.stats(&state)
    }

    /// Copy of the queue in dispatch order at enqueue time
    pub async fn get_queue(&self) -> Vec<WorkItem> {
        self.inner.state.lock().await.queue.clone()
    }

    /// Live configuration
    pub async fn config(&self) -> PipelineConfig {
        self.inner.state.lock().await.config.clone()
    }

    /// Register the statistics subscriber, replacing any previous one
    pub fn on_stats_change<F>(&self, callback: F)
    where
        F: Fn(&PipelineStats) + Send + Sync + 'static,
    {
        self.inner.observers.set_stats(Arc::new(callback));
    }

    /// Register the queue subscriber, replacing any previous one
    pub fn on_queue_change<F>(&self, callback: F)
    where
        F: Fn(&[WorkItem]) + Send + Sync + 'static,
    {
        self.inner.observers.set_queue(Arc::new(callback));
    }

    /// Snapshot every item for download
    pub async fn export_log(&self) -> DispatchLog {
        let now = self.inner.clock.now().with_timezone(&Utc);
        let state = self.inner.state.lock().await;
        DispatchLog::new(&state.queue, now)
    }

    /// [`export_log`](Self::export_log) as pretty-printed JSON
    pub async fn export_json(&self) -> Result<String> {
        self.export_log().await.to_json()
    }
}

impl Inner {
    /// Main dispatch loop, one per `start`
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut run_rx = self.run_state.subscribe();
        debug!("Dispatch loop running");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let current = *run_rx.borrow_and_update();
            match current {
                RunState::Idle => break,
                RunState::Paused => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = run_rx.changed() => continue,
                    }
                }
                RunState::Running => {}
            }

            match self.plan(&cancel).await {
                Step::Dispatch(job) => self.dispatch(job, &cancel).await,
                Step::Wait { until, poll } => {
                    let now = self.clock.now().with_timezone(&Utc);
                    let delay = (until - now).to_std().unwrap_or_default().min(poll);
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.wake.notified() => {}
                        _ = run_rx.changed() => {}
                    }
                }
                Step::Continue => {}
                Step::Finish => {
                    self.publish_current().await;
                    break;
                }
            }
        }

        debug!("Dispatch loop exited");
    }

    /// Decide the next action from a fresh look at the queue
    async fn plan(&self, cancel: &CancellationToken) -> Step {
        let now = self.clock.now();
        let now_utc = now.with_timezone(&Utc);
        let daily_count = self.counter.current(now.date_naive()).await;

        let mut state = self.state.lock().await;
        let poll = state.policy.idle_poll;

        if daily_count >= state.policy.daily_limit {
            info!(daily_count, limit = state.policy.daily_limit, "Daily limit reached, stopping");
            return self.go_idle(cancel);
        }

        if !state.policy.within_business_hours(now) {
            let opens = state.policy.next_business_open(now);
            debug!(%opens, "Outside business hours");
            return Step::Wait {
                until: opens.with_timezone(&Utc),
                poll,
            };
        }

        if state.fail_exhausted() > 0 {
            let snapshot = self.snapshot(&state);
            drop(state);
            self.publish(snapshot);
            return Step::Continue;
        }

        let max_attempts = state.policy.max_attempts;
        let has_work = state.queue.iter().any(|item| item.is_eligible(max_attempts));

        if state.batch_pause_until.is_none()
            && state.batch_processed >= state.policy.batch_size
            && has_work
        {
            let until = now_utc + state.policy.batch_pause;
            info!(
                processed = state.batch_processed,
                %until,
                "Batch complete, pausing"
            );
            state.batch_pause_until = Some(until);
        }

        if let Some(until) = state.batch_pause_until {
            if now_utc < until && has_work {
                return Step::Wait { until, poll };
            }
            state.batch_pause_until = None;
            state.batch_processed = 0;
            debug!("Batch pause over");
        }

        let next = state
            .queue
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_eligible(max_attempts))
            .min_by(|(_, a), (_, b)| dispatch_order(a, b))
            .map(|(index, _)| index);

        let Some(index) = next else {
            info!("Queue exhausted, stopping");
            return self.go_idle(cancel);
        };

        let timeout = state.policy.delivery_timeout;
        let item = &mut state.queue[index];
        if item.scheduled_at > now_utc {
            return Step::Wait {
                until: item.scheduled_at,
                poll,
            };
        }

        item.status = ItemStatus::Processing;
        item.attempts += 1;
        let job = Job {
            id: item.id,
            recipient: item.recipient.clone(),
            message: item.rendered_message.clone(),
            attempt: item.attempts,
            timeout,
        };

        let snapshot = self.snapshot(&state);
        drop(state);
        self.publish(snapshot);
        Step::Dispatch(job)
    }

    /// Leave `Running` unless the loop was stopped or paused meanwhile
    fn go_idle(&self, cancel: &CancellationToken) -> Step {
        if cancel.is_cancelled() {
            return Step::Continue;
        }
        if self.transition(RunState::Running, RunState::Idle) {
            Step::Finish
        } else {
            Step::Continue
        }
    }

    /// Run one delivery with a bounded timeout, abortable by stop
    async fn dispatch(self: &Arc<Self>, job: Job, cancel: &CancellationToken) {
        debug!(item_id = %job.id, attempt = job.attempt, "Dispatching message");

        let gateway = self.gateway.clone();
        let recipient = job.recipient.clone();
        let message = job.message.clone();
        // A panicking gateway only takes down its own task
        let mut send = tokio::spawn(async move { gateway.send_one(&recipient, &message).await });
        let abort = send.abort_handle();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(job.timeout, &mut send) => Some(match result {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(DeliveryError::Other(format!("delivery task failed: {}", e))),
                Err(_) => Err(DeliveryError::Timeout(job.timeout)),
            }),
        };

        match outcome {
            Some(result) => {
                abort.abort();
                self.record(job, result).await;
            }
            None => {
                abort.abort();
                self.revert(job.id).await;
            }
        }
    }

    /// Apply a delivery outcome to the item
    async fn record(self: &Arc<Self>, job: Job, result: std::result::Result<(), DeliveryError>) {
        let now = self.clock.now();
        let now_utc = now.with_timezone(&Utc);

        // Counted even when the item was removed mid-flight; the message went out
        let daily_count = match result {
            Ok(()) => Some(self.counter.increment(now.date_naive()).await),
            Err(_) => None,
        };

        let snapshot = {
            let mut state = self.state.lock().await;
            state.batch_processed += 1;

            let max_attempts = state.policy.max_attempts;
            let retry_at = state.policy.retry_at(now);
            let confirmation_delay = state.policy.confirmation_delay;
            let mut confirm = false;

            match state.item_mut(job.id) {
                None => {
                    debug!(item_id = %job.id, "Item removed during delivery");
                }
                Some(item) => match result {
                    Ok(()) => {
                        item.status = ItemStatus::Sent;
                        item.sent_at = Some(now_utc);
                        info!(
                            item_id = %job.id,
                            attempt = job.attempt,
                            daily_count = daily_count.unwrap_or_default(),
                            "Message sent"
                        );
                        confirm = true;
                    }
                    Err(e) => {
                        item.last_error = Some(e.to_string());
                        match e.classify() {
                            FailureKind::Permanent => {
                                item.status = ItemStatus::Blocked;
                                warn!(item_id = %job.id, attempt = job.attempt, "Recipient blocked: {}", e);
                            }
                            FailureKind::Transient if item.attempts >= max_attempts => {
                                item.status = ItemStatus::Failed;
                                error!(item_id = %job.id, attempt = job.attempt, "Delivery failed permanently: {}", e);
                            }
                            FailureKind::Transient => {
                                item.status = ItemStatus::Pending;
                                item.scheduled_at = retry_at;
                                warn!(
                                    item_id = %job.id,
                                    attempt = job.attempt,
                                    %retry_at,
                                    "Delivery failed, will retry: {}",
                                    e
                                );
                            }
                        }
                    }
                },
            }

            if confirm {
                self.schedule_confirmation(&mut state, job.id, confirmation_delay);
            }
            self.snapshot(&state)
        };

        self.publish(snapshot);
    }

    /// Undo the bookkeeping of an attempt interrupted by stop
    async fn revert(&self, id: ItemId) {
        let snapshot = {
            let mut state = self.state.lock().await;
            if let Some(item) = state.item_mut(id) {
                if item.status == ItemStatus::Processing {
                    item.status = ItemStatus::Pending;
                    item.attempts = item.attempts.saturating_sub(1);
                }
            }
            self.snapshot(&state)
        };

        info!(item_id = %id, "Delivery interrupted, item returned to pending");
        self.publish(snapshot);
    }

    /// Spawn the delayed sent -> delivered transition for one item
    fn schedule_confirmation(self: &Arc<Self>, state: &mut PipelineState, id: ItemId, delay: Duration) {
        let inner = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.confirm_delivery(id).await;
        });

        if let Some(previous) = state.confirmations.insert(id, task.abort_handle()) {
            previous.abort();
        }
    }

    async fn confirm_delivery(&self, id: ItemId) {
        let now = self.clock.now().with_timezone(&Utc);

        let snapshot = {
            let mut state = self.state.lock().await;
            state.confirmations.remove(&id);
            match state.item_mut(id) {
                Some(item) if item.status == ItemStatus::Sent => {
                    item.status = ItemStatus::Delivered;
                    item.sent_at = None;
                    item.delivered_at = Some(now);
                }
                _ => return,
            }
            self.snapshot(&state)
        };

        debug!(item_id = %id, "Message delivered");
        self.publish(snapshot);
    }

    /// Compare-and-set on the run state
    fn transition(&self, from: RunState, to: RunState) -> bool {
        self.run_state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn stats(&self, state: &PipelineState) -> PipelineStats {
        let now = self.clock.now();
        compute_stats(
            &state.queue,
            &state.policy,
            StatsContext {
                daily_count: self.counter.cached(now.date_naive()),
                batch_processed: state.batch_processed,
                batch_pause_until: state.batch_pause_until,
                run_state: *self.run_state.borrow(),
                now: now.with_timezone(&Utc),
            },
        )
    }

    fn snapshot(&self, state: &PipelineState) -> Snapshot {
        Snapshot {
            stats: self.stats(state),
            queue: self.observers.has_queue().then(|| state.queue.clone()),
        }
    }

    /// Deliver a snapshot to observers; never call with the state lock held
    fn publish(&self, snapshot: Snapshot) {
        if let Some(queue) = &snapshot.queue {
            self.observers.notify_queue(queue);
        }
        self.observers.notify_stats(&snapshot.stats);
    }

    async fn publish_current(&self) {
        let snapshot = {
            let state = self.state.lock().await;
            self.snapshot(&state)
        };
        self.publish(snapshot);
    }
}

/// Priority descending, then scheduled time ascending
fn dispatch_order(a: &WorkItem, b: &WorkItem) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.scheduled_at.cmp(&b.scheduled_at))
}

fn sort_queue(queue: &mut [WorkItem]) {
    queue.sort_by(dispatch_order);
}

async fn join_loop(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        if e.is_panic() {
            error!("Dispatch loop panicked: {}", e);
        }
    }
}
