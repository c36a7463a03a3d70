//! Unattended dispatch loop: discover new items, run them one at a time,
//! retry once, skip what still fails.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acquire::{Discovery, WorkItem};
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::history::HistoryStore;
use crate::lock::{LockResource, LockStatus};
use crate::workflow::JobRunner;

/// A failed item gets one fresh run before it is skipped.
const ATTEMPTS_PER_ITEM: u32 = 2;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub cycles: usize,
    pub discovered: usize,
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    /// Another instance held the lock; nothing was done.
    pub contended: bool,
    pub cancelled: bool,
}

enum ItemResult {
    Completed,
    Skipped,
    Cancelled,
}

pub struct Monitor {
    discovery: Box<dyn Discovery>,
    runner: Arc<dyn JobRunner>,
    history: Arc<dyn HistoryStore>,
    lock: Box<dyn LockResource>,
    channels: Vec<String>,
    config: MonitorConfig,
    skipped: HashSet<String>,
}

impl Monitor {
    pub fn new(
        discovery: Box<dyn Discovery>,
        runner: Arc<dyn JobRunner>,
        history: Arc<dyn HistoryStore>,
        lock: Box<dyn LockResource>,
        channels: Vec<String>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            discovery,
            runner,
            history,
            lock,
            channels,
            config,
            skipped: HashSet::new(),
        }
    }

    /// Run one cycle (`once`) or poll until `cancel` fires. The lock is held
    /// for the whole run and released on every exit path.
    pub async fn run(&mut self, once: bool, cancel: &CancellationToken) -> Result<MonitorReport> {
        let mut report = MonitorReport::default();

        if let LockStatus::Contended { pid, started } = self.lock.try_acquire()? {
            info!(
                "Another instance is already running (PID {}, started {}); exiting",
                pid.map_or_else(|| "unknown".to_string(), |p| p.to_string()),
                started.as_deref().unwrap_or("unknown")
            );
            report.contended = true;
            return Ok(report);
        }

        info!("Monitoring {} channels", self.channels.len());
        self.poll(once, cancel, &mut report).await;

        if let Err(e) = self.lock.release() {
            warn!("Failed to release lock: {}", e);
        }

        info!(
            "Monitor finished after {} cycles: {} completed, {} skipped",
            report.cycles,
            report.completed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn poll(&mut self, once: bool, cancel: &CancellationToken, report: &mut MonitorReport) {
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        loop {
            self.run_cycle(cancel, report).await;
            report.cycles += 1;

            if once || report.cancelled || cancel.is_cancelled() {
                report.cancelled |= cancel.is_cancelled();
                return;
            }

            info!("Next check in {} seconds", interval.as_secs());
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown requested");
                    report.cancelled = true;
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Items not yet processed, not skipped this run, in discovery order.
    async fn build_queue(&self) -> Result<Vec<WorkItem>> {
        let history = self.history.snapshot().await?;
        let mut queued: HashSet<String> = HashSet::new();
        let mut queue = Vec::new();

        for channel in &self.channels {
            let items = match self.discovery.recent_items(channel, self.config.items_per_channel).await {
                Ok(items) => items,
                Err(e) => {
                    warn!("Skipping channel {} this cycle: {}", channel, e);
                    continue;
                }
            };

            for item in items {
                if history.contains(&item.id) || self.skipped.contains(&item.id) {
                    debug!("{} already handled", item.id);
                    continue;
                }
                if queued.insert(item.id.clone()) {
                    queue.push(item);
                }
            }
        }

        Ok(queue)
    }

    async fn run_cycle(&mut self, cancel: &CancellationToken, report: &mut MonitorReport) {
        let queue = match self.build_queue().await {
            Ok(queue) => queue,
            Err(e) => {
                error!("Could not build work queue: {}", e);
                return;
            }
        };

        report.discovered += queue.len();
        if queue.is_empty() {
            info!("No new items");
            return;
        }
        info!("{} new items queued", queue.len());

        for item in queue {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }

            match self.process_item(&item, cancel).await {
                ItemResult::Completed => report.completed.push(item.id),
                ItemResult::Skipped => {
                    self.skipped.insert(item.id.clone());
                    report.skipped.push(item.id);
                }
                ItemResult::Cancelled => {
                    warn!("Abandoned {} on shutdown", item.id);
                    report.cancelled = true;
                    return;
                }
            }
        }
    }

    async fn process_item(&self, item: &WorkItem, cancel: &CancellationToken) -> ItemResult {
        let delay = Duration::from_secs(self.config.retry_delay_secs);

        for attempt in 1..=ATTEMPTS_PER_ITEM {
            info!("Processing {} ({}) attempt {}/{}", item.id, item.title, attempt, ATTEMPTS_PER_ITEM);

            let job = tokio::select! {
                _ = cancel.cancelled() => return ItemResult::Cancelled,
                job = self.runner.run(item) => job,
            };
            if job.succeeded() {
                return ItemResult::Completed;
            }

            if attempt < ATTEMPTS_PER_ITEM {
                warn!("{} failed; retrying in {} seconds", item.id, delay.as_secs());
                tokio::select! {
                    _ = cancel.cancelled() => return ItemResult::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        warn!("{} failed {} times; skipping for this run", item.id, ATTEMPTS_PER_ITEM);
        ItemResult::Skipped
    }
}
