//! Scheduled sweeps: overdue invoices, overdue tasks, tasks due today and
//! expired trials.
//!
//! Each sweep scans candidates, flips state with a conditional update and
//! dispatches a notification only for rows it actually flipped, so running
//! a sweep twice is harmless. A failure on one row is logged and the sweep
//! moves on. A sweep that is still running when its next trigger fires is
//! skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use hub_shared::UserId;
use hub_store::{Invoice, Task, User};

use crate::translator::{Action, DomainEvent, Module, Translator};
use crate::Db;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepKind {
    InvoiceOverdue,
    TaskOverdue,
    TaskDueToday,
    TrialExpiry,
}

impl SweepKind {
    pub const ALL: [SweepKind; 4] = [
        SweepKind::InvoiceOverdue,
        SweepKind::TaskOverdue,
        SweepKind::TaskDueToday,
        SweepKind::TrialExpiry,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SweepKind::InvoiceOverdue => "invoice_overdue",
            SweepKind::TaskOverdue => "task_overdue",
            SweepKind::TaskDueToday => "task_due_today",
            SweepKind::TrialExpiry => "trial_expiry",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub flipped: usize,
    pub notified: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    Skipped,
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SweepRunner {
    db: Db,
    translator: Arc<Translator>,
    running: [AtomicBool; 4],
}

impl SweepRunner {
    pub fn new(db: Db, translator: Arc<Translator>) -> Self {
        Self {
            db,
            translator,
            running: Default::default(),
        }
    }

    pub async fn run(&self, kind: SweepKind, now: DateTime<Utc>) -> SweepOutcome {
        let flag = &self.running[kind.index()];
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(sweep = kind.name(), "Previous run still in progress, skipping");
            return SweepOutcome::Skipped;
        }
        let _guard = RunGuard(flag);

        let today = now.date_naive();
        let report = match kind {
            SweepKind::InvoiceOverdue => self.invoice_overdue(today).await,
            SweepKind::TaskOverdue => self.task_overdue(today).await,
            SweepKind::TaskDueToday => self.task_due_today(today).await,
            SweepKind::TrialExpiry => self.trial_expiry(now).await,
        };

        info!(
            sweep = kind.name(),
            scanned = report.scanned,
            flipped = report.flipped,
            notified = report.notified,
            failed = report.failed,
            "Sweep finished"
        );
        SweepOutcome::Completed(report)
    }

    /// Run `kind` every `period` until the runtime shuts down. The first run
    /// happens immediately.
    pub fn spawn_schedule(self: &Arc<Self>, kind: SweepKind, period: Duration) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                runner.run(kind, Utc::now()).await;
            }
        })
    }

    /// Run `kind` once a day at `at` (UTC), first at the next occurrence.
    pub fn spawn_daily(self: &Arc<Self>, kind: SweepKind, at: NaiveTime) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = next_daily_run(now, at);
                debug!(sweep = kind.name(), next = %next, "Next daily sweep");
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(wait).await;
                runner.run(kind, Utc::now()).await;
            }
        })
    }

    async fn invoice_overdue(&self, today: NaiveDate) -> SweepReport {
        let candidates = self.db.lock().await.overdue_invoice_candidates(today);
        self.sweep(
            SweepKind::InvoiceOverdue,
            candidates,
            |invoice: &Invoice| (invoice.id.clone(), invoice_overdue_event(invoice)),
            |db, id| db.flag_invoice_overdue(id),
        )
        .await
    }

    async fn task_overdue(&self, today: NaiveDate) -> SweepReport {
        let candidates = self.db.lock().await.overdue_task_candidates(today);
        self.sweep(
            SweepKind::TaskOverdue,
            candidates,
            |task: &Task| (task.id.clone(), task_event(task, Action::Overdue)),
            |db, id| db.flag_task_overdue(id),
        )
        .await
    }

    async fn task_due_today(&self, today: NaiveDate) -> SweepReport {
        let candidates = self.db.lock().await.tasks_due_on(today);
        self.sweep(
            SweepKind::TaskDueToday,
            candidates,
            |task: &Task| (task.id.clone(), task_event(task, Action::DueDateAlert)),
            |db, id| db.mark_due_alert_sent(id),
        )
        .await
    }

    async fn trial_expiry(&self, now: DateTime<Utc>) -> SweepReport {
        let candidates = self.db.lock().await.expired_trials(now);
        self.sweep(
            SweepKind::TrialExpiry,
            candidates,
            |user: &User| (user.id.to_string(), trial_expired_event(user)),
            |db, id| db.expire_trial(&UserId::from(id)),
        )
        .await
    }

    /// Flip each candidate, then dispatch for the ones this run flipped.
    async fn sweep<T>(
        &self,
        kind: SweepKind,
        candidates: hub_store::Result<Vec<T>>,
        describe: impl Fn(&T) -> (String, DomainEvent),
        flip: impl Fn(&hub_store::Database, &str) -> hub_store::Result<bool>,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let candidates = match candidates {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(sweep = kind.name(), error = %e, "Failed to load candidates");
                report.failed = 1;
                return report;
            }
        };
        report.scanned = candidates.len();

        for candidate in &candidates {
            let (id, event) = describe(candidate);
            let flipped = {
                let db = self.db.lock().await;
                flip(&db, &id)
            };
            match flipped {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(sweep = kind.name(), id = %id, error = %e, "Failed to flip entity");
                    report.failed += 1;
                    continue;
                }
            }
            report.flipped += 1;
            report.notified += self.translator.dispatch(&event).await;
        }
        report
    }
}

fn invoice_overdue_event(invoice: &Invoice) -> DomainEvent {
    let mut event = DomainEvent::new(Module::Invoice, Action::Overdue, &invoice.id)
        .field("invoice_number", &invoice.invoice_number)
        .field("due_date", invoice.due_date.to_string());
    event.participants.client = Some(invoice.client_id.clone());
    event.participants.agency = Some(invoice.agency_id.clone());
    event
}

fn task_event(task: &Task, action: Action) -> DomainEvent {
    let mut event = DomainEvent::new(Module::Task, action, &task.id)
        .field("title", &task.title)
        .field("due_date", task.due_date.to_string());
    let p = &mut event.participants;
    p.assign_by = Some(task.assign_by.clone());
    p.assign_to = vec![task.assign_to.clone()];
    p.client = task.client_id.clone();
    p.agency = task.agency_id.clone();
    p.watchers = task.watchers.clone();
    event
}

fn trial_expired_event(user: &User) -> DomainEvent {
    let mut event = DomainEvent::new(Module::General, Action::Expire, user.id.as_str())
        .field("first_name", &user.first_name);
    if let Some(ends) = user.trial_ends_at {
        event = event.field("trial_ends_at", ends.to_rfc3339());
    }
    event.participants.owner = Some(user.id.clone());
    event
}

/// The first instant strictly after `now` whose UTC wall time is `at`.
pub fn next_daily_run(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}
