//! Scheduler for the learner cadence.
//!
//! Polls once a minute against a cron schedule and runs the learner when a
//! scheduled time has passed since the previous check. A scheduled time
//! missed while the machine slept still runs on wake, as long as it falls
//! inside the grace period.

use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::SharedDb;
use crate::error::PrismError;
use crate::learning;

/// Grace period for runs missed during sleep (12 hours)
const MISSED_RUN_GRACE_PERIOD_SECS: i64 = 43_200;

/// Time jump threshold to detect sleep/wake (5 minutes)
const TIME_JUMP_THRESHOLD_SECS: i64 = 300;

const POLL_INTERVAL_SECS: u64 = 60;

pub struct Scheduler {
    db: SharedDb,
    schedule: Schedule,
    last_check: Mutex<DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(db: SharedDb, expr: &str) -> Result<Self, PrismError> {
        Ok(Self {
            db,
            schedule: parse_cron(expr)?,
            last_check: Mutex::new(Utc::now()),
        })
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.schedule.upcoming(Utc).next()
    }

    /// The scheduled time that fell in `(last_check, now]`, if any, and
    /// whether it is still worth running.
    fn due_between(&self, last_check: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let due = self
            .schedule
            .after(&last_check)
            .take_while(|t| *t <= now)
            .last()?;
        if (now - due).num_seconds() > MISSED_RUN_GRACE_PERIOD_SECS {
            log::info!("Learner: skipping run scheduled at {} (outside grace period)", due);
            return None;
        }
        Some(due)
    }

    /// One poll: runs the learner if a scheduled time has come due.
    /// Returns whether it ran.
    pub fn tick(&self, now: DateTime<Utc>) -> bool {
        let last_check = std::mem::replace(&mut *self.last_check.lock(), now);
        let jump = (now - last_check).num_seconds();
        if jump > TIME_JUMP_THRESHOLD_SECS {
            log::info!("Learner: detected wake (time jumped {} seconds), checking missed runs", jump);
        }
        let Some(due) = self.due_between(last_check, now) else {
            return false;
        };
        log::info!("Learner: scheduled run for {}", due);
        match learning::run_analysis(&self.db.lock(), "scheduled") {
            Ok(_) => true,
            Err(e) => {
                log::error!("Learner: scheduled run failed: {}", e);
                false
            }
        }
    }

    pub fn start(self: std::sync::Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Some(next) = self.next_run() {
                log::info!("Learner: next scheduled run at {}", next);
            }
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)) => {}
                }
                self.tick(Utc::now());
            }
            log::info!("Learner: scheduler stopped");
        })
    }
}

/// Parse a cron expression. Five-field expressions get a leading seconds
/// field of `0`.
pub fn parse_cron(expr: &str) -> Result<Schedule, PrismError> {
    let expr = expr.trim();
    let full_expr = if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    };
    full_expr.parse::<Schedule>().map_err(|e| {
        PrismError::invalid(
            "learner.schedule",
            format!("Invalid cron expression '{}': {}", expr, e),
        )
    })
}
