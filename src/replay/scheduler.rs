//! Replay Scheduler
//!
//! Drives paced, sequential transmission of a dataset through a
//! [`ConnectionManager`]. One row per step; the cursor only advances after
//! a row actually left; the run stops by itself once the last row is sent.
//! Delivery is best-effort: a step taken while the link is down is
//! consumed without advancing and is not retried.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::cursor::ReplayCursor;
use super::timer::PacingTimer;
use crate::connection::{ConnectionManager, SendOutcome, Transport};
use crate::dataset::Dataset;
use crate::models::SensorSchema;
use crate::normalize::normalize_with_report;

/// Default replay cadence.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Running,
}

/// Result of one send step (manual or timer driven).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Row sent, cursor moved to the next row.
    Sent { row: usize },
    /// Last row sent; the run was stopped.
    Finished { row: usize },
    NotConnected { row: usize },
    SendFailed { row: usize },
    EmptyDataset,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// First row handled and the pacing timer armed.
    Started,
    /// The only remaining row was sent by the first step; nothing to arm.
    FinishedImmediately,
    AlreadyRunning,
    EmptyDataset,
    Exhausted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub rows_sent: u64,
    pub ticks: u64,
    pub skipped_not_connected: u64,
    pub skipped_empty: u64,
    pub skipped_exhausted: u64,
    pub send_failures: u64,
    pub defaulted_fields: u64,
    pub runs_started: u64,
}

pub struct ReplayScheduler {
    dataset: Dataset,
    schema: SensorSchema,
    cursor: ReplayCursor,
    timer: PacingTimer,
    state: RunState,
    stats: ReplayStats,
}

impl ReplayScheduler {
    pub fn new(dataset: Dataset, schema: SensorSchema, interval: Duration) -> Self {
        let cursor = ReplayCursor::new(dataset.len());
        Self {
            dataset,
            schema,
            cursor,
            timer: PacingTimer::new(interval),
            state: RunState::Idle,
            stats: ReplayStats::default(),
        }
    }

    pub fn run_state(&self) -> RunState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn interval(&self) -> Duration {
        self.timer.period()
    }

    pub fn cursor(&self) -> ReplayCursor {
        self.cursor
    }

    /// (1-based current row, total rows).
    pub fn position(&self) -> (usize, usize) {
        (self.cursor.position(), self.cursor.len())
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn schema(&self) -> &SensorSchema {
        &self.schema
    }

    pub fn stats(&self) -> &ReplayStats {
        &self.stats
    }

    /// Begin auto-sending. Idempotent while running. Sends the current row
    /// immediately, then arms the pacing timer.
    pub fn start_auto_sending<T: Transport>(&mut self, conn: &mut ConnectionManager<T>) -> StartOutcome {
        if self.state == RunState::Running {
            debug!("auto-send already running");
            return StartOutcome::AlreadyRunning;
        }
        if self.dataset.is_empty() {
            self.stats.skipped_empty += 1;
            warn!("auto-send not started: dataset is empty");
            return StartOutcome::EmptyDataset;
        }
        if self.cursor.is_exhausted() {
            self.stats.skipped_exhausted += 1;
            warn!(rows = self.cursor.len(), "auto-send not started: replay already finished, restart first");
            return StartOutcome::Exhausted;
        }

        self.state = RunState::Running;
        self.stats.runs_started += 1;
        info!(
            row = self.cursor.position(),
            total = self.cursor.len(),
            interval_ms = self.timer.period().as_millis() as u64,
            "▶️ Auto-send started"
        );

        self.send_sensor_data(conn);

        // The first step may already have finished the dataset.
        if self.state == RunState::Running {
            self.timer.arm();
            StartOutcome::Started
        } else {
            StartOutcome::FinishedImmediately
        }
    }

    /// Stop auto-sending. Idempotent; returns false if already idle.
    pub fn stop_auto_sending(&mut self) -> bool {
        self.timer.disarm();
        if self.state == RunState::Idle {
            return false;
        }
        self.state = RunState::Idle;
        info!(
            row = self.cursor.position(),
            total = self.cursor.len(),
            "⏹️ Auto-send stopped"
        );
        true
    }

    /// Stop and rewind to the first row.
    pub fn restart(&mut self) {
        self.stop_auto_sending();
        self.cursor.reset();
        info!(total = self.cursor.len(), "Replay rewound");
    }

    /// Wait for the next pacing tick. Pending forever while idle.
    pub async fn next_tick(&mut self) {
        self.timer.tick().await;
    }

    /// Timer-driven step.
    pub fn on_tick<T: Transport>(&mut self, conn: &mut ConnectionManager<T>) -> TickOutcome {
        self.stats.ticks += 1;
        self.send_sensor_data(conn)
    }

    /// Send the row under the cursor. Also used for manual single steps.
    pub fn send_sensor_data<T: Transport>(&mut self, conn: &mut ConnectionManager<T>) -> TickOutcome {
        if self.dataset.is_empty() {
            self.stats.skipped_empty += 1;
            warn!("send skipped: dataset is empty");
            return TickOutcome::EmptyDataset;
        }
        if self.cursor.is_exhausted() {
            self.stats.skipped_exhausted += 1;
            warn!(rows = self.cursor.len(), "send skipped: all rows already sent");
            self.stop_auto_sending();
            return TickOutcome::Exhausted;
        }

        let row = self.cursor.index();
        let Some(record) = self.dataset.get(row) else {
            // Cursor and dataset length are fixed together at construction.
            self.stop_auto_sending();
            return TickOutcome::Exhausted;
        };

        let (reading, report) = normalize_with_report(record, &self.schema);
        if !report.is_clean() {
            self.stats.defaulted_fields += report.defaulted.len() as u64;
            debug!(row, defaulted = report.defaulted.len(), "row had missing or invalid fields");
        }

        let frame = match reading.to_json() {
            Ok(f) => f,
            Err(e) => {
                self.stats.send_failures += 1;
                warn!(row, error = %e, "failed to encode reading");
                return TickOutcome::SendFailed { row };
            }
        };

        match conn.send(frame) {
            SendOutcome::Sent => {
                self.stats.rows_sent += 1;
                debug!(row = row + 1, total = self.cursor.len(), "row sent");
                if self.cursor.advance() {
                    TickOutcome::Sent { row }
                } else {
                    info!(rows = self.cursor.len(), "🏁 Dataset exhausted");
                    self.stop_auto_sending();
                    TickOutcome::Finished { row }
                }
            }
            SendOutcome::NotConnected(state) => {
                self.stats.skipped_not_connected += 1;
                debug!(row, %state, "row not sent, cursor held");
                TickOutcome::NotConnected { row }
            }
            SendOutcome::Failed(_) => {
                self.stats.send_failures += 1;
                TickOutcome::SendFailed { row }
            }
        }
    }
}

impl Drop for ReplayScheduler {
    fn drop(&mut self) {
        self.stop_auto_sending();
    }
}
