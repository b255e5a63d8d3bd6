//! Status reporter: a read-only view over the sequencer and scheduler.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api_client::types::{ScheduledFire, SequenceStatus, ServiceStatus};
use crate::planner::FireInstant;
use crate::scheduler::SchedulerHandle;
use crate::sequencer::Sequencer;
use crate::tracing::prelude::*;

/// Upcoming instants included in a status snapshot.
pub const NEXT_ALARMS: usize = 5;

#[derive(Clone)]
pub struct StatusReporter {
    sequence_rx: watch::Receiver<SequenceStatus>,
    upcoming_rx: watch::Receiver<Vec<FireInstant>>,
}

impl StatusReporter {
    pub fn new(sequencer: &Sequencer, scheduler: &SchedulerHandle) -> Self {
        Self {
            sequence_rx: sequencer.subscribe(),
            upcoming_rx: scheduler.subscribe(),
        }
    }

    pub fn snapshot(&self) -> ServiceStatus {
        ServiceStatus {
            sequence: self.sequence_rx.borrow().clone(),
            next_alarms: self.schedule(NEXT_ALARMS),
        }
    }

    /// The first `limit` upcoming fire instants.
    pub fn schedule(&self, limit: usize) -> Vec<ScheduledFire> {
        self.upcoming_rx
            .borrow()
            .iter()
            .take(limit)
            .map(ScheduledFire::from)
            .collect()
    }

    /// Log the next fire instant whenever the plan changes.
    pub async fn run(mut self, running: CancellationToken) {
        loop {
            tokio::select! {
                _ = running.cancelled() => break,
                changed = self.upcoming_rx.changed() => {
                    if changed.is_err() {
                        debug!("Scheduler gone, status reporter stopping");
                        break;
                    }
                    match self.upcoming_rx.borrow_and_update().first() {
                        Some(next) => info!(
                            alarm_id = %next.alarm_id,
                            at = %next.at,
                            snooze = next.is_snooze(),
                            "Next alarm"
                        ),
                        None => info!("No alarms scheduled"),
                    }
                }
            }
        }
    }
}
