//! The scheduler owns the plan of upcoming fire instants and hands each
//! due alarm to the trigger sequencer.
//!
//! It runs as a single task. Other components talk to it through a
//! [`SchedulerHandle`]: rebuilding after the alarm set changes, and
//! adding or cancelling snooze resumes. Every change to the plan is
//! published on a watch channel for status reporting.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::alarm::AlarmId;
use crate::planner::{self, FireInstant};
use crate::sequencer::DispatchError;
use crate::store::AlarmStore;
use crate::tracing::prelude::*;

const TICK_DURATION: Duration = Duration::from_secs(1);

/// Instants observed later than this (suspend, clock jump) are not fired.
const LATE_FIRE_GRACE: Duration = Duration::from_secs(10 * 60);

const COMMAND_CHANNEL_SIZE: usize = 16;

/// Where due alarms go.
pub trait Dispatch: Send + Sync {
    /// Start the wake-up sequence of `alarm_id` without waiting for it.
    fn dispatch(&self, alarm_id: AlarmId) -> Result<(), DispatchError>;

    /// The snooze resume of `alarm_id` will never fire.
    fn abandon_snooze(&self, alarm_id: AlarmId);
}

/// Commands sent to the scheduler task. Each carries a channel for the
/// reply.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Re-plan recurring instants from the store. Replies with the
    /// number of instants scheduled.
    Rebuild { reply: oneshot::Sender<usize> },
    /// Resume `alarm_id` at `at`, replacing any earlier snooze of it.
    ScheduleSnooze {
        alarm_id: AlarmId,
        at: DateTime<Local>,
        reply: oneshot::Sender<()>,
    },
    /// Drop the snooze resume of `alarm_id` due at `at`. A resume since
    /// moved to another time stays. Replies whether one was dropped.
    CancelSnooze {
        alarm_id: AlarmId,
        at: DateTime<Local>,
        reply: oneshot::Sender<bool>,
    },
}

#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("scheduler is not running")]
pub struct SchedulerStopped;

/// The scheduler's ends of the channels created by
/// [`SchedulerHandle::channel`].
pub struct Mailbox {
    command_rx: mpsc::Receiver<SchedulerCommand>,
    upcoming_tx: watch::Sender<Vec<FireInstant>>,
    running: CancellationToken,
}

#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    upcoming_rx: watch::Receiver<Vec<FireInstant>>,
    running: CancellationToken,
}

impl SchedulerHandle {
    /// Create the handle before the scheduler itself, so components the
    /// scheduler depends on can hold one. The scheduler stops when
    /// `running` is cancelled.
    pub fn channel(running: CancellationToken) -> (Self, Mailbox) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (upcoming_tx, upcoming_rx) = watch::channel(Vec::new());
        (
            Self {
                command_tx,
                upcoming_rx,
                running: running.clone(),
            },
            Mailbox {
                command_rx,
                upcoming_tx,
                running,
            },
        )
    }

    pub async fn rebuild(&self) -> Result<usize, SchedulerStopped> {
        self.request(|reply| SchedulerCommand::Rebuild { reply })
            .await
    }

    pub async fn schedule_snooze(
        &self,
        alarm_id: AlarmId,
        at: DateTime<Local>,
    ) -> Result<(), SchedulerStopped> {
        self.request(|reply| SchedulerCommand::ScheduleSnooze {
            alarm_id,
            at,
            reply,
        })
        .await
    }

    pub async fn cancel_snooze(
        &self,
        alarm_id: AlarmId,
        at: DateTime<Local>,
    ) -> Result<bool, SchedulerStopped> {
        self.request(|reply| SchedulerCommand::CancelSnooze {
            alarm_id,
            at,
            reply,
        })
        .await
    }

    /// The current plan, soonest first.
    pub fn upcoming(&self) -> Vec<FireInstant> {
        self.upcoming_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<FireInstant>> {
        self.upcoming_rx.clone()
    }

    /// Stop firing. Sequences already running are not affected.
    pub fn stop(&self) {
        self.running.cancel();
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
    ) -> Result<T, SchedulerStopped> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| SchedulerStopped)?;
        reply_rx.await.map_err(|_| SchedulerStopped)
    }
}

pub struct Scheduler {
    store: Arc<AlarmStore>,
    dispatcher: Arc<dyn Dispatch>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    upcoming_tx: watch::Sender<Vec<FireInstant>>,
    running: CancellationToken,
    tick_duration: Duration,
    instants: Vec<FireInstant>,
}

impl Scheduler {
    pub fn new(mailbox: Mailbox, store: Arc<AlarmStore>, dispatcher: Arc<dyn Dispatch>) -> Self {
        Self {
            store,
            dispatcher,
            command_rx: mailbox.command_rx,
            upcoming_tx: mailbox.upcoming_tx,
            running: mailbox.running,
            tick_duration: TICK_DURATION,
            instants: Vec::new(),
        }
    }

    pub async fn run(mut self) {
        trace!("Scheduler task started.");
        self.rebuild(Local::now());

        let mut interval = tokio::time::interval(self.tick_duration);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.running.cancelled() => {
                    info!("Scheduler shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    self.tick(Local::now());
                }
                Some(command) = self.command_rx.recv() => {
                    self.handle(command, Local::now());
                }
            }
        }

        trace!("Scheduler task stopped.");
    }

    pub fn instants(&self) -> &[FireInstant] {
        &self.instants
    }

    fn handle(&mut self, command: SchedulerCommand, now: DateTime<Local>) {
        match command {
            SchedulerCommand::Rebuild { reply } => {
                reply.send(self.rebuild(now)).ok();
            }
            SchedulerCommand::ScheduleSnooze {
                alarm_id,
                at,
                reply,
            } => {
                self.schedule_snooze(alarm_id, at);
                reply.send(()).ok();
            }
            SchedulerCommand::CancelSnooze {
                alarm_id,
                at,
                reply,
            } => {
                reply.send(self.cancel_snooze(alarm_id, at)).ok();
            }
        }
    }

    /// Fire every instant at or before `now` and re-arm recurring ones a
    /// week later. A snooze resume that cannot fire is abandoned.
    fn tick(&mut self, now: DateTime<Local>) {
        let due_count = self.instants.partition_point(|instant| instant.at <= now);
        if due_count == 0 {
            return;
        }
        let due: Vec<FireInstant> = self.instants.drain(..due_count).collect();

        for instant in due {
            let late = (now - instant.at).to_std().unwrap_or_default();
            let fired = if late > LATE_FIRE_GRACE {
                warn!(
                    alarm_id = %instant.alarm_id,
                    scheduled = %instant.at,
                    late_secs = late.as_secs(),
                    "Missed fire instant, not firing"
                );
                false
            } else {
                match self.dispatcher.dispatch(instant.alarm_id) {
                    Ok(()) => {
                        info!(
                            alarm_id = %instant.alarm_id,
                            snooze = instant.is_snooze(),
                            "Alarm fired"
                        );
                        true
                    }
                    Err(e) => {
                        warn!(alarm_id = %instant.alarm_id, error = %e, "Alarm dropped");
                        false
                    }
                }
            };

            if !fired && instant.is_snooze() {
                self.dispatcher.abandon_snooze(instant.alarm_id);
            }

            if let Some(next) = instant.rearm() {
                self.instants.push(next);
            }
        }

        planner::order(&mut self.instants);
        self.publish();
    }

    /// Replace recurring instants with a fresh plan. Pending snooze
    /// resumes of alarms that still exist are kept, the others abandoned.
    fn rebuild(&mut self, now: DateTime<Local>) -> usize {
        let mut instants = planner::plan(&self.store.list_enabled(), &now);
        for instant in self.instants.drain(..).filter(FireInstant::is_snooze) {
            if self.store.get(instant.alarm_id).is_some() {
                instants.push(instant);
            } else {
                debug!(alarm_id = %instant.alarm_id, "Alarm gone, snooze resume dropped");
                self.dispatcher.abandon_snooze(instant.alarm_id);
            }
        }
        planner::order(&mut instants);
        self.instants = instants;

        info!(count = self.instants.len(), "Schedule rebuilt");
        self.publish();
        self.instants.len()
    }

    fn schedule_snooze(&mut self, alarm_id: AlarmId, at: DateTime<Local>) {
        self.instants
            .retain(|instant| !(instant.is_snooze() && instant.alarm_id == alarm_id));
        self.instants.push(FireInstant::snooze(alarm_id, at));
        planner::order(&mut self.instants);

        debug!(alarm_id = %alarm_id, resume_at = %at, "Snooze resume scheduled");
        self.publish();
    }

    fn cancel_snooze(&mut self, alarm_id: AlarmId, at: DateTime<Local>) -> bool {
        let before = self.instants.len();
        self.instants.retain(|instant| {
            !(instant.is_snooze() && instant.alarm_id == alarm_id && instant.at == at)
        });
        let cancelled = self.instants.len() != before;
        if cancelled {
            debug!(alarm_id = %alarm_id, "Snooze resume cancelled");
            self.publish();
        }
        cancelled
    }

    fn publish(&self) {
        self.upcoming_tx.send_replace(self.instants.clone());
    }
}
