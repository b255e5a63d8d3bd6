//! Trigger sequencer.
//!
//! Runs the wake-up sequence of one alarm at a time: presence check,
//! hub availability check, media start at the first volume level, a
//! stepped volume ramp, a pause, then a spoken morning briefing. Each
//! accepted dispatch runs as its own task so the caller never waits for
//! the sequence; snooze and dismiss cancel it at its next await point.
//!
//! The phase is published on a watch channel. See [`state`] for the
//! transitions.

mod state;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{Local, TimeDelta};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub use state::DispatchError;
use state::{SequenceState, Started};

use crate::alarm::{AlarmDefinition, AlarmId};
use crate::api_client::types::{Phase, SequenceStatus};
use crate::config::Config;
use crate::hub::Hub;
use crate::notify::{Notification, Notifier, Priority};
use crate::scheduler::{Dispatch, SchedulerHandle};
use crate::store::AlarmStore;
use crate::tracing::prelude::*;

pub const DEFAULT_SNOOZE_MINUTES: u32 = 5;

/// How a cycle task ended.
#[derive(Debug, Clone, Copy, PartialEq)]
enum CycleEnd {
    Finished(Phase),
    /// Snoozed or dismissed; the state has already moved on.
    Interrupted,
}

#[derive(Clone)]
pub struct Sequencer {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<SequenceState>,
    status_tx: watch::Sender<SequenceStatus>,
    store: Arc<AlarmStore>,
    hub: Arc<dyn Hub>,
    notifier: Arc<dyn Notifier>,
    scheduler: SchedulerHandle,
    briefing_wait: Duration,
}

impl Sequencer {
    pub fn new(
        store: Arc<AlarmStore>,
        hub: Arc<dyn Hub>,
        notifier: Arc<dyn Notifier>,
        scheduler: SchedulerHandle,
        briefing_wait: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(SequenceStatus::default());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SequenceState::default()),
                status_tx,
                store,
                hub,
                notifier,
                scheduler,
                briefing_wait,
            }),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<AlarmStore>,
        hub: Arc<dyn Hub>,
        notifier: Arc<dyn Notifier>,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self::new(store, hub, notifier, scheduler, config.briefing_wait())
    }

    pub fn status(&self) -> SequenceStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SequenceStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Start the wake-up sequence of `alarm_id` in the background.
    ///
    /// Accepted only while idle, or while that same alarm is snoozed.
    pub fn dispatch(&self, alarm_id: AlarmId) -> Result<(), DispatchError> {
        let alarm = self
            .inner
            .store
            .get(alarm_id)
            .ok_or(DispatchError::NotFound(alarm_id))?;
        let started = self.update(|state| state.begin(alarm_id))?;

        info!(
            alarm_id = %alarm_id,
            name = %alarm.name,
            generation = started.generation,
            resumed = started.resumed.is_some(),
            "Alarm sequence started"
        );
        tokio::spawn(self.clone().supervise(alarm, started));
        Ok(())
    }

    /// Stop playback and resume the running alarm in `minutes`. Returns
    /// false if no sequence is running.
    pub async fn snooze(&self, minutes: u32) -> bool {
        let minutes = minutes.max(1);
        let resume_at = Local::now() + TimeDelta::minutes(minutes.into());
        let Some(interrupted) = self.update(|state| state.snooze(resume_at)) else {
            warn!("No running alarm to snooze");
            return false;
        };
        let alarm_id = interrupted.alarm_id;
        info!(alarm_id = %alarm_id, minutes, resume_at = %resume_at, "Alarm snoozed");

        if interrupted.media_playing {
            self.stop_media().await;
        }
        if let Err(e) = self
            .inner
            .scheduler
            .schedule_snooze(alarm_id, resume_at)
            .await
        {
            error!(alarm_id = %alarm_id, error = %e, "Failed to schedule snooze resume");
            self.abandon_snooze(alarm_id);
            return true;
        }
        self.notify(Notification::new(
            "Alarm Snoozed",
            format!("Your alarm has been snoozed for {minutes} minutes."),
            Priority::LOW,
        ))
        .await;
        true
    }

    /// Stop the running or snoozed alarm. Returns false if there is
    /// neither.
    pub async fn dismiss(&self) -> bool {
        let Some(interrupted) = self.update(|state| state.dismiss(Local::now())) else {
            warn!("No active alarm to dismiss");
            return false;
        };
        let alarm_id = interrupted.alarm_id;
        info!(alarm_id = %alarm_id, "Alarm dismissed");

        if interrupted.media_playing {
            self.stop_media().await;
        }
        if let Some(at) = interrupted.pending_resume {
            match self.inner.scheduler.cancel_snooze(alarm_id, at).await {
                Ok(true) => debug!(alarm_id = %alarm_id, "Pending snooze resume dropped"),
                Ok(false) => {}
                Err(e) => {
                    warn!(alarm_id = %alarm_id, error = %e, "Failed to cancel snooze resume")
                }
            }
        }
        true
    }

    /// Leave Snoozed when the resume of `alarm_id` can no longer fire.
    pub fn abandon_snooze(&self, alarm_id: AlarmId) {
        if self.update(|state| state.abandon_snooze(alarm_id)) {
            warn!(alarm_id = %alarm_id, "Snooze resume lost, alarm abandoned");
        }
    }

    /// Apply `f` to the state under the lock and publish the result.
    fn update<T>(&self, f: impl FnOnce(&mut SequenceState) -> T) -> T {
        let mut state = self.inner.state.lock();
        let previous = state.phase();
        let result = f(&mut state);

        if state.phase() != previous {
            debug!(previous_phase = %previous, phase = %state.phase(), "Sequencer phase changed");
        }
        let snapshot = state.snapshot();
        self.inner.status_tx.send_if_modified(|status| {
            if *status == snapshot {
                return false;
            }
            *status = snapshot;
            true
        });
        result
    }

    fn advance(&self, generation: u64, phase: Phase) -> bool {
        self.update(|state| state.advance(generation, phase))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.state.lock().is_current(generation)
    }

    /// Run one cycle to its end. Errors and panics inside the cycle end
    /// it as Failed and never reach the caller of `dispatch`.
    async fn supervise(self, alarm: AlarmDefinition, started: Started) {
        let Started {
            generation,
            cancel,
            resumed,
        } = started;
        let alarm_id = alarm.id;
        let wake_time = alarm.time.format("%H:%M").to_string();

        if let Some(resume_at) = resumed {
            // Triggered by hand while snoozed; the scheduled resume is moot.
            if let Err(e) = self
                .inner
                .scheduler
                .cancel_snooze(alarm_id, resume_at)
                .await
            {
                warn!(alarm_id = %alarm_id, error = %e, "Failed to cancel snooze resume");
            }
        }

        let cycle = tokio::spawn({
            let this = self.clone();
            async move { this.run_cycle(generation, &cancel, &alarm).await }
        });

        let end = match cycle.await {
            Ok(Ok(end)) => end,
            Ok(Err(e)) => {
                self.report_error(generation, alarm_id, &wake_time, &format!("{e:#}"))
                    .await;
                CycleEnd::Finished(Phase::Failed)
            }
            Err(e) => {
                self.report_error(generation, alarm_id, &wake_time, &e.to_string())
                    .await;
                CycleEnd::Finished(Phase::Failed)
            }
        };

        if let CycleEnd::Finished(outcome) = end {
            if self.update(|state| state.finish(generation, outcome, Local::now())) {
                info!(alarm_id = %alarm_id, generation, outcome = %outcome, "Alarm sequence finished");
            }
        }
    }

    async fn report_error(&self, generation: u64, alarm_id: AlarmId, wake_time: &str, detail: &str) {
        error!(alarm_id = %alarm_id, error = detail, "Alarm sequence aborted");
        if !self.is_current(generation) {
            return;
        }
        self.notify(Notification::new(
            "Alarm Error",
            format!("Your {wake_time} alarm stopped because of an error: {detail}"),
            Priority::FAILURE,
        ))
        .await;
    }

    async fn run_cycle(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        alarm: &AlarmDefinition,
    ) -> anyhow::Result<CycleEnd> {
        let hub = &self.inner.hub;
        let alarm_id = alarm.id;
        let wake_time = alarm.time.format("%H:%M").to_string();

        if let Some(subject) = &alarm.presence_subject {
            let Some(home) = cancel.run_until_cancelled(hub.is_subject_home(subject)).await else {
                return Ok(CycleEnd::Interrupted);
            };
            match home {
                Ok(true) => debug!(alarm_id = %alarm_id, subject = %subject, "Subject is home"),
                Ok(false) => {
                    info!(alarm_id = %alarm_id, subject = %subject, "Subject not home, skipping alarm");
                    self.notify(Notification::new(
                        "Alarm Skipped",
                        format!("Your {wake_time} alarm was skipped because you're not home."),
                        Priority::LOW,
                    ))
                    .await;
                    return Ok(CycleEnd::Finished(Phase::Skipped));
                }
                Err(e) => {
                    warn!(alarm_id = %alarm_id, subject = %subject, error = %e, "Presence unknown, assuming home")
                }
            }
        }

        if !self.advance(generation, Phase::AvailabilityCheck) {
            return Ok(CycleEnd::Interrupted);
        }
        let Some(reachable) = cancel.run_until_cancelled(hub.is_reachable()).await else {
            return Ok(CycleEnd::Interrupted);
        };
        if !reachable {
            error!(alarm_id = %alarm_id, "Hub unavailable, alarm not triggered");
            self.notify(Notification::new(
                "Alarm Failed",
                format!("Your {wake_time} alarm couldn't be triggered because the hub is unavailable."),
                Priority::FAILURE,
            ))
            .await;
            return Ok(CycleEnd::Finished(Phase::Failed));
        }

        if !self.advance(generation, Phase::MediaStart) {
            return Ok(CycleEnd::Interrupted);
        }
        let (&initial, ramp) = alarm
            .volume_steps()
            .split_first()
            .context("alarm has no volume levels")?;
        let Some(result) = cancel.run_until_cancelled(hub.set_volume(initial)).await else {
            return Ok(CycleEnd::Interrupted);
        };
        result.context("setting initial volume")?;

        let Some(started) = cancel
            .run_until_cancelled(hub.start_media(&alarm.media_url, &alarm.media_kind))
            .await
        else {
            return Ok(CycleEnd::Interrupted);
        };
        let media_problem = match started {
            Ok(true) => None,
            Ok(false) => Some("the hub refused the request".to_string()),
            Err(e) => Some(e.to_string()),
        };
        match media_problem {
            None => info!(alarm_id = %alarm_id, media = %alarm.media_url, "Media started"),
            Some(problem) => {
                warn!(alarm_id = %alarm_id, problem = %problem, "Media did not start, continuing");
                self.notify(Notification::new(
                    "Alarm Issue",
                    format!("Your {wake_time} alarm started but its media couldn't be played: {problem}"),
                    Priority::ISSUE,
                ))
                .await;
            }
        }

        if !self.advance(generation, Phase::VolumeRamp) {
            return Ok(CycleEnd::Interrupted);
        }
        self.update(|state| state.set_ramp_step(generation, 0));

        let mut hub_lost = false;
        for (index, &level) in ramp.iter().enumerate() {
            let step = index + 1;
            if cancel
                .run_until_cancelled(tokio::time::sleep(alarm.step_delay()))
                .await
                .is_none()
            {
                return Ok(CycleEnd::Interrupted);
            }

            let Some(reachable) = cancel.run_until_cancelled(hub.is_reachable()).await else {
                return Ok(CycleEnd::Interrupted);
            };
            if !reachable {
                warn!(alarm_id = %alarm_id, step, "Hub lost during volume ramp, ramp stopped");
                hub_lost = true;
                break;
            }

            let Some(result) = cancel.run_until_cancelled(hub.set_volume(level)).await else {
                return Ok(CycleEnd::Interrupted);
            };
            if let Err(e) = result {
                warn!(alarm_id = %alarm_id, step, error = %e, "Volume step failed, ramp stopped");
                break;
            }
            if !self.update(|state| state.set_ramp_step(generation, step)) {
                return Ok(CycleEnd::Interrupted);
            }
            debug!(alarm_id = %alarm_id, step, level, "Volume raised");
        }

        if !self.advance(generation, Phase::BriefingWait) {
            return Ok(CycleEnd::Interrupted);
        }
        if cancel
            .run_until_cancelled(tokio::time::sleep(self.inner.briefing_wait))
            .await
            .is_none()
        {
            return Ok(CycleEnd::Interrupted);
        }

        if !self.advance(generation, Phase::Briefing) {
            return Ok(CycleEnd::Interrupted);
        }
        if hub_lost {
            info!(alarm_id = %alarm_id, "Skipping briefing, hub was lost");
            return Ok(CycleEnd::Finished(Phase::Completed));
        }
        let Some(reachable) = cancel.run_until_cancelled(hub.is_reachable()).await else {
            return Ok(CycleEnd::Interrupted);
        };
        if !reachable {
            warn!(alarm_id = %alarm_id, "Hub unavailable, skipping briefing");
            return Ok(CycleEnd::Finished(Phase::Completed));
        }

        let Some((weather, events)) = cancel
            .run_until_cancelled(async { tokio::join!(hub.weather_summary(), hub.today_events()) })
            .await
        else {
            return Ok(CycleEnd::Interrupted);
        };
        let briefing = format!("Good morning! {weather} {events}");
        let Some(result) = cancel.run_until_cancelled(hub.speak(&briefing)).await else {
            return Ok(CycleEnd::Interrupted);
        };
        match result {
            Ok(()) => info!(alarm_id = %alarm_id, "Briefing delivered"),
            Err(e) => warn!(alarm_id = %alarm_id, error = %e, "Briefing failed"),
        }

        Ok(CycleEnd::Finished(Phase::Completed))
    }

    async fn stop_media(&self) {
        if let Err(e) = self.inner.hub.stop_media().await {
            warn!(error = %e, "Failed to stop media");
        }
    }

    async fn notify(&self, notification: Notification) {
        if !self.inner.notifier.send(&notification).await {
            debug!(title = %notification.title, "Notification not delivered");
        }
    }
}

impl Dispatch for Sequencer {
    fn dispatch(&self, alarm_id: AlarmId) -> Result<(), DispatchError> {
        Sequencer::dispatch(self, alarm_id)
    }

    fn abandon_snooze(&self, alarm_id: AlarmId) {
        Sequencer::abandon_snooze(self, alarm_id)
    }
}
