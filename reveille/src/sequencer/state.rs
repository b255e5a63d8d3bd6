//! Sequencer state machine.
//!
//! ```text
//!  Idle ── dispatch ──> PresenceCheck ─> AvailabilityCheck ─> MediaStart
//!   ^                        │                  │                 │
//!   │                     Skipped             Failed              v
//!   │                                                        VolumeRamp
//!   │                                                             │
//!   │      Completed <── Briefing <── BriefingWait <──────────────┘
//!   │
//!   └── every terminal phase reverts to Idle
//!
//!  any running phase ── snooze ──> Snoozed ── resume ──> PresenceCheck
//!  any running phase or Snoozed ── dismiss ──> Dismissed ─> Idle
//!  Snoozed ── resume abandoned ──> Idle
//! ```
//!
//! Each accepted dispatch starts a new generation. Transitions requested
//! by a cycle carry the generation it was started with and are ignored
//! once the cycle has been snoozed, dismissed or superseded.

use chrono::{DateTime, Local};
use tokio_util::sync::CancellationToken;

use crate::alarm::AlarmId;
use crate::api_client::types::{Outcome, Phase, SequenceStatus};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("alarm {requested} rejected: sequencer busy ({phase})")]
    Busy {
        requested: AlarmId,
        active: Option<AlarmId>,
        phase: Phase,
    },

    #[error("alarm {0} not found")]
    NotFound(AlarmId),
}

/// Handed to a newly started cycle.
#[derive(Debug)]
pub(super) struct Started {
    pub generation: u64,
    pub cancel: CancellationToken,
    /// The alarm was snoozed and is being resumed; the resume instant it
    /// replaces.
    pub resumed: Option<DateTime<Local>>,
}

/// Side effects of a snooze or dismiss the caller must carry out after
/// releasing the lock.
#[derive(Debug)]
pub(super) struct Interrupted {
    pub alarm_id: AlarmId,
    /// Media is still playing and must be stopped.
    pub media_playing: bool,
    /// Snooze resume the cycle was waiting for, now void.
    pub pending_resume: Option<DateTime<Local>>,
}

#[derive(Debug)]
pub(super) struct SequenceState {
    phase: Phase,
    generation: u64,
    active: Option<AlarmId>,
    snoozed: Option<(AlarmId, DateTime<Local>)>,
    ramp_step: Option<usize>,
    cancel: Option<CancellationToken>,
    last_outcome: Option<Outcome>,
}

impl Default for SequenceState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            generation: 0,
            active: None,
            snoozed: None,
            ramp_step: None,
            cancel: None,
            last_outcome: None,
        }
    }
}

impl SequenceState {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn snapshot(&self) -> SequenceStatus {
        SequenceStatus {
            phase: self.phase,
            active_alarm_id: self.active,
            snoozed_alarm_id: self.snoozed.map(|(id, _)| id),
            snooze_resume_at: self.snoozed.map(|(_, at)| at),
            ramp_step: self.ramp_step,
            last_outcome: self.last_outcome.clone(),
        }
    }

    /// Accept `alarm_id` from Idle, or from Snoozed when it is the alarm
    /// being snoozed.
    pub fn begin(&mut self, alarm_id: AlarmId) -> Result<Started, DispatchError> {
        let resumed = match (self.phase, self.snoozed) {
            (Phase::Idle, _) => None,
            (Phase::Snoozed, Some((snoozed, at))) if snoozed == alarm_id => Some(at),
            (phase, snoozed) => {
                return Err(DispatchError::Busy {
                    requested: alarm_id,
                    active: self.active.or(snoozed.map(|(id, _)| id)),
                    phase,
                });
            }
        };

        let cancel = CancellationToken::new();
        self.generation += 1;
        self.phase = Phase::PresenceCheck;
        self.active = Some(alarm_id);
        self.snoozed = None;
        self.ramp_step = None;
        self.cancel = Some(cancel.clone());

        Ok(Started {
            generation: self.generation,
            cancel,
            resumed,
        })
    }

    /// Whether the cycle of `generation` still owns the sequencer.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.phase.is_running()
    }

    /// Move a running cycle to its next phase.
    pub fn advance(&mut self, generation: u64, phase: Phase) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.phase = phase;
        true
    }

    pub fn set_ramp_step(&mut self, generation: u64, step: usize) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.ramp_step = Some(step);
        true
    }

    /// End a running cycle with a terminal `outcome` and revert to Idle.
    pub fn finish(&mut self, generation: u64, outcome: Phase, at: DateTime<Local>) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        let alarm_id = self.active.take();
        self.phase = Phase::Idle;
        self.ramp_step = None;
        self.cancel = None;
        if let Some(alarm_id) = alarm_id {
            self.last_outcome = Some(Outcome {
                alarm_id,
                phase: outcome,
                at,
            });
        }
        true
    }

    /// Suspend the running cycle until `resume_at`.
    pub fn snooze(&mut self, resume_at: DateTime<Local>) -> Option<Interrupted> {
        if !self.phase.is_running() {
            return None;
        }
        let alarm_id = self.active.take()?;
        let media_playing = media_started(self.phase);
        self.phase = Phase::Snoozed;
        self.snoozed = Some((alarm_id, resume_at));
        self.ramp_step = None;
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }

        Some(Interrupted {
            alarm_id,
            media_playing,
            pending_resume: None,
        })
    }

    /// Stop the running or snoozed cycle for good.
    pub fn dismiss(&mut self, at: DateTime<Local>) -> Option<Interrupted> {
        let interrupted = match self.phase {
            phase if phase.is_running() => Interrupted {
                alarm_id: self.active.take()?,
                media_playing: media_started(phase),
                pending_resume: None,
            },
            Phase::Snoozed => {
                let (alarm_id, at) = self.snoozed.take()?;
                Interrupted {
                    alarm_id,
                    media_playing: false,
                    pending_resume: Some(at),
                }
            }
            _ => return None,
        };

        self.phase = Phase::Idle;
        self.snoozed = None;
        self.ramp_step = None;
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.last_outcome = Some(Outcome {
            alarm_id: interrupted.alarm_id,
            phase: Phase::Dismissed,
            at,
        });
        Some(interrupted)
    }

    /// Release the sequencer from a snooze of `alarm_id` whose resume will
    /// never fire. Returns false if that alarm is not the one snoozed.
    pub fn abandon_snooze(&mut self, alarm_id: AlarmId) -> bool {
        match self.snoozed {
            Some((snoozed, _)) if self.phase == Phase::Snoozed && snoozed == alarm_id => {
                self.phase = Phase::Idle;
                self.snoozed = None;
                true
            }
            _ => false,
        }
    }
}

/// Whether a cycle in `phase` may have started playback.
fn media_started(phase: Phase) -> bool {
    matches!(
        phase,
        Phase::MediaStart | Phase::VolumeRamp | Phase::BriefingWait | Phase::Briefing
    )
}
