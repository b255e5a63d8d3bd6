//! API data transfer objects.
//!
//! These types define the API contract shared between the server and
//! clients. The sequencer publishes [`SequenceStatus`] directly on its
//! watch channel.

use chrono::{DateTime, Local, Weekday};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::alarm::AlarmId;
use crate::planner::{FireInstant, FireOrigin};

/// Phase of the trigger sequence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Idle,
    PresenceCheck,
    AvailabilityCheck,
    MediaStart,
    VolumeRamp,
    BriefingWait,
    Briefing,
    Completed,
    Skipped,
    Failed,
    Dismissed,
    Snoozed,
}

impl Phase {
    /// A wake-up sequence is executing (media may be playing).
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Phase::PresenceCheck
                | Phase::AvailabilityCheck
                | Phase::MediaStart
                | Phase::VolumeRamp
                | Phase::BriefingWait
                | Phase::Briefing
        )
    }

    /// End of one alarm cycle; the sequencer reverts to idle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::Completed | Phase::Skipped | Phase::Failed | Phase::Dismissed
        )
    }
}

/// How the most recent alarm cycle ended.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct Outcome {
    pub alarm_id: AlarmId,
    pub phase: Phase,
    pub at: DateTime<Local>,
}

/// Snapshot of the trigger sequencer.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct SequenceStatus {
    pub phase: Phase,
    /// Alarm whose sequence is running.
    pub active_alarm_id: Option<AlarmId>,
    /// Alarm waiting for its snooze to end.
    pub snoozed_alarm_id: Option<AlarmId>,
    pub snooze_resume_at: Option<DateTime<Local>>,
    /// Index of the last volume level applied.
    pub ramp_step: Option<usize>,
    pub last_outcome: Option<Outcome>,
}

impl Default for SequenceStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            active_alarm_id: None,
            snoozed_alarm_id: None,
            snooze_resume_at: None,
            ramp_step: None,
            last_outcome: None,
        }
    }
}

/// An upcoming fire instant.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, ToSchema)]
pub struct ScheduledFire {
    pub alarm_id: AlarmId,
    pub at: DateTime<Local>,
    /// Weekday name for recurring slots, absent for snooze resumes.
    pub weekday: Option<String>,
    pub snooze: bool,
}

impl From<&FireInstant> for ScheduledFire {
    fn from(instant: &FireInstant) -> Self {
        let weekday = match instant.origin {
            FireOrigin::Recurring { day, .. } => Some(weekday_name(day).to_string()),
            FireOrigin::Snooze => None,
        };
        Self {
            alarm_id: instant.alarm_id,
            at: instant.at,
            weekday,
            snooze: instant.is_snooze(),
        }
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Full service status: sequencer plus the next few fire instants.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct ServiceStatus {
    pub sequence: SequenceStatus,
    pub next_alarms: Vec<ScheduledFire>,
}

/// Health check response.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct Health {
    pub status: String,
    /// "UP" when the hub answers its availability probe, "DOWN" otherwise.
    pub hub: String,
    pub timestamp: DateTime<Local>,
}

/// Body of a snooze request.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct SnoozeRequest {
    /// Defaults to 5 minutes.
    pub minutes: Option<u32>,
}

/// Result of a schedule rebuild.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct RebuildResult {
    pub scheduled: usize,
}
