//! Alarm definitions as stored and consumed by the scheduler.
//!
//! An [`AlarmDefinition`] is a plain value: the store owns the records,
//! the planner and sequencer only read them.

use std::{fmt, time::Duration};

use chrono::{NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Ramp used when an alarm has no volume levels of its own.
pub const DEFAULT_VOLUME_STEPS: [f32; 6] = [0.2, 0.3, 0.4, 0.5, 0.6, 0.7];

pub const DEFAULT_STEP_DELAY_SECS: u64 = 20;

pub const DEFAULT_MEDIA_KIND: &str = "music";

/// Stable alarm identifier, assigned by the store at creation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct AlarmId(pub u64);

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subset of the days of the week.
///
/// Serialized as a list of day numbers, 0 = Monday through 6 = Sunday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct WeekdaySet(u8);

const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

impl WeekdaySet {
    pub const EMPTY: Self = Self(0);
    pub const WEEKDAYS: Self = Self(0b0001_1111);
    pub const WEEKEND: Self = Self(0b0110_0000);
    pub const EVERY_DAY: Self = Self(0b0111_1111);

    pub fn single(day: Weekday) -> Self {
        Self(1 << day.num_days_from_monday())
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn remove(&mut self, day: Weekday) {
        self.0 &= !(1 << day.num_days_from_monday());
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Days in Monday-first order.
    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        ALL_DAYS.into_iter().filter(|day| self.contains(*day))
    }

    /// Short human description, e.g. "Weekdays" or "Monday, Thursday".
    pub fn describe(&self) -> String {
        match *self {
            Self::EMPTY => "No days selected".to_string(),
            Self::EVERY_DAY => "Every day".to_string(),
            Self::WEEKDAYS => "Weekdays".to_string(),
            Self::WEEKEND => "Weekends".to_string(),
            _ => self
                .iter()
                .map(day_name)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

fn day_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl TryFrom<Vec<u8>> for WeekdaySet {
    type Error = ValidationError;

    fn try_from(numbers: Vec<u8>) -> Result<Self, Self::Error> {
        numbers
            .into_iter()
            .map(|n| {
                ALL_DAYS
                    .get(n as usize)
                    .copied()
                    .ok_or(ValidationError::UnknownDay(n))
            })
            .collect()
    }
}

impl From<WeekdaySet> for Vec<u8> {
    fn from(set: WeekdaySet) -> Self {
        set.iter()
            .map(|day| day.num_days_from_monday() as u8)
            .collect()
    }
}

impl std::str::FromStr for WeekdaySet {
    type Err = ValidationError;

    /// Accepts comma-separated day names ("mon,wed", "Monday") or day
    /// numbers ("0,2"), plus the shorthands "weekdays", "weekends" and
    /// "daily".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekdays" => return Ok(Self::WEEKDAYS),
            "weekends" => return Ok(Self::WEEKEND),
            "daily" | "every day" => return Ok(Self::EVERY_DAY),
            _ => {}
        }

        let mut set = Self::EMPTY;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let day = match part.parse::<u8>() {
                Ok(n) => *ALL_DAYS
                    .get(n as usize)
                    .ok_or(ValidationError::UnknownDay(n))?,
                Err(_) => part
                    .parse::<Weekday>()
                    .map_err(|_| ValidationError::UnknownDayName(part.to_string()))?,
            };
            set.insert(day);
        }
        Ok(set)
    }
}

/// Reasons an alarm definition is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("name is required")]
    MissingName,

    #[error("media reference is required")]
    MissingMedia,

    #[error("at least one day must be selected")]
    NoDays,

    #[error("day number {0} is out of range (0 = Monday .. 6 = Sunday)")]
    UnknownDay(u8),

    #[error("unknown day name {0:?}")]
    UnknownDayName(String),

    #[error("volume level {0} is outside 0.0..=1.0")]
    VolumeOutOfRange(f32),

    #[error("volume step delay must be at least one second")]
    StepDelay,

    #[error("time must be HH:MM, got {0:?}")]
    Time(String),
}

/// A recurring wake-up alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AlarmDefinition {
    pub id: AlarmId,

    pub name: String,

    /// Local wake time, minute resolution.
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "07:00")]
    pub time: NaiveTime,

    #[schema(value_type = Vec<u8>)]
    pub days: WeekdaySet,

    #[serde(default = "always_true")]
    pub enabled: bool,

    /// URL or path handed to the media player.
    pub media_url: String,

    /// Media content type, e.g. "music" or "playlist".
    #[serde(default = "default_media_kind")]
    pub media_kind: String,

    /// Volume levels in 0.0..=1.0. The first is applied before playback
    /// starts, the rest one per ramp step.
    #[serde(default)]
    pub volume_steps: Vec<f32>,

    #[serde(default = "default_step_delay")]
    pub step_delay_secs: u64,

    /// Entity whose presence gates the alarm. `None` skips the check.
    #[serde(default)]
    pub presence_subject: Option<String>,
}

impl AlarmDefinition {
    /// Volume ramp with the default substituted for an empty sequence.
    pub fn volume_steps(&self) -> &[f32] {
        if self.volume_steps.is_empty() {
            &DEFAULT_VOLUME_STEPS
        } else {
            &self.volume_steps
        }
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_secs(self.step_delay_secs.max(1))
    }

    /// Check the invariants the sequencer relies on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.media_url.trim().is_empty() {
            return Err(ValidationError::MissingMedia);
        }
        if self.enabled && self.days.is_empty() {
            return Err(ValidationError::NoDays);
        }
        if let Some(level) = self
            .volume_steps
            .iter()
            .find(|level| !(0.0..=1.0).contains(*level))
        {
            return Err(ValidationError::VolumeOutOfRange(*level));
        }
        if self.step_delay_secs == 0 {
            return Err(ValidationError::StepDelay);
        }
        Ok(())
    }
}

/// Fields for a new alarm; the store assigns the identifier.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewAlarm {
    pub name: String,
    #[serde(with = "hhmm")]
    #[schema(value_type = String, example = "07:00")]
    pub time: NaiveTime,
    #[schema(value_type = Vec<u8>)]
    pub days: WeekdaySet,
    #[serde(default = "always_true")]
    pub enabled: bool,
    pub media_url: String,
    #[serde(default = "default_media_kind")]
    pub media_kind: String,
    #[serde(default)]
    pub volume_steps: Vec<f32>,
    #[serde(default = "default_step_delay")]
    pub step_delay_secs: u64,
    #[serde(default)]
    pub presence_subject: Option<String>,
}

impl NewAlarm {
    pub fn into_definition(self, id: AlarmId) -> AlarmDefinition {
        AlarmDefinition {
            id,
            name: self.name,
            time: self.time,
            days: self.days,
            enabled: self.enabled,
            media_url: self.media_url,
            media_kind: self.media_kind,
            volume_steps: self.volume_steps,
            step_delay_secs: self.step_delay_secs,
            presence_subject: self.presence_subject,
        }
    }
}

/// Partial update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AlarmPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hhmm::option")]
    #[schema(value_type = Option<String>, example = "06:45")]
    pub time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<u8>>)]
    pub days: Option<WeekdaySet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_steps: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_delay_secs: Option<u64>,
    /// An explicit `null` clears the presence subject.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    #[schema(value_type = Option<String>)]
    pub presence_subject: Option<Option<String>>,
}

impl AlarmPatch {
    pub fn enable(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn apply(self, alarm: &mut AlarmDefinition) {
        if let Some(name) = self.name {
            alarm.name = name;
        }
        if let Some(time) = self.time {
            alarm.time = time;
        }
        if let Some(days) = self.days {
            alarm.days = days;
        }
        if let Some(enabled) = self.enabled {
            alarm.enabled = enabled;
        }
        if let Some(media_url) = self.media_url {
            alarm.media_url = media_url;
        }
        if let Some(media_kind) = self.media_kind {
            alarm.media_kind = media_kind;
        }
        if let Some(volume_steps) = self.volume_steps {
            alarm.volume_steps = volume_steps;
        }
        if let Some(delay) = self.step_delay_secs {
            alarm.step_delay_secs = delay;
        }
        if let Some(subject) = self.presence_subject {
            alarm.presence_subject = subject;
        }
    }
}

/// Parse "HH:MM" into a time with zero seconds.
pub fn parse_time(s: &str) -> Result<NaiveTime, ValidationError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| ValidationError::Time(s.to_string()))
}

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`).
fn present_or_null<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

fn always_true() -> bool {
    true
}

fn default_media_kind() -> String {
    DEFAULT_MEDIA_KIND.to_string()
}

fn default_step_delay() -> u64 {
    DEFAULT_STEP_DELAY_SECS
}

/// Serde adapter storing wake times as "HH:MM".
mod hhmm {
    use super::*;
    use serde::{Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{:02}:{:02}", time.hour(), time.minute()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(d)?;
        parse_time(&s).map_err(D::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
            match time {
                Some(time) => super::serialize(time, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|s| parse_time(&s).map_err(D::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
pub(crate) fn sample(id: u64) -> AlarmDefinition {
    AlarmDefinition {
        id: AlarmId(id),
        name: format!("alarm {id}"),
        time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        days: WeekdaySet::WEEKDAYS,
        enabled: true,
        media_url: "wake.mp3".to_string(),
        media_kind: DEFAULT_MEDIA_KIND.to_string(),
        volume_steps: vec![0.2, 0.5],
        step_delay_secs: 1,
        presence_subject: None,
    }
}
