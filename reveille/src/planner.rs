//! Recurrence planner.
//!
//! Maps alarm definitions to the concrete instants at which they fire
//! next. Pure functions: the scheduler owns the resulting plan and asks
//! for a new one whenever the alarm set changes.

use chrono::{
    DateTime, Datelike, Days, Local, LocalResult, NaiveDateTime, NaiveTime, TimeDelta, TimeZone,
    Weekday,
};

use crate::alarm::{AlarmDefinition, AlarmId};

/// Why an instant is in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOrigin {
    /// Weekly slot of an alarm: fires on `day` at local `time`.
    Recurring { day: Weekday, time: NaiveTime },
    /// One-shot resume of a snoozed alarm.
    Snooze,
}

/// A moment at which an alarm should begin its trigger sequence.
#[derive(Debug, Clone)]
pub struct FireInstant<Tz: TimeZone = Local> {
    pub alarm_id: AlarmId,
    pub at: DateTime<Tz>,
    pub origin: FireOrigin,
}

impl<Tz: TimeZone> FireInstant<Tz> {
    pub fn snooze(alarm_id: AlarmId, at: DateTime<Tz>) -> Self {
        Self {
            alarm_id,
            at,
            origin: FireOrigin::Snooze,
        }
    }

    pub fn is_snooze(&self) -> bool {
        self.origin == FireOrigin::Snooze
    }

    /// The same weekly slot one occurrence later. Snooze instants are
    /// one-shot and have no successor.
    pub fn rearm(&self) -> Option<Self> {
        match self.origin {
            FireOrigin::Recurring { day, time } => Some(Self {
                alarm_id: self.alarm_id,
                at: next_occurrence(day, time, &self.at)?,
                origin: self.origin,
            }),
            FireOrigin::Snooze => None,
        }
    }
}

/// Next instant strictly after `now` that falls on `day` at local `time`.
///
/// A wake time that does not exist on that date (skipped by a DST
/// change) fires an hour later; a repeated one fires at its first
/// occurrence. `None` only if the time zone maps three consecutive weeks
/// to nothing.
pub fn next_occurrence<Tz: TimeZone>(
    day: Weekday,
    time: NaiveTime,
    now: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let today = now.date_naive();
    let days_ahead =
        (7 + day.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
    let first = today.checked_add_days(Days::new(days_ahead.into()))?;

    (0..3u64).find_map(|week| {
        let date = first.checked_add_days(Days::new(week * 7))?;
        resolve_local(&tz, date.and_time(time)).filter(|at| at > now)
    })
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(at) => Some(at),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => tz
            .from_local_datetime(&(local + TimeDelta::hours(1)))
            .earliest(),
    }
}

/// Next fire instant of every enabled weekday of every enabled alarm,
/// ordered by time. Alarms sharing an instant each get their own entry.
pub fn plan<Tz: TimeZone>(alarms: &[AlarmDefinition], now: &DateTime<Tz>) -> Vec<FireInstant<Tz>> {
    let mut instants: Vec<FireInstant<Tz>> = alarms
        .iter()
        .filter(|alarm| alarm.enabled)
        .flat_map(|alarm| {
            alarm.days.iter().filter_map(move |day| {
                let at = next_occurrence(day, alarm.time, now)?;
                Some(FireInstant {
                    alarm_id: alarm.id,
                    at,
                    origin: FireOrigin::Recurring {
                        day,
                        time: alarm.time,
                    },
                })
            })
        })
        .collect();

    order(&mut instants);
    instants
}

/// Sort by time, then alarm identifier.
pub fn order<Tz: TimeZone>(instants: &mut [FireInstant<Tz>]) {
    instants.sort_by(|a, b| a.at.cmp(&b.at).then(a.alarm_id.cmp(&b.alarm_id)));
}
