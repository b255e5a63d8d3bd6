//! Reveille: weekly wake-up alarms played through a home automation hub.
//!
//! The daemon keeps a weekly plan of fire instants derived from the alarm
//! store, and hands each due alarm to the trigger sequencer, which runs
//! the wake-up sequence (presence check, availability check, media start,
//! volume ramp, morning briefing) one alarm at a time.

pub mod alarm;
pub mod api;
pub mod api_client;
pub mod config;
pub mod error;
pub mod hub;
pub mod notify;
pub mod planner;
pub mod scheduler;
pub mod sequencer;
pub mod status;
pub mod store;
pub mod tracing;

#[cfg(test)]
pub(crate) mod testing;
