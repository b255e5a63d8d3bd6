//! The automation hub as seen by the trigger sequencer.
//!
//! The sequencer never talks HTTP itself; it drives a [`Hub`], which
//! wraps the hub's state queries and service calls for the one media
//! player the alarm plays on. [`HomeAssistant`] is the production
//! implementation.

mod home_assistant;

use async_trait::async_trait;

pub use home_assistant::HomeAssistant;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} returned {status}")]
    Rejected {
        path: String,
        status: reqwest::StatusCode,
    },

    #[error("unexpected response from {path}: {reason}")]
    Decode { path: String, reason: String },
}

/// Operations the trigger sequencer needs from the hub.
///
/// Every call is independent and safe to skip on failure; the sequencer
/// decides how each failure affects the wake-up sequence.
#[async_trait]
pub trait Hub: Send + Sync {
    /// Cheap availability probe.
    async fn is_reachable(&self) -> bool;

    /// Whether `subject` (a person entity) is currently at home.
    async fn is_subject_home(&self, subject: &str) -> Result<bool, HubError>;

    /// Set the player's volume, `level` in 0.0..=1.0.
    async fn set_volume(&self, level: f32) -> Result<(), HubError>;

    /// Start playback. `Ok(false)` means the hub refused the request.
    async fn start_media(&self, media: &str, kind: &str) -> Result<bool, HubError>;

    async fn stop_media(&self) -> Result<(), HubError>;

    /// Speak `text` on the player through text-to-speech.
    async fn speak(&self, text: &str) -> Result<(), HubError>;

    /// One or two sentences describing the weather. Never fails; a
    /// fallback sentence stands in when the data is unavailable.
    async fn weather_summary(&self) -> String;

    /// One sentence listing today's calendar events, with the same
    /// fallback behavior as [`weather_summary`](Self::weather_summary).
    async fn today_events(&self) -> String;
}
