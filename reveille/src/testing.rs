//! Recording test doubles for the hub, the notifier and the dispatcher.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::alarm::{AlarmDefinition, AlarmId, NewAlarm};
use crate::hub::{Hub, HubError};
use crate::notify::{Notification, Notifier};
use crate::scheduler::Dispatch;
use crate::sequencer::DispatchError;
use crate::store::AlarmStore;

#[derive(Debug, Clone, PartialEq)]
pub enum HubCall {
    Probe,
    Presence(String),
    SetVolume(f32),
    StartMedia(String),
    StopMedia,
    Speak(String),
    Weather,
    Events,
}

impl HubCall {
    /// Calls that act on the media player.
    pub fn is_service(&self) -> bool {
        matches!(
            self,
            HubCall::SetVolume(_) | HubCall::StartMedia(_) | HubCall::StopMedia | HubCall::Speak(_)
        )
    }
}

/// Scriptable [`Hub`] that records every call with the (tokio) time it
/// was made.
#[derive(Debug)]
pub struct RecordingHub {
    pub(crate) calls: Mutex<Vec<(Instant, HubCall)>>,
    /// Results of the next availability probes; `reachable` afterwards.
    pub(crate) probes: Mutex<VecDeque<bool>>,
    pub reachable: bool,
    /// `None` makes the presence query fail.
    pub home: Option<bool>,
    pub media_accepted: bool,
    pub fail_set_volume: bool,
    pub panic_on_speak: bool,
}

impl Default for RecordingHub {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            probes: Mutex::new(VecDeque::new()),
            reachable: true,
            home: Some(true),
            media_accepted: true,
            fail_set_volume: false,
            panic_on_speak: false,
        }
    }
}

impl RecordingHub {
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::default()
        }
    }

    /// Answer the next probes with `results`, in order.
    pub fn script_probes(self, results: impl IntoIterator<Item = bool>) -> Self {
        self.probes.lock().extend(results);
        self
    }

    pub fn calls(&self) -> Vec<(Instant, HubCall)> {
        self.calls.lock().clone()
    }

    /// Media player calls only, without timestamps.
    pub fn service_calls(&self) -> Vec<HubCall> {
        self.calls
            .lock()
            .iter()
            .map(|(_, call)| call.clone())
            .filter(HubCall::is_service)
            .collect()
    }

    fn record(&self, call: HubCall) {
        self.calls.lock().push((Instant::now(), call));
    }

    fn rejected(path: &str) -> HubError {
        HubError::Rejected {
            path: path.to_string(),
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[async_trait]
impl Hub for RecordingHub {
    async fn is_reachable(&self) -> bool {
        self.record(HubCall::Probe);
        self.probes.lock().pop_front().unwrap_or(self.reachable)
    }

    async fn is_subject_home(&self, subject: &str) -> Result<bool, HubError> {
        self.record(HubCall::Presence(subject.to_string()));
        self.home.ok_or_else(|| Self::rejected("/api/states"))
    }

    async fn set_volume(&self, level: f32) -> Result<(), HubError> {
        self.record(HubCall::SetVolume(level));
        if self.fail_set_volume {
            return Err(Self::rejected("/api/services/media_player/volume_set"));
        }
        Ok(())
    }

    async fn start_media(&self, media: &str, _kind: &str) -> Result<bool, HubError> {
        self.record(HubCall::StartMedia(media.to_string()));
        Ok(self.media_accepted)
    }

    async fn stop_media(&self) -> Result<(), HubError> {
        self.record(HubCall::StopMedia);
        Ok(())
    }

    async fn speak(&self, text: &str) -> Result<(), HubError> {
        self.record(HubCall::Speak(text.to_string()));
        if self.panic_on_speak {
            panic!("speaker on fire");
        }
        Ok(())
    }

    async fn weather_summary(&self) -> String {
        self.record(HubCall::Weather);
        "It's sunny and 20 degrees.".to_string()
    }

    async fn today_events(&self) -> String {
        self.record(HubCall::Events);
        "You have no events today.".to_string()
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.sent.lock().iter().map(|n| n.title.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> bool {
        self.sent.lock().push(notification.clone());
        true
    }
}

/// Dispatcher that records requests and accepts them unless `busy`.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    pub dispatched: Mutex<Vec<AlarmId>>,
    pub abandoned: Mutex<Vec<AlarmId>>,
    pub busy: bool,
}

impl RecordingDispatcher {
    pub fn dispatched(&self) -> Vec<AlarmId> {
        self.dispatched.lock().clone()
    }

    pub fn abandoned(&self) -> Vec<AlarmId> {
        self.abandoned.lock().clone()
    }
}

impl Dispatch for RecordingDispatcher {
    fn dispatch(&self, alarm_id: AlarmId) -> Result<(), DispatchError> {
        self.dispatched.lock().push(alarm_id);
        if self.busy {
            return Err(DispatchError::Busy {
                requested: alarm_id,
                active: None,
                phase: crate::api_client::types::Phase::VolumeRamp,
            });
        }
        Ok(())
    }

    fn abandon_snooze(&self, alarm_id: AlarmId) {
        self.abandoned.lock().push(alarm_id);
    }
}

/// In-memory store holding `alarms`, which receive identifiers 1, 2, ...
/// in order.
pub fn store_with(alarms: impl IntoIterator<Item = AlarmDefinition>) -> Arc<AlarmStore> {
    let store = AlarmStore::in_memory();
    for alarm in alarms {
        store
            .create(NewAlarm {
                name: alarm.name,
                time: alarm.time,
                days: alarm.days,
                enabled: alarm.enabled,
                media_url: alarm.media_url,
                media_kind: alarm.media_kind,
                volume_steps: alarm.volume_steps,
                step_delay_secs: alarm.step_delay_secs,
                presence_subject: alarm.presence_subject,
            })
            .expect("valid sample alarm");
    }
    Arc::new(store)
}
