//! Home Assistant REST client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate};
use reqwest::{StatusCode, header};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Hub, HubError};
use crate::config::Config;
use crate::tracing::prelude::*;

const WEATHER_FALLBACK: &str = "I couldn't get the weather information right now.";
const CALENDAR_FALLBACK: &str = "I couldn't check your calendar right now.";
const NO_EVENTS: &str = "You have no events scheduled for today.";

/// State object returned by `GET /api/states/{entity}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EntityState {
    pub state: String,
    #[serde(default)]
    pub attributes: Value,
}

#[derive(Debug, Deserialize)]
struct Calendar {
    entity_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CalendarEvent {
    pub summary: String,
    pub start: EventStart,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EventStart {
    #[serde(rename = "dateTime")]
    pub date_time: Option<DateTime<chrono::FixedOffset>>,
    pub date: Option<NaiveDate>,
}

/// Client for one Home Assistant instance, bound to the media player the
/// alarms play on.
#[derive(Debug, Clone)]
pub struct HomeAssistant {
    http: reqwest::Client,
    base_url: String,
    media_player: String,
    weather_entity: String,
}

impl HomeAssistant {
    pub fn new(
        base_url: impl Into<String>,
        token: &str,
        media_player: impl Into<String>,
        weather_entity: impl Into<String>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Ok(mut auth) = header::HeaderValue::from_str(&format!("Bearer {token}")) {
            auth.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, auth);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!(url = %base_url, "Hub client initialized");

        Ok(Self {
            http,
            base_url,
            media_player: media_player.into(),
            weather_entity: weather_entity.into(),
        })
    }

    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        Self::new(
            &config.hub_url,
            &config.hub_token,
            &config.media_player_entity,
            &config.weather_entity,
            config.hub_timeout(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, HubError> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|source| HubError::Transport {
                path: path.to_string(),
                source,
            })?;

        if response.status() != StatusCode::OK {
            return Err(HubError::Rejected {
                path: path.to_string(),
                status: response.status(),
            });
        }

        response.json().await.map_err(|e| HubError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    pub(crate) async fn state(&self, entity: &str) -> Result<EntityState, HubError> {
        self.get_json(&format!("/api/states/{entity}")).await
    }

    async fn call_service(&self, domain: &str, service: &str, data: Value) -> Result<(), HubError> {
        let path = format!("/api/services/{domain}/{service}");
        let response = self
            .http
            .post(self.url(&path))
            .json(&data)
            .send()
            .await
            .map_err(|source| HubError::Transport {
                path: path.clone(),
                source,
            })?;

        if response.status() == StatusCode::OK {
            debug!(service = %format!("{domain}.{service}"), "Hub service call succeeded");
            Ok(())
        } else {
            warn!(
                service = %format!("{domain}.{service}"),
                status = %response.status(),
                "Hub service call rejected"
            );
            Err(HubError::Rejected {
                path,
                status: response.status(),
            })
        }
    }

    async fn events_of(&self, calendar: &str, start: &str, end: &str) -> Vec<CalendarEvent> {
        let path = format!("/api/calendars/{calendar}?start={start}&end={end}");
        match self.get_json::<Vec<CalendarEvent>>(&path).await {
            Ok(events) => events,
            Err(e) => {
                warn!(calendar, error = %e, "Failed to read calendar");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Hub for HomeAssistant {
    async fn is_reachable(&self) -> bool {
        match self.http.get(self.url("/api/")).send().await {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                warn!(status = %response.status(), "Hub availability probe rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "Hub is not reachable");
                false
            }
        }
    }

    async fn is_subject_home(&self, subject: &str) -> Result<bool, HubError> {
        let state = self.state(subject).await?;
        Ok(state.state == "home")
    }

    async fn set_volume(&self, level: f32) -> Result<(), HubError> {
        self.call_service(
            "media_player",
            "volume_set",
            json!({ "entity_id": self.media_player, "volume_level": level }),
        )
        .await
    }

    async fn start_media(&self, media: &str, kind: &str) -> Result<bool, HubError> {
        let result = self
            .call_service(
                "media_player",
                "play_media",
                json!({
                    "entity_id": self.media_player,
                    "media_content_id": media,
                    "media_content_type": kind,
                }),
            )
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(HubError::Rejected { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn stop_media(&self) -> Result<(), HubError> {
        self.call_service(
            "media_player",
            "media_stop",
            json!({ "entity_id": self.media_player }),
        )
        .await
    }

    async fn speak(&self, text: &str) -> Result<(), HubError> {
        self.call_service(
            "tts",
            "speak",
            json!({ "entity_id": self.media_player, "message": text }),
        )
        .await
    }

    async fn weather_summary(&self) -> String {
        match self.state(&self.weather_entity).await {
            Ok(state) => compose_weather(&state),
            Err(e) => {
                warn!(entity = %self.weather_entity, error = %e, "Failed to read weather");
                WEATHER_FALLBACK.to_string()
            }
        }
    }

    async fn today_events(&self) -> String {
        let calendars: Vec<Calendar> = match self.get_json("/api/calendars").await {
            Ok(calendars) => calendars,
            Err(e) => {
                warn!(error = %e, "Failed to list calendars");
                return CALENDAR_FALLBACK.to_string();
            }
        };
        if calendars.is_empty() {
            return "No calendars found.".to_string();
        }

        let today = Local::now().date_naive();
        let start = format!("{}T00:00:00", today.format("%Y-%m-%d"));
        let end = format!("{}T23:59:59", today.format("%Y-%m-%d"));

        let events: Vec<CalendarEvent> = futures::future::join_all(
            calendars
                .iter()
                .map(|cal| self.events_of(&cal.entity_id, &start, &end)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();

        compose_events(&events)
    }
}

/// "The current weather is sunny at 21°." plus today's forecast range
/// when the entity carries one.
pub(crate) fn compose_weather(state: &EntityState) -> String {
    let temperature = state
        .attributes
        .get("temperature")
        .map(plain)
        .unwrap_or_else(|| "an unknown temperature".to_string());
    let mut text = format!(
        "The current weather is {} at {}°.",
        state.state, temperature
    );

    let today = state
        .attributes
        .get("forecast")
        .and_then(|f| f.as_array())
        .and_then(|f| f.first());
    if let Some(forecast) = today {
        if let (Some(high), Some(low)) = (forecast.get("temperature"), forecast.get("templow")) {
            text.push_str(&format!(
                " Today's forecast: high of {}° and low of {}°.",
                plain(high),
                plain(low)
            ));
        }
    }
    text
}

/// "Here are today's events: Standup at 09:00 AM, Dentist all day."
pub(crate) fn compose_events(events: &[CalendarEvent]) -> String {
    let mut entries: Vec<(Option<DateTime<Local>>, String)> = events
        .iter()
        .filter_map(|event| match (&event.start.date_time, &event.start.date) {
            (Some(at), _) => {
                let at = at.with_timezone(&Local);
                Some((
                    Some(at),
                    format!("{} at {}", event.summary, at.format("%I:%M %p")),
                ))
            }
            (None, Some(_)) => Some((None, format!("{} all day", event.summary))),
            (None, None) => None,
        })
        .collect();

    if entries.is_empty() {
        return NO_EVENTS.to_string();
    }

    // All-day events first, then by start time.
    entries.sort_by_key(|(at, _)| *at);
    let list: Vec<String> = entries.into_iter().map(|(_, text)| text).collect();
    format!("Here are today's events: {}.", list.join(", "))
}

/// Render a JSON scalar without quotes.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Path,
        http::StatusCode as AxumStatus,
        routing::{get, post},
    };
    use std::sync::Arc;

    fn state(json: Value) -> EntityState {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn weather_with_forecast() {
        let text = compose_weather(&state(json!({
            "state": "sunny",
            "attributes": {
                "temperature": 18.5,
                "forecast": [{"temperature": 24, "templow": 12}]
            }
        })));
        assert_eq!(
            text,
            "The current weather is sunny at 18.5°. Today's forecast: high of 24° and low of 12°."
        );
    }

    #[test]
    fn weather_without_forecast() {
        let text = compose_weather(&state(json!({
            "state": "rainy",
            "attributes": {"temperature": 9}
        })));
        assert_eq!(text, "The current weather is rainy at 9°.");
    }

    #[test]
    fn no_events() {
        assert_eq!(compose_events(&[]), NO_EVENTS);
    }

    #[test]
    fn events_listed_all_day_first() {
        let events: Vec<CalendarEvent> = serde_json::from_value(json!([
            {"summary": "Standup", "start": {"dateTime": "2026-10-19T09:00:00+00:00"}},
            {"summary": "Holiday", "start": {"date": "2026-10-19"}},
        ]))
        .unwrap();

        let text = compose_events(&events);
        assert!(text.starts_with("Here are today's events: Holiday all day, Standup at "));
        assert!(text.ends_with('.'));
    }

    #[derive(Default)]
    struct Recorded {
        calls: parking_lot::Mutex<Vec<(String, Value)>>,
    }

    /// Serve a minimal imitation of the hub's REST API on a local port.
    async fn fake_hub(reject_media: bool) -> (HomeAssistant, Arc<Recorded>) {
        let recorded = Arc::new(Recorded::default());
        let rec = recorded.clone();

        let app = Router::new()
            .route("/api/", get(|| async { Json(json!({"message": "API running."})) }))
            .route(
                "/api/states/{entity}",
                get(|Path(entity): Path<String>| async move {
                    match entity.as_str() {
                        "person.home" => Ok(Json(json!({"state": "home", "attributes": {}}))),
                        "person.away" => Ok(Json(json!({"state": "not_home", "attributes": {}}))),
                        _ => Err(AxumStatus::NOT_FOUND),
                    }
                }),
            )
            .route(
                "/api/services/{domain}/{service}",
                post(
                    move |Path((domain, service)): Path<(String, String)>, Json(body): Json<Value>| {
                        let rec = rec.clone();
                        async move {
                            rec.calls.lock().push((format!("{domain}.{service}"), body));
                            if reject_media && service == "play_media" {
                                AxumStatus::BAD_REQUEST
                            } else {
                                AxumStatus::OK
                            }
                        }
                    },
                ),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let hub = HomeAssistant::new(
            format!("http://{addr}/"),
            "token",
            "media_player.bedroom",
            "weather.home",
            Duration::from_secs(2),
        )
        .unwrap();
        (hub, recorded)
    }

    #[tokio::test]
    async fn probes_and_presence() {
        let (hub, _) = fake_hub(false).await;

        assert!(hub.is_reachable().await);
        assert!(hub.is_subject_home("person.home").await.unwrap());
        assert!(!hub.is_subject_home("person.away").await.unwrap());
        assert!(matches!(
            hub.is_subject_home("person.unknown").await,
            Err(HubError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn service_calls_target_the_media_player() {
        let (hub, recorded) = fake_hub(false).await;

        hub.set_volume(0.4).await.unwrap();
        assert!(hub.start_media("wake.mp3", "music").await.unwrap());
        hub.stop_media().await.unwrap();

        let calls = recorded.calls.lock();
        let services: Vec<&str> = calls.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(
            services,
            ["media_player.volume_set", "media_player.play_media", "media_player.media_stop"]
        );
        assert_eq!(calls[1].1["media_content_id"], "wake.mp3");
        assert!(calls.iter().all(|(_, body)| body["entity_id"] == "media_player.bedroom"));
    }

    #[tokio::test]
    async fn rejected_playback_is_not_an_error() {
        let (hub, _) = fake_hub(true).await;
        assert!(!hub.start_media("wake.mp3", "music").await.unwrap());
    }

    #[tokio::test]
    async fn unreachable_hub() {
        // Nothing listens on the discard port.
        let hub = HomeAssistant::new(
            "http://127.0.0.1:9",
            "token",
            "media_player.bedroom",
            "weather.home",
            Duration::from_millis(500),
        )
        .unwrap();

        assert!(!hub.is_reachable().await);
        assert!(matches!(
            hub.set_volume(0.2).await,
            Err(HubError::Transport { .. })
        ));
        assert_eq!(hub.weather_summary().await, WEATHER_FALLBACK);
        assert_eq!(hub.today_events().await, CALENDAR_FALLBACK);
    }
}
