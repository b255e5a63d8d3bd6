//! Client for the daemon's HTTP API.

pub mod types;

use anyhow::{Context, Result, bail};
use reqwest::{Method, RequestBuilder};
use serde::{Serialize, de::DeserializeOwned};

use crate::alarm::{AlarmDefinition, AlarmId, AlarmPatch, NewAlarm};
use types::{Health, RebuildResult, ScheduledFire, SequenceStatus, ServiceStatus, SnoozeRequest};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:7786";

pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn health(&self) -> Result<Health> {
        self.send(self.request(Method::GET, "/health")).await
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        self.send(self.request(Method::GET, "/status")).await
    }

    pub async fn schedule(&self) -> Result<Vec<ScheduledFire>> {
        self.send(self.request(Method::GET, "/schedule")).await
    }

    pub async fn rebuild(&self) -> Result<RebuildResult> {
        self.send(self.request(Method::POST, "/schedule/rebuild"))
            .await
    }

    pub async fn trigger(&self, id: AlarmId) -> Result<SequenceStatus> {
        self.send(self.request(Method::POST, &format!("/alarms/{id}/trigger")))
            .await
    }

    pub async fn snooze(&self, minutes: Option<u32>) -> Result<SequenceStatus> {
        self.send_json(Method::POST, "/snooze", &SnoozeRequest { minutes })
            .await
    }

    pub async fn dismiss(&self) -> Result<SequenceStatus> {
        self.send(self.request(Method::POST, "/dismiss")).await
    }

    pub async fn alarms(&self) -> Result<Vec<AlarmDefinition>> {
        self.send(self.request(Method::GET, "/alarms")).await
    }

    pub async fn alarm(&self, id: AlarmId) -> Result<AlarmDefinition> {
        self.send(self.request(Method::GET, &format!("/alarms/{id}")))
            .await
    }

    pub async fn create_alarm(&self, alarm: &NewAlarm) -> Result<AlarmDefinition> {
        self.send_json(Method::POST, "/alarms", alarm).await
    }

    pub async fn update_alarm(&self, id: AlarmId, patch: &AlarmPatch) -> Result<AlarmDefinition> {
        self.send_json(Method::PATCH, &format!("/alarms/{id}"), patch)
            .await
    }

    pub async fn delete_alarm(&self, id: AlarmId) -> Result<()> {
        let path = format!("/alarms/{id}");
        let response = self
            .request(Method::DELETE, &path)
            .send()
            .await
            .with_context(|| format!("DELETE {path}"))?;
        check(&path, response).await.map(|_| ())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/api/v0{path}", self.base_url))
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.send(self.request(method, path).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let (client, request) = request.build_split();
        let request = request.context("building request")?;
        let path = request.url().path().to_string();
        let response = client
            .execute(request)
            .await
            .with_context(|| format!("request to {path}"))?;
        check(&path, response)
            .await?
            .json()
            .await
            .with_context(|| format!("decoding response from {path}"))
    }
}

/// Turn a non-success status into an error carrying the server's message.
async fn check(path: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| body["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| status.to_string());
    bail!("{path}: {message} ({status})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};
    use tokio_util::sync::CancellationToken;

    use crate::alarm::sample;
    use crate::api::{SharedState, router};
    use crate::api_client::types::Phase;
    use crate::scheduler::{Scheduler, SchedulerHandle};
    use crate::sequencer::Sequencer;
    use crate::status::StatusReporter;
    use crate::testing::{RecordingDispatcher, RecordingHub, RecordingNotifier, store_with};

    async fn spawn_daemon() -> Client {
        let store = store_with([sample(0)]);
        let hub = Arc::new(RecordingHub::default());
        let (scheduler, mailbox) = SchedulerHandle::channel(CancellationToken::new());
        let sequencer = Sequencer::new(
            store.clone(),
            hub.clone(),
            Arc::new(RecordingNotifier::default()),
            scheduler.clone(),
            Duration::from_secs(60),
        );
        tokio::spawn(
            Scheduler::new(mailbox, store.clone(), Arc::new(RecordingDispatcher::default()))
                .run(),
        );
        let state = SharedState {
            store,
            status: StatusReporter::new(&sequencer, &scheduler),
            sequencer,
            scheduler,
            hub,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(state)).await.unwrap() });
        Client::with_base_url(format!("http://{addr}/"))
    }

    #[tokio::test]
    async fn client_round_trips_against_router() {
        let client = spawn_daemon().await;

        assert_eq!(client.health().await.unwrap().hub, "UP");
        assert_eq!(client.rebuild().await.unwrap().scheduled, 5);
        assert_eq!(client.schedule().await.unwrap().len(), 5);
        assert_eq!(client.alarms().await.unwrap().len(), 1);

        let patched = client
            .update_alarm(AlarmId(1), &AlarmPatch::enable(false))
            .await
            .unwrap();
        assert!(!patched.enabled);
        assert!(client.schedule().await.unwrap().is_empty());

        let status = client.trigger(AlarmId(1)).await.unwrap();
        assert_ne!(status.phase, Phase::Idle);

        client.delete_alarm(AlarmId(1)).await.unwrap();
        let err = client.alarm(AlarmId(1)).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn conflict_carries_server_message() {
        let client = spawn_daemon().await;
        let err = client.dismiss().await.unwrap_err();
        assert!(err.to_string().contains("no active alarm to dismiss"));
    }
}
