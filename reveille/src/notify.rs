//! Push notifications.
//!
//! Notifications are best effort: a failed delivery is logged and the
//! caller carries on.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::json;

use crate::config::Config;
use crate::tracing::prelude::*;

/// Notification priority on Gotify's 0..=10 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(pub u8);

impl Priority {
    /// Informational: alarm skipped or snoozed.
    pub const LOW: Self = Self(3);
    /// The alarm ran, but not as intended.
    pub const ISSUE: Self = Self(7);
    /// The alarm did not run.
    pub const FAILURE: Self = Self(8);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub priority: Priority,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>, priority: Priority) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `notification`. Returns whether it was accepted; never
    /// fails otherwise.
    async fn send(&self, notification: &Notification) -> bool;
}

/// Build the notifier described by `config`: Gotify when both URL and
/// token are set, a logging no-op otherwise.
pub fn from_config(config: &Config) -> Arc<dyn Notifier> {
    match (&config.gotify_url, &config.gotify_token) {
        (Some(url), Some(token)) => match Gotify::new(url, token) {
            Ok(gotify) => return Arc::new(gotify),
            Err(e) => error!(error = %e, "Failed to build Gotify client, notifications disabled"),
        },
        _ => warn!("Gotify not configured, notifications disabled"),
    }
    Arc::new(Disabled)
}

/// Notifier used when no push service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disabled;

#[async_trait]
impl Notifier for Disabled {
    async fn send(&self, notification: &Notification) -> bool {
        info!(
            title = %notification.title,
            priority = notification.priority.0,
            "Notification skipped (not configured): {}",
            notification.body
        );
        true
    }
}

/// Gotify push server client.
#[derive(Debug, Clone)]
pub struct Gotify {
    http: reqwest::Client,
    url: String,
    token: String,
}

impl Gotify {
    pub fn new(url: &str, token: &str) -> reqwest::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for Gotify {
    async fn send(&self, notification: &Notification) -> bool {
        let result = self
            .http
            .post(format!("{}/message", self.url))
            .header("X-Gotify-Key", &self.token)
            .json(&json!({
                "title": notification.title,
                "message": notification.body,
                "priority": notification.priority.0,
            }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(title = %notification.title, "Notification delivered");
                true
            }
            Ok(response) => {
                warn!(
                    title = %notification.title,
                    status = %response.status(),
                    "Notification rejected"
                );
                false
            }
            Err(e) => {
                warn!(title = %notification.title, error = %e, "Failed to send notification");
                false
            }
        }
    }
}
