use crate::config::NotifierConfig;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info, warn};

struct Credentials {
    app_id: String,
    api_key: String,
}

/// Push notification client for a OneSignal-compatible provider.
///
/// Missing credentials degrade every send to "notification skipped"; the
/// boolean result feeds the `notified` flag on persisted events.
pub struct PushNotifier {
    client: reqwest::Client,
    api_url: String,
    credentials: Option<Credentials>,
}

impl PushNotifier {
    pub fn from_config(config: &NotifierConfig) -> Self {
        let credentials = match (&config.app_id, &config.api_key) {
            (Some(app_id), Some(api_key)) => Some(Credentials {
                app_id: app_id.clone(),
                api_key: api_key.clone(),
            }),
            _ => {
                warn!("Push credentials not configured; notifications will be skipped");
                None
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_url: config.api_url.clone(),
            credentials,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    /// Send a notification to all subscribed devices.
    /// Returns whether the provider accepted the request.
    pub async fn broadcast(&self, title: &str, message: &str) -> bool {
        self.send(json!({
            "included_segments": ["All"],
            "headings": { "en": title },
            "contents": { "en": message },
        }))
        .await
    }

    /// Send a notification to specific device ids
    pub async fn send_to(&self, player_ids: &[String], title: &str, message: &str) -> bool {
        self.send(json!({
            "include_player_ids": player_ids,
            "headings": { "en": title },
            "contents": { "en": message },
        }))
        .await
    }

    async fn send(&self, mut payload: serde_json::Value) -> bool {
        let credentials = match &self.credentials {
            Some(c) => c,
            None => {
                debug!("Notification skipped (credentials not configured)");
                return false;
            }
        };

        payload["app_id"] = json!(credentials.app_id);

        let result = self
            .client
            .post(&self.api_url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", credentials.api_key),
            )
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!("Push notification delivered");
                true
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!("Push provider returned status {}: {}", status, body);
                false
            }
            Err(e) => {
                error!("Push request failed: {}", e);
                false
            }
        }
    }
}
