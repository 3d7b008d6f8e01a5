//! Push notifications

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::worker::OfflineWorker;

/// Fields the worker reads from a push payload
///
/// The full payload is kept as notification data.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
}

impl PushPayload {
    /// Read the known fields from any JSON value, ignoring wrong types
    pub fn from_value(value: &Value) -> Self {
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(String::from);
        Self {
            title: field("title"),
            body: field("body"),
            url: field("url"),
        }
    }
}

/// A button on a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// A notification to show the user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub renotify: bool,
    pub require_interaction: bool,
    pub silent: bool,
    pub actions: Vec<NotificationAction>,
    pub data: Value,
}

impl OfflineWorker {
    /// Build the notification for a push message
    ///
    /// Returns `None` for a push without data.
    pub fn push_notification(
        &self,
        data: Option<&[u8]>,
    ) -> Result<Option<Notification>, CoreError> {
        info!("Push notification received");

        let Some(data) = data.filter(|d| !d.iter().all(u8::is_ascii_whitespace)) else {
            debug!("Push without data, nothing to show");
            return Ok(None);
        };

        let value: Value = serde_json::from_slice(data)
            .map_err(|e| CoreError::BadRequest(format!("Invalid push payload: {}", e)))?;
        let payload = PushPayload::from_value(&value);

        let app_name = &self.config.app_name;
        let icon = self.config.notification_icon.clone();

        Ok(Some(Notification {
            title: payload.title.unwrap_or_else(|| app_name.clone()),
            body: payload
                .body
                .unwrap_or_else(|| format!("New update from {}", app_name)),
            icon: icon.clone(),
            badge: icon.clone(),
            tag: format!("{}-notification", self.config.cache_prefix),
            renotify: true,
            require_interaction: false,
            silent: false,
            actions: vec![
                NotificationAction {
                    action: "view".to_string(),
                    title: "View".to_string(),
                    icon: Some(icon),
                },
                NotificationAction {
                    action: "dismiss".to_string(),
                    title: "Dismiss".to_string(),
                    icon: None,
                },
            ],
            data: value,
        }))
    }

    /// Handle a click on a notification
    ///
    /// Returns the URL to open, if any.
    pub fn notification_click(&self, action: &str, data: &Value) -> Option<String> {
        info!("Notification clicked: {}", action);

        match action {
            "view" => {
                let url = PushPayload::from_value(data).url.unwrap_or_else(|| "/".to_string());
                Some(url)
            }
            _ => None,
        }
    }
}
