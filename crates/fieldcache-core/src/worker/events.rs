//! Messages, notifications and host hooks around the worker.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Sync tag that flushes offline mutations.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Notification action that opens the community view.
pub const EXPLORE_ACTION: &str = "explore";

pub const CLOSE_ACTION: &str = "close";

const NOTIFICATION_TITLE: &str = "fieldcache";
const NOTIFICATION_TAG: &str = "fieldcache-update";
const DEFAULT_PUSH_BODY: &str = "New update available!";
const NOTIFICATION_ICON: &str = "/icons/icon-192.png";
const NOTIFICATION_BADGE: &str = "/icons/icon-72.png";
const VIBRATION_PATTERN: [u32; 3] = [100, 50, 100];

/// Message posted by a page to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Activate the waiting worker now.
    SkipWaiting,
    #[serde(other)]
    Unknown,
}

impl WorkerMessage {
    /// Parse a raw page message; anything unrecognised is `Unknown`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(WorkerMessage::Unknown)
    }
}

/// Acknowledgement sent back for every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerReply {
    SwReady { message: String },
}

impl WorkerReply {
    pub fn ready() -> Self {
        WorkerReply::SwReady {
            message: "Service worker is ready".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Milliseconds since the epoch.
    pub date_of_arrival: i64,
    pub primary_key: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Notification {
    pub title: String,
    pub tag: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Build the notification shown for a push, with `payload` as its body.
    pub fn for_push(payload: Option<&str>) -> Self {
        let body = payload
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(DEFAULT_PUSH_BODY);

        Self {
            title: NOTIFICATION_TITLE.to_string(),
            tag: NOTIFICATION_TAG.to_string(),
            body: body.to_string(),
            icon: NOTIFICATION_ICON.to_string(),
            badge: NOTIFICATION_BADGE.to_string(),
            vibrate: VIBRATION_PATTERN.to_vec(),
            data: NotificationData {
                date_of_arrival: chrono::Utc::now().timestamp_millis(),
                primary_key: 1,
            },
            actions: vec![
                NotificationAction {
                    action: EXPLORE_ACTION.to_string(),
                    title: "Open community".to_string(),
                },
                NotificationAction {
                    action: CLOSE_ACTION.to_string(),
                    title: "Close".to_string(),
                },
            ],
        }
    }
}

/// Host facilities the worker drives but does not own.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Take control of every open page.
    async fn claim_clients(&self) -> anyhow::Result<()>;

    /// Open or focus a page showing `url`.
    async fn open_window(&self, url: &Url) -> anyhow::Result<()>;

    async fn show_notification(&self, notification: &Notification) -> anyhow::Result<()>;

    async fn close_notification(&self, tag: &str);
}
