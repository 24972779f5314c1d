//! Worker host hooks for a terminal session.
//!
//! There are no pages to claim or windows to open here, so each hook just
//! reports what the worker asked for.

use async_trait::async_trait;
use fieldcache_core::net::Url;
use fieldcache_core::worker::{Notification, Platform};
use tracing::info;

pub struct TerminalPlatform;

#[async_trait]
impl Platform for TerminalPlatform {
    async fn claim_clients(&self) -> anyhow::Result<()> {
        info!("Claimed clients");
        Ok(())
    }

    async fn open_window(&self, url: &Url) -> anyhow::Result<()> {
        eprintln!("Open: {}", url);
        Ok(())
    }

    async fn show_notification(&self, notification: &Notification) -> anyhow::Result<()> {
        eprintln!("[{}] {}", notification.title, notification.body);
        Ok(())
    }

    async fn close_notification(&self, tag: &str) {
        info!(tag, "Closed notification");
    }
}
