// src/notify/mod.rs
//! Fire-and-forget operator notifications.
//!
//! The engine only ever calls [`NotifierHandle::notify`], which enqueues
//! without waiting. A separate task drains the queue into a [`Notifier`].

pub mod telegram;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::TelegramConfig;
use crate::types::EventKind;

pub use telegram::TelegramNotifier;

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: EventKind,
    pub message: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log only. Used when Telegram is not configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(kind = notification.kind.as_str(), "{}", notification.message);
        Ok(())
    }
}

/// Telegram when both token and chat id are present, the log otherwise.
pub fn from_config(cfg: &TelegramConfig) -> Arc<dyn Notifier> {
    match (&cfg.bot_token, &cfg.chat_id) {
        (Some(token), Some(chat_id)) if !token.is_empty() && !chat_id.is_empty() => {
            Arc::new(TelegramNotifier::new(token.clone(), chat_id.clone()))
        }
        _ => {
            warn!("Telegram credentials not set, notifications go to the log only");
            Arc::new(LogNotifier)
        }
    }
}

#[derive(Clone)]
pub struct NotifierHandle {
    tx: Option<mpsc::Sender<Notification>>,
}

impl NotifierHandle {
    /// A handle that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, kind: EventKind, message: impl Into<String>) {
        let Some(tx) = &self.tx else {
            return;
        };
        let notification = Notification {
            kind,
            message: message.into(),
        };
        match tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(n)) => {
                warn!(kind = n.kind.as_str(), "notification queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("notification worker is gone");
            }
        }
    }
}

/// Starts the delivery task. It ends once every handle has been dropped and
/// the queue is drained.
pub fn spawn(notifier: Arc<dyn Notifier>, capacity: usize) -> (NotifierHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Notification>(capacity.max(1));
    let worker = tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            if let Err(e) = notifier.send(&notification).await {
                warn!(kind = notification.kind.as_str(), error = %e, "notification not delivered");
            }
        }
    });
    (NotifierHandle { tx: Some(tx) }, worker)
}
