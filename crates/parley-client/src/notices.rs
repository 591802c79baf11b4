//! User-facing notices.
//!
//! Operations report their outcome to the UI as short toasts; any number of
//! listeners can subscribe.  Nobody listening is not an error.

use serde::Serialize;
use tokio::sync::broadcast;

use parley_shared::constants::NOTICE_CHANNEL_CAPACITY;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserNotice {
    pub level: NoticeLevel,
    pub text: String,
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<UserNotice>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UserNotice> {
        self.tx.subscribe()
    }

    pub fn info(&self, text: impl Into<String>) {
        self.emit(NoticeLevel::Info, text.into());
    }

    pub fn success(&self, text: impl Into<String>) {
        self.emit(NoticeLevel::Success, text.into());
    }

    pub fn error(&self, text: impl Into<String>) {
        self.emit(NoticeLevel::Error, text.into());
    }

    fn emit(&self, level: NoticeLevel, text: String) {
        if self.tx.send(UserNotice { level, text }).is_err() {
            tracing::trace!(?level, "No notice listeners");
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
