use std::sync::Mutex;
use tracing::{error, info, warn};

/// Sink for user-facing messages.
pub trait Ui: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    /// Output lines relayed from scripts and guest commands.
    fn detail(&self, message: &str);
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUi;

impl Ui for LogUi {
    fn info(&self, message: &str) {
        info!("{message}");
    }

    fn warn(&self, message: &str) {
        warn!("{message}");
    }

    fn error(&self, message: &str) {
        error!("{message}");
    }

    fn detail(&self, message: &str) {
        info!("  {message}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiLevel {
    Info,
    Warn,
    Error,
    Detail,
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct RecordingUi {
    messages: Mutex<Vec<(UiLevel, String)>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(UiLevel, String)> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn at(&self, level: UiLevel) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|(_, m)| m.contains(needle))
    }

    fn push(&self, level: UiLevel, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((level, message.to_owned()));
        }
    }
}

impl Ui for RecordingUi {
    fn info(&self, message: &str) {
        self.push(UiLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(UiLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(UiLevel::Error, message);
    }

    fn detail(&self, message: &str) {
        self.push(UiLevel::Detail, message);
    }
}
