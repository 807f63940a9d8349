use crate::domain::models::{AppEvent, MessageSeverity, Notice, Signal};
use tokio::sync::mpsc;

/// Outbound event sink towards the UI collaborator.
#[derive(Debug, Clone)]
pub struct Notifier {
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl Notifier {
    /// Create a new notifier
    pub fn new(event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self { event_sender }
    }

    pub fn send(&self, event: AppEvent) {
        // The UI may already be gone during teardown
        let _ = self.event_sender.send(event);
    }

    /// Send a titled notice; severity follows the signal
    pub fn notice(&self, signal: Signal, title: &str, description: impl Into<String>) {
        let severity = match signal {
            Signal::Connected | Signal::Reconnected => MessageSeverity::Success,
            Signal::Disconnected | Signal::BackgroundModeChanged => MessageSeverity::Info,
            Signal::ConnectionFailed
            | Signal::DisconnectFailed
            | Signal::ReconnectionExhausted
            | Signal::AdapterUnavailable
            | Signal::ScanFailed => MessageSeverity::Error,
        };
        self.send(AppEvent::Notice(Notice {
            signal,
            title: title.to_string(),
            description: description.into(),
            severity,
        }));
    }
}
