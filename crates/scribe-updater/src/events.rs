use crate::orchestrator::UpdateStatus;
use crate::transfer::TransferProgress;

/// Lifecycle notifications the host UI listens for. Emission is
/// best-effort; nothing in the update path waits on delivery.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    CheckError { message: String },
    Available(UpdateStatus),
    NoUpdate(UpdateStatus),
    DownloadStart,
    DownloadProgress(TransferProgress),
    DownloadComplete,
    DownloadError { message: String },
}

impl UpdateEvent {
    /// Wire name of the event on the host notification channel.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CheckError { .. } => "update:check:error",
            Self::Available(_) => "update:available",
            Self::NoUpdate(_) => "update:no-update",
            Self::DownloadStart => "update:download:start",
            Self::DownloadProgress(_) => "update:download:progress",
            Self::DownloadComplete => "update:download:complete",
            Self::DownloadError { .. } => "update:download:error",
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: UpdateEvent);
}

/// Drops every event; for hosts that poll instead of listening.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _event: UpdateEvent) {}
}

/// Forwards events into an unbounded channel. A closed receiver is not an
/// error; emission stays fire-and-forget.
pub struct ChannelNotifier {
    sender: tokio::sync::mpsc::UnboundedSender<UpdateEvent>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<UpdateEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: UpdateEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_the_wire_protocol() {
        assert_eq!(
            UpdateEvent::CheckError {
                message: String::new()
            }
            .name(),
            "update:check:error"
        );
        assert_eq!(UpdateEvent::DownloadStart.name(), "update:download:start");
        assert_eq!(
            UpdateEvent::DownloadComplete.name(),
            "update:download:complete"
        );
        assert_eq!(
            UpdateEvent::DownloadError {
                message: String::new()
            }
            .name(),
            "update:download:error"
        );
    }

    #[test]
    fn channel_notifier_survives_a_dropped_receiver() {
        let (notifier, receiver) = ChannelNotifier::new();
        drop(receiver);
        notifier.notify(UpdateEvent::DownloadStart);
    }
}
