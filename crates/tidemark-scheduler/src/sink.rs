use tidemark_core::{ProgressSink, StatusEvent};
use tokio::sync::mpsc;
use tracing::warn;

/// Forwards status events into a bounded channel without waiting.
///
/// When the receiver lags or is gone the event is dropped and logged.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<StatusEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<StatusEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn publish(&self, event: StatusEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!(error = %e, "Dropping status event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::{ProgressStatus, RunId};

    #[tokio::test]
    async fn test_forwards_events() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.publish(StatusEvent::new(RunId::new(), "core", ProgressStatus::Queued));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.package, "core");
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (sink, rx) = ChannelSink::new(1);
        sink.publish(StatusEvent::new(RunId::new(), "a", ProgressStatus::Queued));
        sink.publish(StatusEvent::new(RunId::new(), "b", ProgressStatus::Queued));
        drop(rx);
        sink.publish(StatusEvent::new(RunId::new(), "c", ProgressStatus::Queued));
    }
}
