use std::time::Duration;
use tokio::sync::mpsc;

use crate::protocol::ClientMessage;

/// Heartbeat sender that periodically queues heartbeat frames
pub struct HeartbeatSender {
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    /// Run the heartbeat sender, queueing frames on the connection's writer
    pub async fn run(&self, tx: mpsc::Sender<ClientMessage>) {
        let mut interval = tokio::time::interval(self.interval);
        // The first tick fires immediately; hello already marked us alive
        interval.tick().await;

        loop {
            interval.tick().await;
            if tx.send(ClientMessage::Heartbeat).await.is_err() {
                // Writer gone, connection is closing
                break;
            }
        }
    }
}
