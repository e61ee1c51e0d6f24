//! Fan-out of structured log lines to event-stream subscribers.

use std::io;

use tokio::sync::broadcast;
use tracing_subscriber::fmt::MakeWriter;

/// Per-subscriber buffer; a subscriber that lags past this many entries
/// drops the oldest rather than slowing the daemon.
const SUBSCRIBER_BUFFER: usize = 64;

/// Broadcast hub carrying every structured log line the daemon writes.
/// Cloning is cheap; all clones share one channel.
#[derive(Debug, Clone)]
pub struct LogHub {
    tx: broadcast::Sender<String>,
}

impl LogHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self { tx }
    }

    /// Subscribe to log lines emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Publish one line to every subscriber. Never fails: with no
    /// subscribers the line is simply discarded.
    pub fn publish(&self, line: String) {
        let _ = self.tx.send(line);
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Plugs the hub into a `tracing_subscriber` fmt layer.
impl<'a> MakeWriter<'a> for LogHub {
    type Writer = HubWriter;

    fn make_writer(&'a self) -> Self::Writer {
        HubWriter { hub: self.clone() }
    }
}

pub struct HubWriter {
    hub: LogHub,
}

impl io::Write for HubWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        let trimmed = line.trim_end_matches('\n');
        if !trimmed.is_empty() {
            self.hub.publish(trimmed.to_string());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_copies() {
        let hub = LogHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.publish("hello".to_string());

        assert_eq!(first.recv().await.unwrap(), "hello");
        assert_eq!(second.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let hub = LogHub::new();
        hub.publish("nobody listening".to_string());
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let hub = LogHub::new();
        let mut rx = hub.subscribe();

        for i in 0..(SUBSCRIBER_BUFFER + 10) {
            hub.publish(format!("line {}", i));
        }

        // The first recv reports the overflow, subsequent reads resume.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped >= 10),
            other => panic!("expected lag, got {:?}", other),
        }
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_writer_strips_trailing_newline() {
        let hub = LogHub::new();
        let mut rx = hub.subscribe();

        let mut writer = hub.make_writer();
        writer.write_all(b"{\"level\":\"info\"}\n").unwrap();

        assert_eq!(rx.recv().await.unwrap(), "{\"level\":\"info\"}");
    }
}
