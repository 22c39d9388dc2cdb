//! Single-slot, last-write-wins store for the most recent vehicle state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::message::Telemetry;

/// Creates a connected writer/reader pair over an empty slot.
pub fn slot() -> (TelemetryWriter, TelemetryReader) {
    let (tx, rx) = watch::channel(None);
    (TelemetryWriter { tx: Arc::new(tx) }, TelemetryReader { rx })
}

#[derive(Clone, Debug)]
pub struct TelemetryWriter {
    tx: Arc<watch::Sender<Option<Telemetry>>>,
}

impl TelemetryWriter {
    pub fn publish(&self, telemetry: Telemetry) {
        self.tx.send_replace(Some(telemetry));
    }

    /// Empties the slot so that readers wait for a state produced after this call.
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub fn subscribe(&self) -> TelemetryReader {
        TelemetryReader {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TelemetryReader {
    rx: watch::Receiver<Option<Telemetry>>,
}

impl TelemetryReader {
    pub fn latest(&self) -> Option<Telemetry> {
        self.rx.borrow().clone()
    }

    /// Resolves with the first state present in the slot, or `None` once
    /// `timeout` elapses or the writer is gone.
    pub async fn wait_for_state(&mut self, timeout: Duration) -> Option<Telemetry> {
        let rx = &mut self.rx;
        let wait = async move {
            match rx.wait_for(Option::is_some).await {
                Ok(state) => (*state).clone(),
                Err(_) => None,
            }
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Vec3;

    fn at_altitude(y: f32) -> Telemetry {
        Telemetry {
            position: Vec3::new(0.0, y, 0.0),
            ..Telemetry::default()
        }
    }

    #[test]
    fn last_write_wins() {
        let (writer, reader) = slot();
        assert!(reader.latest().is_none());
        writer.publish(at_altitude(1.0));
        writer.publish(at_altitude(2.0));
        assert_eq!(reader.latest().map(|t| t.altitude()), Some(2.0));
        writer.clear();
        assert!(reader.latest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_on_empty_slot() {
        let (_writer, mut reader) = slot();
        assert!(reader.wait_for_state(Duration::from_secs(5)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_wakes_on_publish() {
        let (writer, mut reader) = slot();
        let publisher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            writer.publish(at_altitude(4.0));
            writer
        });
        let state = reader.wait_for_state(Duration::from_secs(5)).await;
        assert_eq!(state.map(|t| t.altitude()), Some(4.0));
        drop(publisher.await.expect("publisher"));
    }
}
