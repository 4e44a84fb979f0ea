//! Delivery collaborators for fired alerts
//!
//! The engine only decides that an alert fired; rendering notifications,
//! sounds or chart markers belongs to whatever sits behind a sink.

use tokio::sync::mpsc;
use tracing::{info, warn};

use super::AlertFired;

#[cfg_attr(test, mockall::automock)]
pub trait AlertSink: Send {
    fn deliver(&self, fired: &AlertFired);
}

/// Logs every firing
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl AlertSink for TracingSink {
    fn deliver(&self, fired: &AlertFired) {
        info!(
            alert_id = %fired.alert.id,
            instrument = %fired.instrument,
            metric = %fired.metric,
            value = %fired.formatted_value,
            bar_id = fired.bar_id,
            notify = fired.notify,
            sound = fired.sound,
            "🔔 {}",
            fired.message
        );
    }
}

/// Forwards firings to an async consumer
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AlertFired>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<AlertFired>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AlertFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelSink {
    fn deliver(&self, fired: &AlertFired) {
        if self.tx.send(fired.clone()).is_err() {
            warn!(alert_id = %fired.alert.id, "Alert channel closed, dropping delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Alert, AlertCondition, MetricValue};
    use crate::engine::SnapshotView;
    use std::collections::BTreeMap;

    fn fired(id: &str) -> AlertFired {
        let mut alert = Alert::threshold("orderbook", "bpr", AlertCondition::Above, 1.0);
        alert.id = id.to_string();
        AlertFired {
            alert,
            metric: "orderbook.bpr".to_string(),
            value: MetricValue::Number(1.2),
            formatted_value: "1.20".to_string(),
            message: "BPR above 1".to_string(),
            instrument: "TEST".to_string(),
            bar_id: 60,
            ts: 60_000,
            notify: true,
            sound: false,
            marker: None,
            context: BTreeMap::new(),
            snapshot: SnapshotView::sample(60),
        }
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.deliver(&fired("a"));
        sink.deliver(&fired("b"));

        let first = tokio_test::block_on(rx.recv()).unwrap();
        let second = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(first.alert.id, "a");
        assert_eq!(second.alert.id, "b");
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.deliver(&fired("a"));
    }
}
