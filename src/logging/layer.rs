//! # Capa de tracing hacia el sink
//! src/logging/layer.rs
//!
//! Convierte cada evento de `tracing` en un `LogRecord` y lo encola. El
//! mensaje va primero y los demás campos se agregan como ` clave=valor`.

use super::record::{LogLevel, LogRecord};
use crate::sync::BlockQueue;
use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Capa que alimenta la cola del sink
pub struct AsyncLogLayer {
    queue: BlockQueue<LogRecord>,
}

impl AsyncLogLayer {
    pub fn new(queue: BlockQueue<LogRecord>) -> Self {
        Self { queue }
    }
}

impl<S: Subscriber> Layer<S> for AsyncLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let level = LogLevel::from(*event.metadata().level());
        // Con la cola cerrada el registro se pierde
        let _ = self.queue.push_back(LogRecord::new(level, visitor.finish()));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture(f: impl FnOnce()) -> Vec<LogRecord> {
        let queue = BlockQueue::new(64);
        let subscriber = tracing_subscriber::registry().with(AsyncLogLayer::new(queue.clone()));
        tracing::subscriber::with_default(subscriber, f);

        let mut records = Vec::new();
        while let Some(record) = queue.pop_timeout(Duration::ZERO) {
            records.push(record);
        }
        records
    }

    #[test]
    fn test_message_and_fields() {
        let records = capture(|| {
            tracing::warn!(fd = 7, peer = %"127.0.0.1:4000", "read failed");
        });

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Warn);
        assert_eq!(records[0].message, "read failed fd=7 peer=127.0.0.1:4000");
    }

    #[test]
    fn test_levels_are_mapped() {
        let records = capture(|| {
            tracing::info!("up");
            tracing::error!("down");
        });

        let levels: Vec<LogLevel> = records.iter().map(|r| r.level).collect();
        assert_eq!(levels, vec![LogLevel::Info, LogLevel::Error]);
        assert_eq!(records[0].message, "up");
    }

    #[test]
    fn test_closed_queue_drops_events() {
        let queue = BlockQueue::new(4);
        queue.close();

        let subscriber = tracing_subscriber::registry().with(AsyncLogLayer::new(queue.clone()));
        tracing::subscriber::with_default(subscriber, || tracing::info!("lost"));

        assert!(queue.is_empty());
    }
}
