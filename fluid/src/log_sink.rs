//! Host-supplied log sink.
//!
//! Hosts that want the bridge's diagnostics in their own logging system hand
//! a [`LogSink`] to the session config. Events are forwarded by [`SinkLayer`]
//! through a session-scoped [`Dispatch`], so two sessions with different sinks
//! never see each other's output.

use std::fmt;
use std::sync::Arc;

use tracing::level_filters::LevelFilter;
use tracing::{Dispatch, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// One forwarded event.
#[derive(Debug, Clone, Copy)]
pub struct LogRecord<'a> {
    pub level: Level,
    pub target: &'a str,
    /// Message followed by structured fields as `key=value`.
    pub message: &'a str,
}

pub trait LogSink: Send + Sync {
    fn log(&self, record: &LogRecord<'_>);
}

pub struct SinkLayer {
    sink: Arc<dyn LogSink>,
}

impl SinkLayer {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.sink.log(&LogRecord {
            level: *metadata.level(),
            target: metadata.target(),
            message: &visitor.finish(),
        });
    }
}

/// Build the dispatch a session runs its operations under.
pub fn sink_dispatch(sink: Arc<dyn LogSink>, level: LevelFilter) -> Dispatch {
    let subscriber = tracing_subscriber::registry()
        .with(level)
        .with(SinkLayer::new(sink));
    Dispatch::new(subscriber)
}

/// Run `f` under `dispatch` if there is one, else under the current default.
pub(crate) fn scoped<T>(dispatch: Option<&Dispatch>, f: impl FnOnce() -> T) -> T {
    match dispatch {
        Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
        None => f(),
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        use fmt::Write;
        let _ = write!(self.fields, " {name}={value}");
    }

    fn finish(self) -> String {
        let mut out = self.message;
        out.push_str(&self.fields);
        out
    }
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
            if self.message.starts_with('"') && self.message.ends_with('"') && self.message.len() >= 2 {
                self.message = self.message[1..self.message.len() - 1].to_string();
            }
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Captured = Arc<Mutex<Vec<(Level, String, String)>>>;

    struct CaptureSink(Captured);

    impl LogSink for CaptureSink {
        fn log(&self, record: &LogRecord<'_>) {
            self.0.lock().unwrap().push((
                record.level,
                record.target.to_string(),
                record.message.to_string(),
            ));
        }
    }

    fn capture() -> (Arc<dyn LogSink>, Captured) {
        let captured: Captured = Arc::default();
        (Arc::new(CaptureSink(Arc::clone(&captured))), captured)
    }

    #[test]
    fn forwards_message_and_fields() {
        let (sink, captured) = capture();
        let dispatch = sink_dispatch(sink, LevelFilter::INFO);

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::warn!(id = "t-1", code = 3, "Task rejected");
        });

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        let (level, target, message) = &captured[0];
        assert_eq!(*level, Level::WARN);
        assert_eq!(target, module_path!());
        assert_eq!(message, "Task rejected id=t-1 code=3");
    }

    #[test]
    fn level_filter_applies() {
        let (sink, captured) = capture();
        let dispatch = sink_dispatch(sink, LevelFilter::INFO);

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::debug!("hidden");
            tracing::info!("shown");
        });

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].2, "shown");
    }

    #[test]
    fn scoped_without_dispatch_runs_inline() {
        assert_eq!(scoped(None, || 7), 7);
    }
}
