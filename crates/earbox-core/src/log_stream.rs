//! Ordered, best-effort remote log stream
//!
//! A `LogStream` owns the delivery token for one named stream. Every append
//! hands the current token to the sink and stores the one it gets back, so
//! events land in call order. Delivery is best-effort: a sink failure turns
//! into a local `tracing` warning and the caller carries on.
//!
//! Every event is also mirrored locally under [`MIRROR_TARGET`], separate from
//! the module's own diagnostics so the two can be filtered independently.

use crate::api::LogSink;
use crate::types::{DeliveryToken, LogEvent, LogLevel};
use std::sync::Arc;

/// `tracing` target of the local copy of each event
pub const MIRROR_TARGET: &str = "earbox::mirror";

/// Delivery counters for one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Events the sink accepted
    pub delivered: u64,
    /// Events the sink rejected
    pub dropped: u64,
}

/// Append-only handle on one remote log stream
pub struct LogStream {
    sink: Arc<dyn LogSink>,
    group: String,
    stream: String,
    token: Option<DeliveryToken>,
    stats: StreamStats,
}

impl LogStream {
    /// Open `group/stream`, creating the stream if absent
    ///
    /// Failing to create the stream is reported locally; appends are still
    /// attempted.
    pub fn open(sink: Arc<dyn LogSink>, group: impl Into<String>, stream: impl Into<String>) -> Self {
        let group = group.into();
        let stream = stream.into();
        if let Err(e) = sink.ensure_stream(&group, &stream) {
            tracing::warn!(group = %group, stream = %stream, "Failed to create log stream: {}", e);
        }
        Self {
            sink,
            group,
            stream,
            token: None,
            stats: StreamStats::default(),
        }
    }

    /// Append one event stamped with the current time
    pub fn append(&mut self, level: LogLevel, message: impl Into<String>) {
        let event = LogEvent::now(level, message);
        self.submit(&event);
    }

    /// Append at info level
    #[inline]
    pub fn info(&mut self, message: impl Into<String>) {
        self.append(LogLevel::Info, message);
    }

    /// Append at warning level
    #[inline]
    pub fn warning(&mut self, message: impl Into<String>) {
        self.append(LogLevel::Warning, message);
    }

    /// Append at error level
    #[inline]
    pub fn error(&mut self, message: impl Into<String>) {
        self.append(LogLevel::Error, message);
    }

    fn submit(&mut self, event: &LogEvent) {
        mirror(&self.stream, event);
        match self
            .sink
            .append(&self.group, &self.stream, event, self.token.as_ref())
        {
            Ok(next) => {
                self.token = Some(next);
                self.stats.delivered += 1;
            }
            Err(e) => {
                self.stats.dropped += 1;
                tracing::warn!(
                    group = %self.group,
                    stream = %self.stream,
                    "Failed to deliver log event: {}",
                    e
                );
            }
        }
    }

    /// Log group
    #[inline]
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Stream name
    #[inline]
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Token to be sent with the next append
    #[inline]
    #[must_use]
    pub fn token(&self) -> Option<&DeliveryToken> {
        self.token.as_ref()
    }

    /// Delivery counters so far
    #[inline]
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.stats
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("group", &self.group)
            .field("stream", &self.stream)
            .field("token", &self.token)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn mirror(stream: &str, event: &LogEvent) {
    match event.level {
        LogLevel::Info => tracing::info!(target: MIRROR_TARGET, stream = %stream, "{}", event.message),
        LogLevel::Warning => tracing::warn!(target: MIRROR_TARGET, stream = %stream, "{}", event.message),
        LogLevel::Error => tracing::error!(target: MIRROR_TARGET, stream = %stream, "{}", event.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingSink {
        seen_tokens: Mutex<Vec<Option<String>>>,
        fail: bool,
    }

    impl LogSink for CountingSink {
        fn ensure_stream(&self, _group: &str, _stream: &str) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Unavailable("down".into()));
            }
            Ok(())
        }

        fn append(
            &self,
            _group: &str,
            _stream: &str,
            _event: &LogEvent,
            token: Option<&DeliveryToken>,
        ) -> Result<DeliveryToken, SinkError> {
            if self.fail {
                return Err(SinkError::Unavailable("down".into()));
            }
            let mut seen = self.seen_tokens.lock().unwrap();
            seen.push(token.map(|t| t.as_str().to_string()));
            Ok(DeliveryToken::new(seen.len().to_string()))
        }
    }

    #[test]
    fn token_chains_between_appends() {
        let sink = Arc::new(CountingSink::default());
        let mut log = LogStream::open(sink.clone(), "group", "stream");

        assert!(log.token().is_none());
        log.info("one");
        log.warning("two");
        log.error("three");

        let seen = sink.seen_tokens.lock().unwrap().clone();
        assert_eq!(seen, vec![None, Some("1".to_string()), Some("2".to_string())]);
        assert_eq!(log.token().map(DeliveryToken::as_str), Some("3"));
        assert_eq!(log.stats().delivered, 3);
    }

    #[test]
    fn unavailable_sink_is_not_fatal() {
        let sink = Arc::new(CountingSink {
            fail: true,
            ..CountingSink::default()
        });
        let mut log = LogStream::open(sink, "group", "stream");

        log.info("dropped");
        log.error("also dropped");

        assert!(log.token().is_none());
        assert_eq!(
            log.stats(),
            StreamStats {
                delivered: 0,
                dropped: 2
            }
        );
    }
}
