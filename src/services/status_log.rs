//! Status message layer for tracing
//!
//! Captures WARN and ERROR events, appends them to a warnings file and
//! forwards the message text to whoever renders the status line. Repeats of
//! the same message within a short window are suppressed, so a pager stuck
//! behind "over chunk limit" does not flood the channel.

use std::collections::HashMap;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const DEDUP_WINDOW: Duration = Duration::from_secs(5);
const MAX_TRACKED: usize = 100;

struct DeduplicationState {
    /// Message hash -> (last seen, times seen in the current window)
    recent_messages: HashMap<u64, (Instant, usize)>,
    window: Duration,
}

impl DeduplicationState {
    fn new(window: Duration) -> Self {
        Self {
            recent_messages: HashMap::new(),
            window,
        }
    }

    /// Returns whether to emit `message`, and how many copies were suppressed
    /// since it was last emitted.
    fn check_message(&mut self, message: &str, now: Instant) -> (bool, usize) {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        message.hash(&mut hasher);
        let hash = hasher.finish();

        if self.recent_messages.len() > MAX_TRACKED {
            let window = self.window;
            self.recent_messages
                .retain(|_, (time, _)| now.duration_since(*time) < window * 2);
        }

        match self.recent_messages.get_mut(&hash) {
            Some((last_seen, count)) if now.duration_since(*last_seen) < self.window => {
                *count += 1;
                *last_seen = now;
                (false, 0)
            }
            Some((last_seen, count)) => {
                let suppressed = count.saturating_sub(1);
                *count = 1;
                *last_seen = now;
                (true, suppressed)
            }
            None => {
                self.recent_messages.insert(hash, (now, 1));
                (true, 0)
            }
        }
    }
}

/// Tracing layer forwarding WARN+ messages to a status channel.
pub struct StatusLayer {
    file: Option<Arc<Mutex<File>>>,
    sender: mpsc::Sender<String>,
    dedup: Arc<Mutex<DeduplicationState>>,
}

/// Receiving end for the status line, plus the warnings file if one is kept.
pub struct StatusHandle {
    pub receiver: mpsc::Receiver<String>,
    pub path: Option<PathBuf>,
}

/// Layer writing to `warnings-{PID}.log` in the log directory.
pub fn create() -> std::io::Result<(StatusLayer, StatusHandle)> {
    create_with_path(Some(super::log_dirs::warnings_log_path()))
}

/// Layer with an explicit warnings file, or none at all.
pub fn create_with_path(path: Option<PathBuf>) -> std::io::Result<(StatusLayer, StatusHandle)> {
    let file = match &path {
        Some(path) => Some(Arc::new(Mutex::new(File::create(path)?))),
        None => None,
    };
    let (sender, receiver) = mpsc::channel();

    let layer = StatusLayer {
        file,
        sender,
        dedup: Arc::new(Mutex::new(DeduplicationState::new(DEDUP_WINDOW))),
    };

    Ok((layer, StatusHandle { receiver, path }))
}

impl<S> Layer<S> for StatusLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut visitor = StringVisitor::default();
        event.record(&mut visitor);
        let message = visitor.finish();

        let (should_emit, suppressed) = self
            .dedup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check_message(&message, Instant::now());
        if !should_emit {
            return;
        }

        if let Some(file) = &self.file {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let target = event.metadata().target();
            let line = if suppressed > 0 {
                format!(
                    "{} {} {}: {} (suppressed {} similar messages)\n",
                    timestamp, level, target, message, suppressed
                )
            } else {
                format!("{} {} {}: {}\n", timestamp, level, target, message)
            };
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = file.write_all(line.as_bytes());
            let _ = file.flush();
        }

        // Nobody listening is fine.
        let _ = self.sender.send(message);
    }
}

#[derive(Default)]
struct StringVisitor {
    message: String,
    fields: Vec<String>,
}

impl StringVisitor {
    fn push_field(&mut self, name: &str, value: String) {
        if name == "message" {
            self.message = value;
        } else {
            self.fields.push(format!("{}={}", name, value));
        }
    }

    fn finish(mut self) -> String {
        if self.fields.is_empty() {
            return self.message;
        }
        let fields = self.fields.join(" ");
        if self.message.is_empty() {
            return fields;
        }
        self.message.push(' ');
        self.message.push_str(&fields);
        self.message
    }
}

impl tracing::field::Visit for StringVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.push_field(field.name(), format!("{:?}", value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.push_field(field.name(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_dedup_window() {
        let mut state = DeduplicationState::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert_eq!(state.check_message("over chunk limit", t0), (true, 0));
        assert_eq!(
            state.check_message("over chunk limit", t0 + Duration::from_secs(1)),
            (false, 0)
        );
        assert_eq!(
            state.check_message("over chunk limit", t0 + Duration::from_secs(2)),
            (false, 0)
        );
        assert_eq!(state.check_message("other", t0), (true, 0));
        assert_eq!(
            state.check_message("over chunk limit", t0 + Duration::from_secs(8)),
            (true, 2)
        );
    }

    #[test]
    fn test_forwards_warnings_only() {
        let (layer, handle) = create_with_path(None).unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("just info");
            tracing::warn!("disk is slow");
            tracing::error!(chunk = 3, "read failed");
        });

        assert_eq!(handle.receiver.try_recv().unwrap(), "disk is slow");
        assert_eq!(handle.receiver.try_recv().unwrap(), "read failed chunk=3");
        assert!(handle.receiver.try_recv().is_err());
    }

    #[test]
    fn test_writes_warnings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warnings.log");
        let (layer, handle) = create_with_path(Some(path.clone())).unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("first");
            tracing::warn!("first");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("first").count(), 1);
        assert!(contents.contains("WARN"));
        assert_eq!(handle.path.as_deref(), Some(path.as_path()));
    }
}
