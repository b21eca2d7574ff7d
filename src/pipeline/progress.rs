//! Thread-safe progress reporting.
//!
//! Workers hold cloned [`ProgressReporter`]s that bump atomic counters and push
//! [`ProgressEvent`]s into a channel. A single [`ProgressMonitor`] owns the
//! receiving end and forwards events to a [`ProgressSink`]. Computation never
//! touches the sink directly.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// One progress update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProgressEvent {
    Advance {
        stage: String,
        current: usize,
        total: usize,
    },
    Status {
        stage: String,
        text: String,
    },
}

impl ProgressEvent {
    pub fn stage(&self) -> &str {
        match self {
            ProgressEvent::Advance { stage, .. } | ProgressEvent::Status { stage, .. } => stage,
        }
    }
}

/// Consumer of progress events, driven by a [`ProgressMonitor`].
pub trait ProgressSink: Send {
    fn handle(&mut self, event: &ProgressEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn handle(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Advance {
                stage,
                current,
                total,
            } => {
                let percent = if *total > 0 {
                    *current as f64 / *total as f64 * 100.0
                } else {
                    100.0
                };
                tracing::info!(
                    stage = %stage,
                    current,
                    total,
                    "{} {}/{} ({:.0}%)",
                    stage,
                    current,
                    total,
                    percent
                );
            }
            ProgressEvent::Status { stage, text } => {
                tracing::info!(stage = %stage, "{}", text);
            }
        }
    }
}

/// Keeps every event it sees, for inspection after a run.
#[derive(Debug, Default, Clone)]
pub struct HistorySink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl HistorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for HistorySink {
    fn handle(&mut self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicUsize,
    total: AtomicUsize,
}

/// Producer side, cheap to clone and safe to share across workers.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    counters: Arc<Counters>,
    sender: Option<Sender<ProgressEvent>>,
}

impl ProgressReporter {
    /// A reporter that counts but sends nothing.
    pub fn disabled() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            sender: None,
        }
    }

    // A dropped monitor only loses cosmetic updates.
    fn send(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    /// Start a stage of `total` units.
    pub fn begin(&self, stage: &str, total: usize) {
        self.counters.completed.store(0, Ordering::SeqCst);
        self.counters.total.store(total, Ordering::SeqCst);
        self.send(ProgressEvent::Advance {
            stage: stage.to_string(),
            current: 0,
            total,
        });
    }

    /// Mark one unit of the current stage done, returning the new count.
    pub fn advance(&self, stage: &str) -> usize {
        let current = self.counters.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.counters.total.load(Ordering::SeqCst);
        self.send(ProgressEvent::Advance {
            stage: stage.to_string(),
            current,
            total,
        });
        current
    }

    pub fn status(&self, stage: &str, text: impl Into<String>) {
        self.send(ProgressEvent::Status {
            stage: stage.to_string(),
            text: text.into(),
        });
    }

    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.counters.total.load(Ordering::SeqCst)
    }
}

/// The single consumer of a progress channel.
#[derive(Debug)]
pub struct ProgressMonitor {
    receiver: Receiver<ProgressEvent>,
}

impl ProgressMonitor {
    /// Forward whatever is queued right now, returning the event count.
    pub fn drain(&self, sink: &mut dyn ProgressSink) -> usize {
        let mut count = 0;
        while let Ok(event) = self.receiver.try_recv() {
            sink.handle(&event);
            count += 1;
        }
        count
    }

    /// Forward events until every reporter has been dropped.
    pub fn run(self, sink: &mut dyn ProgressSink) -> usize {
        let mut count = 0;
        for event in self.receiver.iter() {
            sink.handle(&event);
            count += 1;
        }
        count
    }

    /// Run the monitor on its own thread; joining returns the sink.
    pub fn spawn<S>(self, mut sink: S) -> JoinHandle<S>
    where
        S: ProgressSink + 'static,
    {
        std::thread::spawn(move || {
            self.run(&mut sink);
            sink
        })
    }
}

/// Connected reporter/monitor pair.
pub fn channel() -> (ProgressReporter, ProgressMonitor) {
    let (sender, receiver) = mpsc::channel();
    (
        ProgressReporter {
            counters: Arc::new(Counters::default()),
            sender: Some(sender),
        },
        ProgressMonitor { receiver },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_disabled_reporter_counts() {
        let reporter = ProgressReporter::disabled();
        reporter.begin("reslice", 3);
        reporter.advance("reslice");
        reporter.advance("reslice");
        assert_eq!(reporter.completed(), 2);
        assert_eq!(reporter.total(), 3);
    }

    #[test]
    fn test_concurrent_advances_are_all_counted() {
        let (reporter, monitor) = channel();
        let history = HistorySink::new();
        let handle = monitor.spawn(history.clone());

        reporter.begin("register", 64);
        (0..64).into_par_iter().for_each(|_| {
            reporter.advance("register");
        });
        reporter.status("register", "done");
        assert_eq!(reporter.completed(), 64);
        drop(reporter);

        handle.join().unwrap();
        let events = history.events();
        assert_eq!(events.len(), 66);

        let mut seen: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Advance { current, .. } if *current > 0 => Some(*current),
                _ => None,
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (1..=64).collect::<Vec<_>>());
        assert!(matches!(events.last(), Some(ProgressEvent::Status { .. })));
    }

    #[test]
    fn test_drain_without_blocking() {
        let (reporter, monitor) = channel();
        let mut history = HistorySink::new();
        assert_eq!(monitor.drain(&mut history), 0);
        reporter.status("load", "reading");
        assert_eq!(monitor.drain(&mut history), 1);
        assert_eq!(history.events()[0].stage(), "load");
    }
}
