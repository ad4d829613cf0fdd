//! Per-sensor reading fan-out.
//!
//! Each registered sensor owns a [`Notifier`]. Subscribers are either plain
//! callbacks or bounded channels; a failing subscriber never affects the
//! others or the sampling loop that feeds them.

use crate::sensor::types::Reading;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Error returned by a reading callback.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackError(pub String);

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callback error: {}", self.0)
    }
}

impl std::error::Error for CallbackError {}

/// Callback invoked once per produced reading.
pub type ReadingCallback = Box<dyn Fn(&Reading) -> Result<(), CallbackError> + Send + Sync>;

enum Subscriber {
    Callback(ReadingCallback),
    Channel(mpsc::Sender<Reading>),
}

/// Subscriber list for one sensor.
pub struct Notifier {
    sensor_id: String,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl Notifier {
    pub fn new(sensor_id: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register a callback.
    pub fn register_callback(&self, callback: ReadingCallback) {
        self.push(Subscriber::Callback(callback));
    }

    /// Forward every reading into `sender`.
    pub fn register_channel(&self, sender: mpsc::Sender<Reading>) {
        self.push(Subscriber::Channel(sender));
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }

    fn push(&self, subscriber: Subscriber) {
        match self.subscribers.write() {
            Ok(mut subscribers) => subscribers.push(subscriber),
            Err(poisoned) => poisoned.into_inner().push(subscriber),
        }
    }

    /// Deliver `reading` to every subscriber.
    ///
    /// Callback errors and panics are logged. Full channels drop the reading
    /// for that subscriber only; closed channels are pruned.
    pub fn notify(&self, reading: &Reading) {
        let mut saw_closed = false;
        {
            let subscribers = match self.subscribers.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for subscriber in subscribers.iter() {
                match subscriber {
                    Subscriber::Callback(callback) => {
                        match catch_unwind(AssertUnwindSafe(|| callback(reading))) {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                tracing::warn!(sensor = %self.sensor_id, "{e}");
                            }
                            Err(_) => {
                                tracing::error!(
                                    sensor = %self.sensor_id,
                                    "reading callback panicked"
                                );
                            }
                        }
                    }
                    Subscriber::Channel(sender) => match sender.try_send(reading.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(
                                sensor = %self.sensor_id,
                                "subscriber channel full, reading dropped"
                            );
                        }
                        Err(TrySendError::Closed(_)) => saw_closed = true,
                    },
                }
            }
        }

        if saw_closed {
            if let Ok(mut subscribers) = self.subscribers.write() {
                subscribers.retain(|s| match s {
                    Subscriber::Channel(sender) => !sender.is_closed(),
                    Subscriber::Callback(_) => true,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::types::{ReadingValue, SensorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn reading() -> Reading {
        Reading::new("t", SensorKind::Temperature, ReadingValue::Scalar(21.0), "°C", 1.0)
    }

    #[test]
    fn test_failing_callbacks_are_isolated() {
        let notifier = Notifier::new("t");
        let delivered = Arc::new(AtomicUsize::new(0));

        notifier.register_callback(Box::new(|_| Err(CallbackError::new("boom"))));
        notifier.register_callback(Box::new(|_| panic!("callback panic")));
        let counter = delivered.clone();
        notifier.register_callback(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        notifier.notify(&reading());
        notifier.notify(&reading());
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_channel_delivery_and_pruning() {
        let notifier = Notifier::new("t");
        let (tx, mut rx) = mpsc::channel(4);
        let (closed_tx, closed_rx) = mpsc::channel(4);
        notifier.register_channel(tx);
        notifier.register_channel(closed_tx);
        drop(closed_rx);
        assert_eq!(notifier.subscriber_count(), 2);

        notifier.notify(&reading());
        assert_eq!(rx.try_recv().unwrap().sensor_id, "t");
        assert_eq!(notifier.subscriber_count(), 1);
    }

    #[test]
    fn test_full_channel_drops_reading() {
        let notifier = Notifier::new("t");
        let (tx, mut rx) = mpsc::channel(1);
        notifier.register_channel(tx);

        notifier.notify(&reading());
        notifier.notify(&reading());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(notifier.subscriber_count(), 1);
    }
}
