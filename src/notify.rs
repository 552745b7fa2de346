//! Change notification: re-parse a source whenever it signals a change.
//!
//! Each [`Notifier`] gets its own worker task. The worker waits for a
//! signal, re-runs the notifier as a parser through the loader, and reports
//! the outcome on the consumer's channel.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LayerfigError, Result};
use crate::loader::{Destination, Inner, Loader};
use crate::parser::Parser;

/// A parser that can tell when its source changed.
#[async_trait]
pub trait Notifier: Parser {
    /// Channel of change signals. `Ok(())` asks for a re-parse; an `Err` is
    /// forwarded to the consumer as is. Closing the channel stops the worker.
    fn notify(&mut self) -> mpsc::Receiver<Result<()>>;

    /// Stop watching and release resources.
    async fn close(&mut self) -> Result<()>;
}

type SharedNotifier = Arc<AsyncMutex<Box<dyn Notifier>>>;

/// Running notifiers and their workers.
#[derive(Default)]
pub(crate) struct Coordinator {
    notifiers: Vec<SharedNotifier>,
    workers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl<T: Destination> Loader<T> {
    /// Start one worker per notifier. Results of re-parses, and errors the
    /// notifiers raise, are sent on `tx`.
    pub fn notify(&self, tx: mpsc::Sender<Result<()>>, notifiers: Vec<Box<dyn Notifier>>) {
        self.notify_with_context(CancellationToken::new(), tx, notifiers);
    }

    /// Like [`notify`](Self::notify), but the workers also stop once
    /// `cancel` fires. A re-parse already running completes.
    pub fn notify_with_context(
        &self,
        cancel: CancellationToken,
        tx: mpsc::Sender<Result<()>>,
        notifiers: Vec<Box<dyn Notifier>>,
    ) {
        let mut coordinator = self.inner.coordinator.lock();
        for mut notifier in notifiers {
            let signals = notifier.notify();
            let notifier: SharedNotifier = Arc::new(AsyncMutex::new(notifier));
            let worker = Worker {
                loader: Arc::downgrade(&self.inner),
                notifier: Arc::clone(&notifier),
                signals,
                tx: tx.clone(),
                cancel: cancel.clone(),
                shutdown: coordinator.shutdown.clone(),
            };
            coordinator.notifiers.push(notifier);
            coordinator.workers.push(tokio::spawn(worker.run()));
        }
    }

    /// Close every notifier and wait for the workers to stop.
    ///
    /// Returns [`LayerfigError::Close`] listing each notifier that failed to
    /// close. Calling this without a prior [`notify`](Self::notify) is fine.
    pub async fn close(&self) -> Result<()> {
        let (notifiers, workers, shutdown) = {
            let mut coordinator = self.inner.coordinator.lock();
            (
                std::mem::take(&mut coordinator.notifiers),
                std::mem::take(&mut coordinator.workers),
                std::mem::take(&mut coordinator.shutdown),
            )
        };

        let mut errors = Vec::new();
        for notifier in notifiers {
            if let Err(e) = notifier.lock().await.close().await {
                warn!(error = %e, "Notifier failed to close");
                errors.push(e);
            }
        }

        shutdown.cancel();
        for worker in workers {
            if let Err(e) = worker.await {
                errors.push(LayerfigError::parser(e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LayerfigError::Close(errors))
        }
    }
}

struct Worker<T> {
    loader: Weak<Inner<T>>,
    notifier: SharedNotifier,
    signals: mpsc::Receiver<Result<()>>,
    tx: mpsc::Sender<Result<()>>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
}

impl<T: Destination> Worker<T> {
    async fn run(mut self) {
        loop {
            let signal = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
                signal = self.signals.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
            };

            let result = match signal {
                Ok(()) => {
                    let Some(inner) = self.loader.upgrade() else {
                        break;
                    };
                    let loader = Loader { inner };
                    let mut notifier = self.notifier.lock().await;
                    loader.reparse(&mut **notifier).await
                }
                Err(e) => Err(e),
            };

            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
                sent = self.tx.send(result) => sent,
            };
            if sent.is_err() {
                break;
            }
        }
        debug!("Notification worker stopped");
    }
}
