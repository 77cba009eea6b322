//! Process-wide shutdown coordination.
//!
//! A single [`Shutdown`] is constructed once per process and cloned into
//! every worker and task. It wraps a `tokio::sync::watch` channel rather
//! than a bare `AtomicBool`: clones observe the flip with a memory barrier,
//! and `cancelled()` doubles as an awaitable suspension point so tasks can
//! race it against I/O instead of polling.

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Raise the shutdown signal. Idempotent.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// True if shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// A handle tasks can `.await` or race against other futures via
    /// `tokio::select!`.
    pub fn watch(&self) -> ShutdownWatch {
        ShutdownWatch {
            rx: self.tx.subscribe(),
        }
    }

    /// Install SIGTERM/SIGINT handlers that trigger this shutdown. Must be
    /// called once, from the service harness, before workers start.
    #[cfg(unix)]
    pub fn install_signal_handlers(&self) -> anyhow::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let shutdown = self.clone();
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
            shutdown.trigger();
        });
        Ok(())
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// A per-task view of a [`Shutdown`] that can be awaited.
#[derive(Debug, Clone)]
pub struct ShutdownWatch {
    rx: watch::Receiver<bool>,
}

impl ShutdownWatch {
    /// Resolves once shutdown has been triggered. Safe to call repeatedly
    /// and from many clones concurrently.
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        let _ = self.rx.changed().await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn watchers_observe_trigger() {
        let shutdown = Shutdown::new();
        let mut watch = shutdown.watch();
        assert!(!watch.is_triggered());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_millis(100), watch.cancelled())
            .await
            .expect("watch should resolve once triggered");
        assert!(watch.is_triggered());
    }

    #[tokio::test]
    async fn multiple_clones_all_observe_trigger() {
        let shutdown = Shutdown::new();
        let watches: Vec<_> = (0..5).map(|_| shutdown.watch()).collect();
        shutdown.trigger();
        for mut w in watches {
            w.cancelled().await;
            assert!(w.is_triggered());
        }
    }
}
