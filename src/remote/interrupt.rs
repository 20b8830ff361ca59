//! Cooperative cancellation for remote calls

use std::sync::Arc;
use tokio::sync::watch;

/// Fires the paired [`Interrupt`]
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl InterruptHandle {
    /// Signal every clone of the paired interrupt
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Cancellation signal observed by in-flight remote calls
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

/// Create a connected handle and interrupt
pub fn interrupt_pair() -> (InterruptHandle, Interrupt) {
    let (tx, rx) = watch::channel(false);
    (InterruptHandle { tx: Arc::new(tx) }, Interrupt { rx })
}

impl Interrupt {
    /// An interrupt that never fires
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the interrupt fires
    ///
    /// Stays pending forever if the handle is dropped without firing.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::never()
    }
}
