//! The bridge's single "closed exactly once" broadcast: a `watch` channel
//! so handlers can `select!` against shutdown instead of spin-polling an
//! atomic flag.

use tokio::sync::watch;

/// Held by the shutdown coordinator. Dropping this after calling
/// [`Shutdown::trigger`] is what actually closes the channel; the
/// coordinator keeps it alive for the process lifetime.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Held by every stream task. Cheap to clone; `cancelled()` resolves once
/// the coordinator calls [`ShutdownHandle::trigger`].
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered. Intended for
    /// `tokio::select!` alongside a stream's next I/O operation.
    pub async fn cancelled(&mut self) {
        if self.is_triggered() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_trigger() {
        let (handle, mut shutdown) = channel();
        assert!(!shutdown.is_triggered());
        handle.trigger();
        shutdown.cancelled().await;
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_if_already_triggered() {
        let (handle, mut shutdown) = channel();
        handle.trigger();
        tokio::time::timeout(std::time::Duration::from_millis(50), shutdown.cancelled())
            .await
            .expect("cancelled() should not block once already triggered");
    }
}
