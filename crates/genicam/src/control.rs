//! Control-lost notification shared between a device and its transport.
//!
//! Transports raise the notification from whatever thread detects the loss
//! (heartbeat monitor, link watcher). Observers receive it through a
//! broadcast channel, so raising never waits on observer code. One
//! notification is delivered per loss episode; [`ControlLostNotifier::rearm`]
//! starts a new episode once control is regained.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::device::DeviceError;

const CHANNEL_CAPACITY: usize = 16;

/// Payload-free control-lost event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlLost;

#[derive(Debug)]
struct Shared {
    sender: broadcast::Sender<ControlLost>,
    lost: AtomicBool,
}

/// Handle used to raise control-lost notifications.
#[derive(Debug, Clone)]
pub struct ControlLostNotifier {
    shared: Arc<Shared>,
}

impl Default for ControlLostNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlLostNotifier {
    /// Create a notifier with no subscribers and no open episode.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                sender,
                lost: AtomicBool::new(false),
            }),
        }
    }

    /// Report that exclusive control of the device was revoked.
    ///
    /// Returns `true` when this call opened a new episode and the event was
    /// broadcast, `false` when the episode had already been reported.
    pub fn notify(&self) -> bool {
        if self.shared.lost.swap(true, Ordering::AcqRel) {
            debug!("control loss already reported for this episode");
            return false;
        }
        let receivers = self.shared.sender.send(ControlLost).unwrap_or(0);
        warn!(receivers, "device control lost");
        true
    }

    /// Mark control as regained so the next loss is reported again.
    pub fn rearm(&self) {
        if self.shared.lost.swap(false, Ordering::AcqRel) {
            info!("device control regained");
        }
    }

    /// Whether the current episode has been reported and not rearmed.
    pub fn is_lost(&self) -> bool {
        self.shared.lost.load(Ordering::Acquire)
    }

    /// New receiver seeing every notification raised after this call.
    pub fn subscribe(&self) -> ControlLostReceiver {
        ControlLostReceiver {
            receiver: self.shared.sender.subscribe(),
        }
    }

    /// Spawn an observer thread invoking `callback` once per notification.
    ///
    /// The thread exits when every notifier clone has been dropped.
    pub fn observe<F>(&self, mut callback: F) -> Result<JoinHandle<()>, DeviceError>
    where
        F: FnMut() + Send + 'static,
    {
        let mut receiver = self.subscribe();
        let handle = thread::Builder::new()
            .name("control-lost".into())
            .spawn(move || {
                while receiver.blocking_recv().is_some() {
                    callback();
                }
                debug!("control-lost observer finished");
            })?;
        Ok(handle)
    }
}

/// Receiving end of the control-lost notification.
#[derive(Debug)]
pub struct ControlLostReceiver {
    receiver: broadcast::Receiver<ControlLost>,
}

impl ControlLostReceiver {
    /// Wait for the next notification. `None` once every notifier is gone.
    pub async fn recv(&mut self) -> Option<ControlLost> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "control-lost receiver lagged");
                Some(ControlLost)
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Blocking variant of [`recv`](Self::recv) for plain threads.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_recv(&mut self) -> Option<ControlLost> {
        match self.receiver.blocking_recv() {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "control-lost receiver lagged");
                Some(ControlLost)
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Take a pending notification without waiting.
    pub fn try_recv(&mut self) -> Option<ControlLost> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Lagged(_)) => Some(ControlLost),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn notifies_once_per_episode() {
        let notifier = ControlLostNotifier::new();
        let mut rx = notifier.subscribe();
        assert!(notifier.notify());
        assert!(!notifier.notify());
        assert!(notifier.is_lost());
        assert_eq!(rx.try_recv(), Some(ControlLost));
        assert_eq!(rx.try_recv(), None);

        notifier.rearm();
        assert!(!notifier.is_lost());
        assert!(notifier.notify());
        assert_eq!(rx.try_recv(), Some(ControlLost));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn notify_without_subscribers_still_opens_episode() {
        let notifier = ControlLostNotifier::new();
        assert!(notifier.notify());
        assert!(!notifier.notify());
    }

    #[test]
    fn observer_runs_on_its_own_thread() {
        let notifier = ControlLostNotifier::new();
        let (tx, rx) = mpsc::channel();
        let handle = notifier
            .observe(move || {
                let name = thread::current().name().map(str::to_owned);
                tx.send(name).unwrap();
            })
            .expect("spawn observer");
        assert!(notifier.notify());
        let name = rx.recv_timeout(Duration::from_secs(2)).expect("observer ran");
        assert_eq!(name.as_deref(), Some("control-lost"));
        drop(notifier);
        handle.join().expect("observer exits after notifier drop");
    }

    #[test]
    fn slow_observer_does_not_block_notify() {
        let notifier = ControlLostNotifier::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let seen = Arc::clone(&calls);
        let handle = notifier
            .observe(move || {
                seen.fetch_add(1, Ordering::SeqCst);
                let _ = release_rx.recv();
            })
            .expect("spawn observer");
        assert!(notifier.notify());
        notifier.rearm();
        assert!(notifier.notify());
        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        drop(notifier);
        handle.join().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn async_receiver_sees_notification_and_close() {
        let notifier = ControlLostNotifier::new();
        let mut rx = notifier.subscribe();
        let raiser = notifier.clone();
        std::thread::spawn(move || {
            raiser.notify();
        })
        .join()
        .unwrap();
        assert_eq!(rx.recv().await, Some(ControlLost));
        drop(notifier);
        assert_eq!(rx.recv().await, None);
    }
}
