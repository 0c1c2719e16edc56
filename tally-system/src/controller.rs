use std::io;
use std::time::Duration;

use tokio::sync::watch;

/// Shutdown request broadcast by the [`Controller`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Shutdown {
    /// How long services may take to finish pending work.
    ///
    /// `None` requests an immediate shutdown.
    pub timeout: Option<Duration>,
}

/// Determines how the [`Controller`] shuts down services.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownMode {
    /// Finish pending work within the configured timeout.
    Graceful,
    /// Stop as soon as possible.
    Immediate,
}

/// Notifies a service of a shutdown.
#[derive(Clone, Debug)]
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Returns the shutdown request if one has been issued.
    pub fn get(&self) -> Option<Shutdown> {
        *self.0.borrow()
    }

    /// Waits until a shutdown is requested.
    ///
    /// Resolves immediately if the shutdown was requested before the call. If the controller is
    /// dropped without requesting a shutdown, this never resolves.
    pub async fn notified(&mut self) -> Shutdown {
        loop {
            if let Some(shutdown) = *self.0.borrow_and_update() {
                return shutdown;
            }

            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Coordinates the shutdown of all services.
#[derive(Debug)]
pub struct Controller {
    sender: watch::Sender<Option<Shutdown>>,
    timeout: Duration,
}

impl Controller {
    /// Creates a controller granting `shutdown_timeout` for graceful shutdowns.
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender,
            timeout: shutdown_timeout,
        }
    }

    /// Returns a handle that resolves once shutdown is requested.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.sender.subscribe())
    }

    /// Requests all services to shut down.
    pub fn shutdown(&self, mode: ShutdownMode) {
        let timeout = match mode {
            ShutdownMode::Graceful => Some(self.timeout),
            ShutdownMode::Immediate => None,
        };

        self.sender.send_replace(Some(Shutdown { timeout }));
    }

    /// Waits for `SIGINT` or `SIGTERM` and requests the shutdown.
    ///
    /// `SIGINT` shuts down immediately, `SIGTERM` gracefully. Also resolves if the shutdown is
    /// requested through [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> io::Result<Shutdown> {
        let mut handle = self.handle();
        let terminate = terminate();
        tokio::pin!(terminate);

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tally_log::info!("SIGINT received, exiting");
                self.shutdown(ShutdownMode::Immediate);
            }
            result = &mut terminate => {
                result?;
                tally_log::info!("SIGTERM received, stopping in {}s", self.timeout.as_secs());
                self.shutdown(ShutdownMode::Graceful);
            }
            _ = handle.notified() => (),
        }

        Ok(handle.notified().await)
    }
}

#[cfg(unix)]
async fn terminate() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> io::Result<()> {
    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_notifies_handles() {
        let controller = Controller::new(Duration::from_secs(10));
        let mut first = controller.handle();
        let second = controller.handle();
        assert_eq!(first.get(), None);

        controller.shutdown(ShutdownMode::Graceful);

        let expected = Shutdown {
            timeout: Some(Duration::from_secs(10)),
        };
        assert_eq!(first.notified().await, expected);
        assert_eq!(second.get(), Some(expected));
    }

    #[tokio::test]
    async fn test_late_handle_sees_shutdown() {
        let controller = Controller::new(Duration::from_secs(10));
        controller.shutdown(ShutdownMode::Immediate);

        let mut handle = controller.handle();
        assert_eq!(handle.notified().await, Shutdown { timeout: None });
        // Remains resolved on repeated calls.
        assert_eq!(handle.notified().await, Shutdown { timeout: None });
    }

    #[tokio::test]
    async fn test_run_returns_on_manual_shutdown() {
        let controller = Controller::new(Duration::from_secs(1));

        let (result, ()) = tokio::join!(controller.run(), async {
            tokio::task::yield_now().await;
            controller.shutdown(ShutdownMode::Graceful);
        });

        assert_eq!(
            result.unwrap(),
            Shutdown {
                timeout: Some(Duration::from_secs(1))
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_notified_waits() {
        let controller = Controller::new(Duration::ZERO);
        let mut handle = controller.handle();

        let waited = tokio::time::timeout(Duration::from_secs(5), handle.notified()).await;
        assert!(waited.is_err());
    }
}
