//! Run command implementation.

use super::{config, connect, controller, prepare};
use crate::Target;
use filesync_engine::{Dispatcher, ManifestWatcher, WorkQueue};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Waits for Ctrl-C or, on Unix, SIGTERM.
///
/// Must be installed inside a Tokio runtime context.
pub struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    /// Registers the signal handlers.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    /// Resolves with the name of the first signal received.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> io::Result<&'static str> {
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = self.terminate.recv() => Ok("SIGTERM"),
        }
    }

    /// Resolves with the name of the first signal received.
    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> io::Result<&'static str> {
        tokio::signal::ctrl_c().await.map(|()| "Ctrl-C")
    }
}

/// Runs the controller until Ctrl-C or SIGTERM.
pub fn run(
    target: &Target,
    workers: usize,
    poll_interval_ms: u64,
    fetch_timeout_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = connect(target)?;
    let key = source.key_for(&target.manifest)?;
    let config = config(target, fetch_timeout_secs).with_workers(workers);
    let reconciler = controller(Arc::clone(&source), config.clone())?;
    let _lock = prepare(target)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let mut shutdown = {
        let _context = runtime.enter();
        ShutdownSignal::install()?
    };

    let queue = Arc::new(WorkQueue::from_config(&config));
    let dispatcher = Dispatcher::new(reconciler, Arc::clone(&queue), config.workers);
    dispatcher.start()?;

    // Initial sync, even if the manifest does not exist yet
    queue.add(key.clone());
    let mut watcher = ManifestWatcher::spawn(
        source,
        vec![key.clone()],
        queue.clone(),
        Duration::from_millis(poll_interval_ms.max(1)),
    )?;

    info!(
        %key,
        download_path = %target.download_path.display(),
        workers = config.workers,
        "Controller started"
    );

    let signal = runtime.block_on(shutdown.recv())?;

    info!(signal, "Shutting down");
    watcher.stop();
    dispatcher.shutdown();

    let stats = dispatcher.stats();
    info!(
        succeeded = stats.succeeded,
        failed = stats.failed,
        panicked = stats.panicked,
        "Controller stopped"
    );
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn sigterm_triggers_shutdown() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut shutdown = {
            let _context = runtime.enter();
            ShutdownSignal::install().unwrap()
        };

        let status = Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let received = runtime
            .block_on(async {
                tokio::time::timeout(Duration::from_secs(5), shutdown.recv()).await
            })
            .unwrap()
            .unwrap();
        assert_eq!(received, "SIGTERM");
    }
}
