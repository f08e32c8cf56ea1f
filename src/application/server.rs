//! Server lifecycle - ordered startup/shutdown of named worker tasks,
//! config reload, suspend/resume, signal handling, detached-service
//! notification.
//!
//! Grounded on `original_source/Server/server.cpp`'s thread-group model
//! (`Server::run`, `Server::stop`) and on spec.md §4.8/§9: named threads
//! become named tokio tasks; `emit changeConfig`/`aboutToSuspend`/
//! `aboutToResume` become variants on one `tokio::sync::broadcast`
//! channel; the per-Context "started" handler becomes the `oneshot` a
//! Context's `run()` fires once its transport binds (§4.8).

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// The channel-based replacement for the original's cross-thread signals
/// (§9): every subscriber keeps its own cached copy and swaps it
/// atomically when a new snapshot arrives.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A reloaded, merged configuration snapshot.
    ConfigChanged,
    AboutToSuspend,
    AboutToResume,
}

/// One named worker task, registered during START with an ordering
/// integer; groups start in ascending order and stop in descending order
/// (§4.8).
pub struct ThreadSpec {
    pub name: String,
    pub order: i32,
    pub future: Pin<Box<dyn Future<Output = ()> + Send>>,
    /// Fires once the task has completed its own startup (e.g. a
    /// Context's transport bind). Groups wait for every member's
    /// `started` before the next group begins.
    pub started: Option<oneshot::Receiver<()>>,
}

impl ThreadSpec {
    pub fn new(name: impl Into<String>, order: i32, future: impl Future<Output = ()> + Send + 'static) -> Self {
        Self { name: name.into(), order, future: Box::pin(future), started: None }
    }

    pub fn with_started(mut self, started: oneshot::Receiver<()>) -> Self {
        self.started = Some(started);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("no Context came up within the startup grace window")]
    NoContextStarted,
}

/// Ordered startup/shutdown supervisor. Phases: `START -> UP ->
/// (SUSPENDED <-> UP)* -> DOWN` (§4.8).
pub struct Server {
    pending: Vec<ThreadSpec>,
    running: Vec<(String, i32, JoinHandle<()>)>,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
}

impl Server {
    pub fn new() -> Self {
        let (lifecycle_tx, _) = broadcast::channel(16);
        Self { pending: Vec::new(), running: Vec::new(), lifecycle_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_tx.subscribe()
    }

    /// Registers a named task during START. Call before `start()`.
    pub fn spawn(&mut self, spec: ThreadSpec) {
        self.pending.push(spec);
    }

    /// Starts all registered tasks in ascending-order groups, waiting for
    /// each group's `started` acknowledgements before the next group
    /// begins. Fails fatally only if zero Context tasks (named with a
    /// `context:` prefix) report started within `grace`.
    pub async fn start(&mut self, grace: Duration) -> Result<(), ServerError> {
        let mut groups: BTreeMap<i32, Vec<ThreadSpec>> = BTreeMap::new();
        for spec in self.pending.drain(..) {
            groups.entry(spec.order).or_default().push(spec);
        }

        let mut any_context_started = false;
        let mut saw_context = false;

        for (order, group) in groups {
            let mut starts = Vec::new();
            for spec in group {
                let name = spec.name.clone();
                let is_context = name.starts_with("context:");
                saw_context |= is_context;
                let handle = tokio::spawn(spec.future);
                self.running.push((name.clone(), order, handle));
                if let Some(rx) = spec.started {
                    starts.push((name, is_context, rx));
                }
            }
            for (name, is_context, rx) in starts {
                match tokio::time::timeout(grace, rx).await {
                    Ok(Ok(())) => {
                        info!(thread = %name, "started");
                        if is_context {
                            any_context_started = true;
                        }
                    }
                    _ => warn!(thread = %name, "did not report started within the grace window"),
                }
            }
        }

        if saw_context && !any_context_started {
            error!("no Context came up within the startup grace window");
            return Err(ServerError::NoContextStarted);
        }
        Ok(())
    }

    /// Stops all tasks in descending-order groups, waiting up to
    /// `deadline` total for them to drain before forcing the rest
    /// (§5, 5 s / 50 x 100 ms default).
    pub async fn shutdown(&mut self, deadline: Duration) {
        let mut groups: BTreeMap<i32, Vec<(String, JoinHandle<()>)>> = BTreeMap::new();
        for (name, order, handle) in self.running.drain(..) {
            groups.entry(order).or_default().push((name, handle));
        }

        let deadline_at = tokio::time::Instant::now() + deadline;
        for (_order, group) in groups.into_iter().rev() {
            for (name, handle) in group {
                let remaining = deadline_at.saturating_duration_since(tokio::time::Instant::now());
                if tokio::time::timeout(remaining, handle).await.is_err() {
                    warn!(thread = %name, "did not drain in time, aborting");
                }
            }
        }
    }

    pub fn notify_config_changed(&self) {
        let _ = self.lifecycle_tx.send(LifecycleEvent::ConfigChanged);
    }

    pub fn notify_suspend(&self) {
        let _ = self.lifecycle_tx.send(LifecycleEvent::AboutToSuspend);
    }

    pub fn notify_resume(&self) {
        let _ = self.lifecycle_tx.send(LifecycleEvent::AboutToResume);
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// POSIX signal loop: SIGTERM/SIGINT shut down with the signal number as
/// exit code; SIGHUP reloads config (§4.8, §5).
#[cfg(unix)]
pub async fn wait_for_signal() -> SignalOutcome {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("SIGINT handler");
    let mut hup = signal(SignalKind::hangup()).expect("SIGHUP handler");

    tokio::select! {
        _ = term.recv() => SignalOutcome::Shutdown(15),
        _ = int.recv() => SignalOutcome::Shutdown(2),
        _ = hup.recv() => SignalOutcome::Reload,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Shutdown(i32),
    Reload,
}

/// Minimal `sd_notify(3)` protocol writer: sends `READY=1`, `STOPPING=1`,
/// or `STATUS=<text>` datagrams to the supervising service manager's
/// `NOTIFY_SOCKET`, when set. No crate in the retrieval pack wraps this
/// narrow protocol, so it is hand-rolled (§4.8 expansion).
#[cfg(unix)]
pub struct ServiceNotifier {
    socket: Option<std::os::unix::net::UnixDatagram>,
}

#[cfg(unix)]
impl ServiceNotifier {
    pub fn from_env() -> Self {
        let socket = std::env::var("NOTIFY_SOCKET").ok().and_then(|path| {
            std::os::unix::net::UnixDatagram::unbound().ok().and_then(|sock| sock.connect(&path).ok().map(|_| sock))
        });
        Self { socket }
    }

    fn send(&self, message: &str) {
        if let Some(socket) = &self.socket {
            if let Err(e) = socket.send(message.as_bytes()) {
                warn!(error = %e, "sd_notify send failed");
            }
        }
    }

    pub fn ready(&self) {
        self.send("READY=1");
    }

    pub fn stopping(&self) {
        self.send("STOPPING=1");
    }

    pub fn status(&self, text: &str) {
        self.send(&format!("STATUS={}", text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_runs_groups_in_ascending_order_and_waits_for_started() {
        let mut server = Server::new();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();

        server.spawn(ThreadSpec::new("context:a", 0, async move {
            let _ = tx_a.send(());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }).with_started(rx_a));
        server.spawn(ThreadSpec::new("manager", 1, async move {
            let _ = tx_b.send(());
        }).with_started(rx_b));

        server.start(Duration::from_millis(200)).await.unwrap();
        server.shutdown(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn start_fails_when_no_context_reports_started() {
        let mut server = Server::new();
        let (_tx, rx) = oneshot::channel::<()>();
        server.spawn(ThreadSpec::new("context:a", 0, async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }).with_started(rx));

        let result = server.start(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ServerError::NoContextStarted)));
        server.shutdown(Duration::from_millis(10)).await;
    }
}
