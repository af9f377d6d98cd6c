use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::{
    address::ServerAddress,
    error::Error,
    hello::HelloReply,
    runtime,
    sdam::description::server::ServerDescription,
};

pub(crate) const MIN_HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(500);

/// Probes a single server and reports the result back to whatever owns this monitor.
///
/// The wire protocol handshake, command framing, and connection management live outside this
/// crate; a `Prober` is the seam at which that collaborator plugs in. `check` takes a
/// previously-known description only to let a test double emulate the stateful reconnect
/// behavior a real implementation has (reuse a warm connection, reopen on the previous probe's
/// failure).
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn check(&self, address: &ServerAddress) -> Result<HelloReply, Error>;
}

/// Submits observations produced by a [`Monitor`] back to the topology manager that owns it.
#[async_trait::async_trait]
pub trait ObservationSink: Send + Sync {
    async fn submit(&self, description: ServerDescription);
}

/// A handle to a running monitor, held by the topology manager's reconciler.
pub(crate) struct MonitorHandle {
    force_check: Arc<Notify>,
    stopped: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl MonitorHandle {
    /// Wakes the monitor immediately if it is sleeping between probes; a no-op if it is
    /// already mid-probe, since that probe will report fresh state shortly regardless.
    pub(crate) fn force_check(&self) {
        self.force_check.notify_one();
    }

    /// Cancels the monitor's loop and waits for its in-flight probe, if any, to be abandoned.
    pub(crate) async fn stop(self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.force_check.notify_one();
        let _ = self.task.await;
    }
}

/// Background worker that probes one server on a schedule and reports results to the
/// manager that spawned it.
///
/// Isolated from the application's connection pool: a monitor that cannot reach its server
/// never competes with the pool for connections, and a pool failure never stalls a monitor.
pub(crate) struct Monitor {
    address: ServerAddress,
    prober: Arc<dyn Prober>,
    sink: Arc<dyn ObservationSink>,
    heartbeat_frequency: Duration,
    force_check: Arc<Notify>,
    stopped: Arc<AtomicBool>,
    previous_rtt: Option<Duration>,
    previously_available: bool,
}

impl Monitor {
    /// Spawns the monitor's loop and returns a handle the manager uses to force a check or
    /// stop it.
    pub(crate) fn start(
        address: ServerAddress,
        prober: Arc<dyn Prober>,
        sink: Arc<dyn ObservationSink>,
        heartbeat_frequency: Duration,
    ) -> MonitorHandle {
        let force_check = Arc::new(Notify::new());
        let stopped = Arc::new(AtomicBool::new(false));

        let monitor = Monitor {
            address,
            prober,
            sink,
            heartbeat_frequency,
            force_check: force_check.clone(),
            stopped: stopped.clone(),
            previous_rtt: None,
            previously_available: false,
        };

        let task = runtime::spawn(monitor.execute());

        MonitorHandle {
            force_check,
            stopped,
            task,
        }
    }

    async fn execute(mut self) {
        while !self.stopped.load(Ordering::SeqCst) {
            self.check_server().await;

            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            runtime::delay_for(MIN_HEARTBEAT_FREQUENCY).await;

            let remaining = self
                .heartbeat_frequency
                .saturating_sub(MIN_HEARTBEAT_FREQUENCY);
            let _ = runtime::timeout(remaining, self.force_check.notified()).await;
        }
    }

    /// Runs one probe, retrying once immediately on a network error if the server was
    /// previously considered available (a single blip shouldn't immediately flip a healthy
    /// server to Unknown).
    async fn check_server(&mut self) {
        let start = Instant::now();
        let mut result = self.prober.check(&self.address).await;

        if let Err(ref e) = result {
            if e.is_network_error() && self.previously_available {
                result = self.prober.check(&self.address).await;
            }
        }

        let description = match result {
            Ok(reply) => {
                let rtt = start.elapsed();
                let description = ServerDescription::from_hello_reply(
                    self.address.clone(),
                    reply,
                    rtt,
                    self.previous_rtt,
                );
                self.previous_rtt = description.average_round_trip_time;
                self.previously_available = true;
                description
            }
            Err(e) => {
                self.previous_rtt = None;
                self.previously_available = false;
                ServerDescription::from_error(self.address.clone(), e)
            }
        };

        self.sink.submit(description).await;
    }
}
