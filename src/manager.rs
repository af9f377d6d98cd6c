use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::{
    address::ServerAddress,
    error::{Error, Result},
    event::{EventSink, SdamEvent},
    options::TopologyOptions,
    pool::{Pool, PoolFactory, PoolOptions},
    sdam::{
        description::{
            server::ServerDescription,
            topology::{self, TopologyDescription, UpdateEvent},
        },
        monitor::{Monitor, MonitorHandle, ObservationSink, Prober},
        public::ServerInfo,
    },
};

enum ManagerMessage {
    Submit(ServerDescription),
    Topology(oneshot::Sender<TopologyDescription>),
    ConnectionFor(ServerAddress, oneshot::Sender<Option<Arc<dyn Pool>>>),
    Stop(oneshot::Sender<()>),
}

/// A handle to a running [`TopologyManager`] actor.
///
/// All mutation of the topology happens on a single task; every method here posts a message
/// to that task and awaits its reply, so the manager's internal state is never shared by
/// reference across threads.
#[derive(Clone)]
pub struct TopologyManager {
    sender: mpsc::Sender<ManagerMessage>,
}

impl TopologyManager {
    /// Validates `options`, then starts the manager task and opens a monitor and pool for
    /// every seed. Returns a configuration error and allocates nothing if validation fails.
    pub async fn start(
        options: TopologyOptions,
        event_sink: Arc<dyn EventSink>,
        pool_factory: Arc<dyn PoolFactory>,
        prober: Arc<dyn Prober>,
    ) -> Result<Self> {
        options.validate()?;

        let seed_count = options.seeds.len();
        let description = TopologyDescription::new(&options);
        let (sender, receiver) = mpsc::channel(64);

        let actor = Actor {
            description,
            monitors: HashMap::new(),
            pools: HashMap::new(),
            event_sink,
            pool_factory,
            prober,
            sink: Arc::new(ManagerSink {
                sender: sender.clone(),
            }),
            seed_count,
            heartbeat_frequency: options.heartbeat_frequency,
            connect_timeout: options.connect_timeout,
            database: options.database,
        };

        crate::runtime::spawn(actor.run(receiver));

        Ok(Self { sender })
    }

    /// Returns a snapshot of the current topology description.
    pub async fn topology(&self) -> Result<TopologyDescription> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerMessage::Topology(tx))
            .await
            .map_err(|_| Error::shutting_down())?;
        rx.await.map_err(|_| Error::shutting_down())
    }

    /// Looks up the connection pool for `address`, or `None` if it was never admitted or has
    /// since been removed from the topology.
    pub async fn connection_for(&self, address: &ServerAddress) -> Result<Option<Arc<dyn Pool>>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerMessage::ConnectionFor(address.clone(), tx))
            .await
            .map_err(|_| Error::shutting_down())?;
        rx.await.map_err(|_| Error::shutting_down())
    }

    /// Submits an observation produced by a monitor (or a test double standing in for one).
    pub async fn submit(&self, description: ServerDescription) -> Result<()> {
        self.sender
            .send(ManagerMessage::Submit(description))
            .await
            .map_err(|_| Error::shutting_down())
    }

    /// Stops every monitor and pool, then the manager task itself. Idempotent: calling `stop`
    /// on an already-stopped manager returns `ShuttingDown` rather than panicking.
    pub async fn stop(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ManagerMessage::Stop(tx))
            .await
            .map_err(|_| Error::shutting_down())?;
        rx.await.map_err(|_| Error::shutting_down())
    }
}

/// Feeds `Submit` messages back into the manager's own channel; handed to every [`Monitor`] as
/// its [`ObservationSink`] so a monitor never needs to know the manager exists as anything
/// more than a place to report to.
struct ManagerSink {
    sender: mpsc::Sender<ManagerMessage>,
}

#[async_trait::async_trait]
impl ObservationSink for ManagerSink {
    async fn submit(&self, description: ServerDescription) {
        let _ = self.sender.send(ManagerMessage::Submit(description)).await;
    }
}

struct Actor {
    description: TopologyDescription,
    monitors: HashMap<ServerAddress, MonitorHandle>,
    pools: HashMap<ServerAddress, Arc<dyn Pool>>,
    event_sink: Arc<dyn EventSink>,
    pool_factory: Arc<dyn PoolFactory>,
    prober: Arc<dyn Prober>,
    sink: Arc<ManagerSink>,
    seed_count: usize,
    heartbeat_frequency: Duration,
    connect_timeout: Duration,
    database: String,
}

impl Actor {
    async fn run(mut self, mut receiver: mpsc::Receiver<ManagerMessage>) {
        self.event_sink.emit(SdamEvent::TopologyOpening);
        let mut initial = self.description.clone();
        self.reconcile(&mut initial).await;
        self.description = initial;

        while let Some(message) = receiver.recv().await {
            match message {
                ManagerMessage::Submit(observed) => self.handle_submit(observed).await,
                ManagerMessage::Topology(reply) => {
                    let _ = reply.send(self.description.clone());
                }
                ManagerMessage::ConnectionFor(address, reply) => {
                    let _ = reply.send(self.pools.get(&address).cloned());
                }
                ManagerMessage::Stop(reply) => {
                    self.handle_stop().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    async fn handle_submit(&mut self, observed: ServerDescription) {
        let (mut next, update_events) = topology::update(&self.description, observed, self.seed_count);

        self.reconcile(&mut next).await;

        for event in update_events {
            match event {
                UpdateEvent::ServerChanged {
                    address,
                    previous,
                    new,
                } => {
                    // A force-checked address may have been coerced to Unknown by reconcile's
                    // pool-open failure path after the diff was computed; re-check membership.
                    if next.servers.contains_key(&address) {
                        self.event_sink.emit(SdamEvent::ServerDescriptionChanged {
                            address,
                            previous,
                            new,
                        });
                    }
                }
                UpdateEvent::ForceCheck(address) => {
                    if let Some(monitor) = self.monitors.get(&address) {
                        monitor.force_check();
                    }
                }
            }
        }

        if next != self.description {
            self.event_sink.emit(SdamEvent::TopologyDescriptionChanged {
                previous: self.description.clone(),
                new: next.clone(),
            });
        }

        self.description = next;
    }

    async fn handle_stop(&mut self) {
        for (address, monitor) in self.monitors.drain() {
            monitor.stop().await;
            if let Some(pool) = self.pools.remove(&address) {
                self.pool_factory.close(&*pool);
            }
            self.event_sink.emit(SdamEvent::ServerClosed { address });
        }
        self.event_sink.emit(SdamEvent::TopologyClosed);
    }

    /// Brings the monitor and pool sets in line with `next.servers`. Opening a pool can fail;
    /// per the core's design notes this is not fatal to the manager, only to the address being
    /// admitted, so a failure removes it from `next` and the pass is retried until it
    /// converges. Calling this twice in a row with the same `next` is a no-op.
    async fn reconcile(&mut self, next: &mut TopologyDescription) {
        loop {
            let current: HashSet<ServerAddress> = self.monitors.keys().cloned().collect();
            let wanted: HashSet<ServerAddress> = next.servers.keys().cloned().collect();

            for address in current.difference(&wanted).cloned().collect::<Vec<_>>() {
                if let Some(monitor) = self.monitors.remove(&address) {
                    monitor.stop().await;
                }
                if let Some(pool) = self.pools.remove(&address) {
                    self.pool_factory.close(&*pool);
                }
                self.event_sink.emit(SdamEvent::ServerClosed {
                    address: address.clone(),
                });
            }

            let mut pool_open_failed = false;
            for address in wanted.difference(&current).cloned().collect::<Vec<_>>() {
                self.event_sink.emit(SdamEvent::ServerOpening {
                    address: address.clone(),
                });

                let pool_options = PoolOptions {
                    database: self.database.clone(),
                    address: address.clone(),
                    connect_timeout: self.connect_timeout,
                };

                match self.pool_factory.open(&pool_options) {
                    Ok(pool) => {
                        self.pools.insert(address.clone(), pool);
                        let handle = Monitor::start(
                            address.clone(),
                            self.prober.clone(),
                            self.sink.clone(),
                            self.heartbeat_frequency,
                        );
                        self.monitors.insert(address.clone(), handle);
                    }
                    Err(e) => {
                        tracing::warn!(
                            address = %address,
                            error = %e,
                            "failed to open connection pool; removing server from topology"
                        );
                        next.servers.remove(&address);
                        self.event_sink.emit(SdamEvent::ServerClosed {
                            address: address.clone(),
                        });
                        pool_open_failed = true;
                        break;
                    }
                }
            }

            if !pool_open_failed {
                break;
            }
        }
    }
}

/// Returns a read-only view of every server currently tracked by `description`.
pub fn server_infos(description: &TopologyDescription) -> impl Iterator<Item = ServerInfo<'_>> {
    description.servers.values().map(ServerInfo::new)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        event::NoopEventSink,
        hello::{HelloCommandResponse, HelloReply},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct UnreachableProber;

    #[async_trait::async_trait]
    impl Prober for UnreachableProber {
        async fn check(&self, address: &ServerAddress) -> Result<HelloReply> {
            Err(Error::network(format!("no route to {address}")))
        }
    }

    struct FakePool;
    impl Pool for FakePool {
        fn borrow(&self) -> Result<()> {
            Ok(())
        }
    }

    struct WorkingPoolFactory {
        opened: AtomicUsize,
    }

    impl PoolFactory for WorkingPoolFactory {
        fn open(&self, _options: &PoolOptions) -> Result<Arc<dyn Pool>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakePool))
        }

        fn close(&self, _pool: &dyn Pool) {}
    }

    struct FailingPoolFactory;
    impl PoolFactory for FailingPoolFactory {
        fn open(&self, _options: &PoolOptions) -> Result<Arc<dyn Pool>> {
            Err(Error::pool_open_failed("connection refused"))
        }

        fn close(&self, _pool: &dyn Pool) {}
    }

    fn seed_options(addr: &str) -> TopologyOptions {
        TopologyOptions {
            database: "test".into(),
            seeds: vec![ServerAddress::parse(addr).unwrap()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_opens_a_pool_per_seed() {
        let manager = TopologyManager::start(
            seed_options("h1:27017"),
            Arc::new(NoopEventSink),
            Arc::new(WorkingPoolFactory {
                opened: AtomicUsize::new(0),
            }),
            Arc::new(UnreachableProber),
        )
        .await
        .unwrap();

        let addr = ServerAddress::parse("h1:27017").unwrap();
        assert!(manager.connection_for(&addr).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn pool_open_failure_drops_the_server_without_failing_startup() {
        let manager = TopologyManager::start(
            seed_options("h1:27017"),
            Arc::new(NoopEventSink),
            Arc::new(FailingPoolFactory),
            Arc::new(UnreachableProber),
        )
        .await
        .unwrap();

        let topology = manager.topology().await.unwrap();
        assert!(topology.servers.is_empty());

        let addr = ServerAddress::parse("h1:27017").unwrap();
        assert!(manager.connection_for(&addr).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn submitting_a_standalone_observation_updates_the_topology() {
        let manager = TopologyManager::start(
            seed_options("h1:27017"),
            Arc::new(NoopEventSink),
            Arc::new(WorkingPoolFactory {
                opened: AtomicUsize::new(0),
            }),
            Arc::new(UnreachableProber),
        )
        .await
        .unwrap();

        let addr = ServerAddress::parse("h1:27017").unwrap();
        let observed = ServerDescription::from_hello_reply(
            addr.clone(),
            HelloReply {
                server_address: addr.clone(),
                command_response: HelloCommandResponse {
                    is_writable_primary: Some(true),
                    ..Default::default()
                },
            },
            Duration::from_millis(1),
            None,
        );

        manager.submit(observed).await.unwrap();

        let topology = manager.topology().await.unwrap();
        assert_eq!(
            topology.topology_type,
            crate::sdam::description::topology::TopologyType::Single
        );
    }

    #[tokio::test]
    async fn stop_closes_every_monitor_and_pool() {
        let manager = TopologyManager::start(
            seed_options("h1:27017"),
            Arc::new(NoopEventSink),
            Arc::new(WorkingPoolFactory {
                opened: AtomicUsize::new(0),
            }),
            Arc::new(UnreachableProber),
        )
        .await
        .unwrap();

        manager.stop().await.unwrap();
        assert!(manager.topology().await.is_err());
    }
}
