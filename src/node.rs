use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::error::Result;
use crate::gateway::{Event, GatewayServer, Reactor};
use crate::scheduler::JobOrchestrator;
use crate::stats::InMemoryStats;

/// The broker process: gateway, reactor and optional dashboard.
pub struct Broker {
    pub config: BrokerConfig,
    pub stats: Arc<InMemoryStats>,
}

/// Handles to a started broker's tasks.
pub struct RunningBroker {
    pub gateway_addr: SocketAddr,
    pub events: mpsc::Sender<Event>,
    reactor: JoinHandle<()>,
    gateway: JoinHandle<()>,
    dashboard: Option<JoinHandle<()>>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            stats: Arc::new(InMemoryStats::new()),
        }
    }

    /// Bind the gateway and spawn every subsystem.
    ///
    /// 1. Binds the TCP gateway (fails fast if the port is taken)
    /// 2. Spawns the reactor that owns the orchestrator
    /// 3. Spawns the accept loop feeding the reactor's event queue
    /// 4. Optionally spawns the dashboard, which reads through the same queue
    ///
    /// All tasks stop when `shutdown` is cancelled.
    pub async fn start(self, shutdown: CancellationToken) -> Result<RunningBroker> {
        let gateway =
            GatewayServer::bind(self.config.listen_addr, self.config.max_frame_bytes).await?;
        let gateway_addr = gateway.local_addr()?;

        let (events_tx, events_rx) = mpsc::channel(self.config.event_queue_capacity);

        let orchestrator = JobOrchestrator::new(self.config.scheduler.clone(), self.stats.clone());
        let reactor = tokio::spawn(Reactor::new(orchestrator).run(events_rx, shutdown.clone()));

        let gateway = tokio::spawn(gateway.run(events_tx.clone(), shutdown.clone()));

        let dashboard = self.config.dashboard_addr.map(|addr| {
            let state = DashboardState {
                events: events_tx.clone(),
                stats: self.stats.clone(),
            };
            tokio::spawn(run_dashboard(addr, state, shutdown.clone()))
        });

        tracing::info!(
            gateway_addr = %gateway_addr,
            dashboard_addr = ?self.config.dashboard_addr,
            verify = self.config.scheduler.verification.enabled,
            max_chunk_redispatches = ?self.config.scheduler.max_chunk_redispatches,
            "Broker started"
        );

        Ok(RunningBroker {
            gateway_addr,
            events: events_tx,
            reactor,
            gateway,
            dashboard,
        })
    }

    /// Start the broker and wait until it shuts down.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.start(shutdown).await?.join().await;
        Ok(())
    }
}

impl RunningBroker {
    /// Wait for every subsystem to stop.
    pub async fn join(self) {
        let RunningBroker {
            events,
            reactor,
            gateway,
            dashboard,
            ..
        } = self;
        // Our sender must not keep the reactor alive
        drop(events);

        let tasks = [
            ("gateway", Some(gateway)),
            ("dashboard", dashboard),
            ("reactor", Some(reactor)),
        ];
        for (name, handle) in tasks {
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    tracing::error!(task = name, error = %e, "Broker task panicked");
                }
            }
        }
    }
}
