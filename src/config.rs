use std::net::SocketAddr;

/// Default output-cell ceiling above which results are not cross-checked.
pub const DEFAULT_MAX_VERIFY_CELLS: usize = 1024;

/// Default ceiling on the cells of either operand or the product.
///
/// A `f64` needs at least eight bytes on the wire, so larger matrices could
/// never travel inside the default 100 MB frame anyway.
pub const DEFAULT_MAX_MATRIX_CELLS: usize = 100_000_000 / 8;

/// Configuration for reference verification of completed jobs.
///
/// Verification recomputes the full product on the broker, so it is only
/// attempted for jobs whose output has at most `max_cells` cells.
#[derive(Debug, Clone)]
pub struct VerificationConfig {
    /// Enable verification. If false, `max_cells` is ignored.
    pub enabled: bool,
    /// Largest `rows_a * cols_b` that will be verified.
    pub max_cells: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_cells: DEFAULT_MAX_VERIFY_CELLS,
        }
    }
}

impl VerificationConfig {
    pub fn enabled(max_cells: usize) -> Self {
        Self {
            enabled: true,
            max_cells,
        }
    }

    /// Whether a job producing `cells` output values should be verified.
    pub fn applies_to(&self, cells: usize) -> bool {
        self.enabled && cells <= self.max_cells
    }
}

/// Scheduling policy knobs for the job orchestrator.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub verification: VerificationConfig,
    /// How many times a single chunk may be re-queued after its worker
    /// disconnects before the whole job is aborted. `None` retries forever.
    pub max_chunk_redispatches: Option<u32>,
    /// Jobs whose A, B or result would exceed this many cells are rejected.
    pub max_matrix_cells: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            verification: VerificationConfig::default(),
            max_chunk_redispatches: None,
            max_matrix_cells: DEFAULT_MAX_MATRIX_CELLS,
        }
    }
}

impl SchedulerConfig {
    pub fn with_verification(mut self, verification: VerificationConfig) -> Self {
        self.verification = verification;
        self
    }

    pub fn with_max_chunk_redispatches(mut self, limit: u32) -> Self {
        self.max_chunk_redispatches = Some(limit);
        self
    }

    pub fn with_max_matrix_cells(mut self, cells: usize) -> Self {
        self.max_matrix_cells = cells;
        self
    }
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address the worker/client gateway listens on.
    pub listen_addr: SocketAddr,
    /// Address for the read-only HTTP dashboard, if enabled.
    pub dashboard_addr: Option<SocketAddr>,
    /// Capacity of the event queue feeding the reactor.
    pub event_queue_capacity: usize,
    /// Longest accepted wire frame (one JSON line), in bytes.
    pub max_frame_bytes: usize,
    pub scheduler: SchedulerConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 4000)),
            dashboard_addr: None,
            event_queue_capacity: 1024,
            max_frame_bytes: 100_000_000,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_dashboard(mut self, addr: SocketAddr) -> Self {
        self.dashboard_addr = Some(addr);
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }
}

/// Settings for a volunteer worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub broker_addr: SocketAddr,
    pub heartbeat_interval_ms: u64,
    /// Disconnect after completing this many tasks.
    pub max_tasks: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            broker_addr: SocketAddr::from(([127, 0, 0, 1], 4000)),
            heartbeat_interval_ms: 5000,
            max_tasks: None,
        }
    }
}

impl WorkerConfig {
    pub fn new(broker_addr: SocketAddr) -> Self {
        Self {
            broker_addr,
            ..Default::default()
        }
    }

    pub fn with_heartbeat_interval_ms(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    pub fn with_max_tasks(mut self, max_tasks: u64) -> Self {
        self.max_tasks = Some(max_tasks);
        self
    }
}
