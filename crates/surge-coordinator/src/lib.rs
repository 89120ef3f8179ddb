//! SURGE Coordinator - ramp scheduling and cluster metrics aggregation
//!
//! This crate implements the coordinating authority of a load-generation
//! fleet:
//! - Node registry: admission, removal, per-node report storage
//! - Ramp scheduler: time-paced load curve, fair per-node partitioning
//! - Metrics aggregator: staleness filtering, sums, averages, drop rate
//! - Engine: the single task that owns and mutates all of the above
//! - Transport: line-delimited JSON over TCP, framed with a length limit

pub mod aggregator;
pub mod codec;
pub mod config;
pub mod engine;
pub mod registry;
pub mod scheduler;
pub mod transport;
pub mod view;

pub use aggregator::*;
pub use codec::*;
pub use config::*;
pub use engine::*;
pub use registry::*;
pub use scheduler::*;
pub use transport::*;
pub use view::*;

use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::error;

use surge_core::{ReportRecord, SurgeError, SurgeResult};

/// Builder for a running coordinator
pub struct Coordinator {
    config: CoordinatorConfig,
    records: Option<mpsc::UnboundedSender<ReportRecord>>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Coordinator {
            config,
            records: None,
        }
    }

    /// Publish every accepted report on `records`
    pub fn with_records(mut self, records: mpsc::UnboundedSender<ReportRecord>) -> Self {
        self.records = Some(records);
        self
    }

    /// Validate the configuration, bind the worker listener and spawn the
    /// engine. Must be called inside a tokio runtime.
    pub async fn start(self) -> SurgeResult<CoordinatorHandle> {
        self.config.validate()?;

        let listener = NodeListener::bind(self.config.listen_addr)
            .await?
            .with_max_line_length(self.config.max_line_length);
        let local_addr = listener.local_addr();

        let view = MetricsView::new();
        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let mut engine = Engine::new(self.config, view.clone());
        if let Some(records) = self.records {
            engine = engine.with_records(records);
        }

        let engine_task = tokio::spawn(engine.run(events_rx, async move {
            let _ = shutdown_rx.await;
        }));
        let listener_task = tokio::spawn(listener.serve(events_tx));

        Ok(CoordinatorHandle {
            local_addr,
            view,
            shutdown: shutdown_tx,
            engine: engine_task,
            listener: listener_task,
        })
    }
}

/// Handle on a started coordinator
pub struct CoordinatorHandle {
    local_addr: SocketAddr,
    view: MetricsView,
    shutdown: oneshot::Sender<()>,
    engine: JoinHandle<EngineStats>,
    listener: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Address workers connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn view(&self) -> MetricsView {
        self.view.clone()
    }

    /// Whether the engine task is still running
    pub fn is_running(&self) -> bool {
        !self.engine.is_finished()
    }

    /// Stop accepting nodes, stop the engine and return its counters.
    /// Fails if the engine task ended abnormally.
    pub async fn shutdown(self) -> SurgeResult<EngineStats> {
        self.listener.abort();
        let _ = self.shutdown.send(());
        engine_outcome(self.engine.await)
    }
}

fn engine_outcome(joined: Result<EngineStats, JoinError>) -> SurgeResult<EngineStats> {
    joined.map_err(|e| {
        error!("coordinator engine failed: {}", e);
        SurgeError::EngineFailed(e.to_string())
    })
}
