//! Fleet of simulated workers

use std::net::SocketAddr;
use std::time::Duration;

use surge_core::{NodeId, SurgeResult};

use crate::profile::{QoeProfile, ReportGenerator};
use crate::worker::{Directive, SimulatedWorker, DEFAULT_RECV_TIMEOUT};

/// Several workers connected to the same coordinator, in admission order
pub struct Fleet {
    workers: Vec<SimulatedWorker>,
    generators: Vec<ReportGenerator>,
}

impl Fleet {
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.workers.iter().map(SimulatedWorker::node_id).collect()
    }

    pub fn worker(&mut self, idx: usize) -> &mut SimulatedWorker {
        &mut self.workers[idx]
    }

    /// Wait for one directive on every worker, in admission order
    pub async fn next_directives(&mut self) -> SurgeResult<Vec<Option<Directive>>> {
        let mut out = Vec::with_capacity(self.workers.len());
        for worker in &mut self.workers {
            out.push(worker.next_directive().await?);
        }
        Ok(out)
    }

    /// Every worker reports its current target with generated figures
    pub async fn report_all(&mut self) -> SurgeResult<()> {
        for (worker, generator) in self.workers.iter_mut().zip(self.generators.iter_mut()) {
            worker.report_with(generator).await?;
        }
        Ok(())
    }

    /// Disconnect the worker at `idx`
    pub async fn disconnect(&mut self, idx: usize) -> SurgeResult<NodeId> {
        let worker = self.workers.remove(idx);
        self.generators.remove(idx);
        let id = worker.node_id();
        worker.close().await?;
        Ok(id)
    }
}

/// Fleet builder
pub struct FleetBuilder {
    nodes: usize,
    profile: QoeProfile,
    seed: u64,
    recv_timeout: Duration,
}

impl FleetBuilder {
    pub fn new() -> Self {
        FleetBuilder {
            nodes: 1,
            profile: QoeProfile::default(),
            seed: 0,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
        }
    }

    /// Number of workers to connect
    pub fn with_nodes(mut self, count: usize) -> Self {
        self.nodes = count;
        self
    }

    /// QoE figures the workers report
    pub fn with_profile(mut self, profile: QoeProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Base RNG seed; worker `i` uses `seed + i`
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Connect the workers one after another so admission order is known
    pub async fn connect(self, addr: SocketAddr) -> SurgeResult<Fleet> {
        let mut workers = Vec::with_capacity(self.nodes);
        let mut generators = Vec::with_capacity(self.nodes);
        for i in 0..self.nodes {
            let worker = SimulatedWorker::connect(addr)
                .await?
                .with_recv_timeout(self.recv_timeout);
            workers.push(worker);
            generators.push(ReportGenerator::with_seed(
                self.profile.clone(),
                self.seed + i as u64,
            ));
        }
        Ok(Fleet {
            workers,
            generators,
        })
    }
}

impl Default for FleetBuilder {
    fn default() -> Self {
        Self::new()
    }
}
