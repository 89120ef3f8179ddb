//! Ramp scheduler
//!
//! Walks the load curve one step per interval. Each step's cluster-wide
//! target is split across the live nodes in admission order:
//!
//! ```text
//! base      = T / N
//! remainder = T % N
//! target[i] = base + 1  if i < remainder
//!             base      otherwise
//! ```
//!
//! A step that falls due while no node is connected is held, never skipped:
//! the scheduler backs off and evaluates the same step again. This applies to
//! every step, not only the first one.
//!
//! The scheduler is a pure state machine. The engine owns the timer and calls
//! [`RampScheduler::on_tick`] when the returned delay elapses.

use std::time::Duration;

use serde::Serialize;

use surge_core::NodeId;

use crate::config::RampPlan;

/// Scheduler lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// A step is due but no node is connected
    WaitingForNodes,
    /// Steps are being shipped
    Stepping,
    /// Every step has shipped; terminal
    Done,
}

/// Outcome of one scheduler evaluation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tick {
    /// Directives for `step`, one per live node in admission order
    Ship {
        step: usize,
        total: u64,
        assignments: Vec<(NodeId, u64)>,
        /// Delay before the next evaluation; `None` after the last step
        next: Option<Duration>,
    },
    /// No nodes; `step` is retried after `retry`
    Stall { step: usize, retry: Duration },
    /// Nothing left to ship
    Done,
}

/// Split `total` across `n` nodes.
///
/// The result sums to `total` exactly; the first `total % n` entries receive
/// one extra client. Returns an empty vector when `n == 0`.
pub fn partition(total: u64, n: usize) -> Vec<u64> {
    if n == 0 {
        return Vec::new();
    }
    let base = total / n as u64;
    let remainder = (total % n as u64) as usize;
    (0..n)
        .map(|idx| if idx < remainder { base + 1 } else { base })
        .collect()
}

/// Time-paced walk over a [`RampPlan`]
#[derive(Clone, Debug)]
pub struct RampScheduler {
    plan: RampPlan,
    /// Retry delay while no node is connected
    empty_backoff: Duration,
    /// Index of the next step to ship
    next_step: usize,
    /// Index of the last step shipped
    current_step: Option<usize>,
    state: SchedulerState,
}

impl RampScheduler {
    pub fn new(plan: RampPlan, empty_backoff: Duration) -> Self {
        let state = if plan.is_empty() {
            SchedulerState::Done
        } else {
            SchedulerState::WaitingForNodes
        };
        RampScheduler {
            plan,
            empty_backoff,
            next_step: 0,
            current_step: None,
            state,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Last step shipped, if any
    pub fn current_step(&self) -> Option<usize> {
        self.current_step
    }

    /// Step that will be evaluated on the next tick
    pub fn next_step(&self) -> usize {
        self.next_step
    }

    pub fn is_done(&self) -> bool {
        self.state == SchedulerState::Done
    }

    pub fn plan(&self) -> &RampPlan {
        &self.plan
    }

    /// Evaluate the due step against the live nodes (admission order)
    pub fn on_tick(&mut self, nodes: &[NodeId]) -> Tick {
        let Some(total) = self.plan.target(self.next_step) else {
            self.state = SchedulerState::Done;
            return Tick::Done;
        };

        if nodes.is_empty() {
            self.state = SchedulerState::WaitingForNodes;
            return Tick::Stall {
                step: self.next_step,
                retry: self.empty_backoff,
            };
        }

        let step = self.next_step;
        let assignments = nodes
            .iter()
            .copied()
            .zip(partition(total, nodes.len()))
            .collect();

        self.current_step = Some(step);
        self.next_step += 1;

        let next = if self.next_step < self.plan.len() {
            self.state = SchedulerState::Stepping;
            Some(self.plan.interval)
        } else {
            self.state = SchedulerState::Done;
            None
        };

        Tick::Ship {
            step,
            total,
            assignments,
            next,
        }
    }
}
