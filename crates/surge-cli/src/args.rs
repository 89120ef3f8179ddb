//! Command-line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use surge_coordinator::{CoordinatorConfig, RampPlan, MAX_LINE_LENGTH, STALE_THRESHOLD};
use surge_core::{SurgeError, SurgeResult};

/// Ramp coordinator for a fleet of load-generating workers
#[derive(Clone, Debug, Parser)]
#[command(name = "surge-coordinator", version, about)]
pub struct Args {
    /// Address worker nodes connect to
    #[arg(long, env = "SURGE_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Address serving /metrics and /status
    #[arg(long, env = "SURGE_METRICS_ADDR", default_value = "0.0.0.0:9100")]
    pub metrics_addr: SocketAddr,

    /// Cluster-wide client targets, one per step
    #[arg(
        long,
        env = "SURGE_STEPS",
        value_delimiter = ',',
        default_value = "1,2,4,6,8,10,15,20"
    )]
    pub steps: Vec<u64>,

    /// Time between two ramp steps
    #[arg(
        long,
        env = "SURGE_STEP_INTERVAL",
        default_value = "60s",
        value_parser = humantime::parse_duration
    )]
    pub step_interval: Duration,

    /// Retry delay while a due step has no nodes
    #[arg(
        long,
        env = "SURGE_EMPTY_BACKOFF",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub empty_backoff: Duration,

    /// Delay before the first step is evaluated
    #[arg(
        long,
        env = "SURGE_START_DELAY",
        default_value = "0s",
        value_parser = humantime::parse_duration
    )]
    pub start_delay: Duration,

    /// Periodic re-aggregation cadence
    #[arg(
        long,
        env = "SURGE_AGGREGATE_INTERVAL",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    pub aggregate_interval: Duration,

    /// Longest accepted worker message in bytes
    #[arg(long, env = "SURGE_MAX_LINE_LENGTH", default_value_t = MAX_LINE_LENGTH)]
    pub max_line_length: usize,

    /// Run label written to every CSV row
    #[arg(long, env = "SURGE_LABEL", default_value = "default")]
    pub label: String,

    /// Append every accepted report to this CSV file
    #[arg(long, env = "SURGE_CSV")]
    pub csv: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "SURGE_LOG_JSON")]
    pub log_json: bool,
}

impl Args {
    pub fn coordinator_config(&self) -> SurgeResult<CoordinatorConfig> {
        if self.steps.is_empty() {
            return Err(SurgeError::Config("at least one ramp step is required".into()));
        }
        let config = CoordinatorConfig {
            listen_addr: self.listen,
            ramp: RampPlan::new(self.steps.clone(), self.step_interval),
            empty_backoff: self.empty_backoff,
            start_delay: self.start_delay,
            stale_threshold: STALE_THRESHOLD,
            aggregate_interval: self.aggregate_interval,
            max_line_length: self.max_line_length,
            label: self.label.clone(),
            ..CoordinatorConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
