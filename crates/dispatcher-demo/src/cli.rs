use clap::Parser;

use dispatcher_core::DispatcherConfig;

/// Runs the dispatcher core against an in-memory build engine, driven by a
/// small scripted in-process client, for manual exercise and demonstration.
#[derive(Debug, Clone, Parser)]
#[command(name = "dispatcher-demo", version, about = "Server request dispatcher demo")]
pub struct Cli {
    /// Capacity of the bounded Request Queue.
    #[arg(long, env = "DISPATCHER_REQUEST_QUEUE_CAPACITY", default_value_t = DispatcherConfig::default().request_queue_capacity)]
    pub request_queue_capacity: usize,

    /// Capacity of the Work Queue's raw inbound channel.
    #[arg(long, env = "DISPATCHER_WORK_RAW_CAPACITY", default_value_t = DispatcherConfig::default().work_raw_capacity)]
    pub work_raw_capacity: usize,

    /// Capacity of the Reader's deferred startup buffer.
    #[arg(long, env = "DISPATCHER_DEFERRED_STARTUP_CAPACITY", default_value_t = DispatcherConfig::default().deferred_startup_capacity)]
    pub deferred_startup_capacity: usize,

    /// How often the Reader re-checks the Engine State Ref while booting, in milliseconds.
    #[arg(long, env = "DISPATCHER_BOOT_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub boot_poll_interval_ms: u64,
}

impl Cli {
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            request_queue_capacity: self.request_queue_capacity,
            work_raw_capacity: self.work_raw_capacity,
            deferred_startup_capacity: self.deferred_startup_capacity,
            boot_poll_interval: std::time::Duration::from_millis(self.boot_poll_interval_ms),
        }
    }
}
