use std::process::Stdio;

use domain::common::error::DomainError;
use domain::conntrack::entity::TimeoutRefresh;
use ports::secondary::conntrack_timeout_port::ConntrackTimeoutPort;
use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Refreshes conntrack entry timeouts by running `conntrack -U`.
///
/// Each refresh is spawned on the runtime and never awaited by the
/// dispatcher; failures are only logged.
pub struct ConntrackCliRefresher {
    tool: String,
    runtime: Handle,
}

impl ConntrackCliRefresher {
    /// Must be called from within a tokio runtime.
    pub fn new(tool: impl Into<String>) -> Result<Self, anyhow::Error> {
        let runtime = Handle::try_current()
            .map_err(|e| anyhow::anyhow!("conntrack refresher needs a tokio runtime: {e}"))?;
        Ok(Self {
            tool: tool.into(),
            runtime,
        })
    }
}

/// Arguments updating the timeout of the entry matching the request's
/// original tuple.
pub fn update_args(request: &TimeoutRefresh) -> Vec<String> {
    let tuple = &request.tuple;
    vec![
        "-U".to_string(),
        "-p".to_string(),
        request.protocol.to_string(),
        "-s".to_string(),
        tuple.src.to_string(),
        "-d".to_string(),
        tuple.dst.to_string(),
        "--sport".to_string(),
        tuple.src_port.to_string(),
        "--dport".to_string(),
        tuple.dst_port.to_string(),
        "--timeout".to_string(),
        request.timeout_secs.to_string(),
    ]
}

impl ConntrackTimeoutPort for ConntrackCliRefresher {
    fn refresh_timeout(&mut self, request: &TimeoutRefresh) -> Result<(), DomainError> {
        let mut command = Command::new(&self.tool);
        command
            .args(update_args(request))
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let tuple = request.tuple;
        self.runtime.spawn(async move {
            match command.status().await {
                Ok(status) if status.success() => {
                    debug!(src = %tuple.src, sport = tuple.src_port, "conntrack timeout refreshed");
                }
                Ok(status) => {
                    debug!(src = %tuple.src, sport = tuple.src_port, %status, "conntrack entry not updated");
                }
                Err(e) => warn!(error = %e, "failed to run conntrack update"),
            }
        });
        Ok(())
    }
}
