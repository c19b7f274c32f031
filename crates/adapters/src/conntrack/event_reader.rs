use std::process::Stdio;
use std::sync::Arc;

use application::offload_coordinator::OffloadEvent;
use domain::conntrack::parser::parse_event_line;
use ports::secondary::metrics_port::MetricsPort;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters of one reader run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReaderStats {
    pub forwarded: u64,
    pub skipped: u64,
    pub malformed: u64,
}

/// Reads kernel connection-tracking events printed by `conntrack -E` on
/// its own task and hands them to the coordinator queue.
///
/// The reader never touches coordinator state. A full queue stalls the
/// reader rather than losing events: a lost `[DESTROY]` would leave the
/// flow's rule pair installed with nothing to remove it.
pub struct ConntrackEventReader {
    tool: String,
    metrics: Arc<dyn MetricsPort>,
}

impl ConntrackEventReader {
    pub fn new(tool: impl Into<String>, metrics: Arc<dyn MetricsPort>) -> Self {
        Self {
            tool: tool.into(),
            metrics,
        }
    }

    /// Spawn `conntrack -E` for IPv4 TCP and UDP events and forward its
    /// output until cancelled or the tool exits.
    pub async fn run(
        self,
        tx: mpsc::Sender<OffloadEvent>,
        cancel_token: CancellationToken,
    ) -> Result<ReaderStats, anyhow::Error> {
        let mut child = Command::new(&self.tool)
            .args(["-E", "-f", "ipv4", "-o", "id"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn '{}': {e}", self.tool))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("'{}' stdout not captured", self.tool))?;
        info!(tool = %self.tool, "conntrack event reader started");

        let stats = forward_lines(
            BufReader::new(stdout),
            &tx,
            &cancel_token,
            self.metrics.as_ref(),
        )
        .await;

        if let Err(e) = child.kill().await {
            debug!(error = %e, "conntrack tool already exited");
        }
        info!(
            forwarded = stats.forwarded,
            malformed = stats.malformed,
            "conntrack event reader stopped"
        );
        Ok(stats)
    }
}

/// Parse event lines from `reader` and send them to `tx`, waiting for queue
/// space, until EOF, a read error, cancellation, or the queue closing.
pub async fn forward_lines<R>(
    reader: R,
    tx: &mpsc::Sender<OffloadEvent>,
    cancel_token: &CancellationToken,
    metrics: &dyn MetricsPort,
) -> ReaderStats
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = ReaderStats::default();

    loop {
        let line = tokio::select! {
            () = cancel_token.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "conntrack event stream read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match parse_event_line(&line) {
            Ok(Some(event)) => event,
            Ok(None) => {
                stats.skipped += 1;
                continue;
            }
            Err(e) => {
                warn!(error = %e, line = %line, "unparseable conntrack event");
                metrics.record_event_dropped("malformed");
                stats.malformed += 1;
                continue;
            }
        };

        let sent = tokio::select! {
            () = cancel_token.cancelled() => break,
            sent = tx.send(OffloadEvent::Conntrack(event)) => sent,
        };
        if sent.is_err() {
            debug!("offload event queue closed");
            break;
        }
        stats.forwarded += 1;
    }

    stats
}
