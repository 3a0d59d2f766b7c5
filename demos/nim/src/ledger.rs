//! Win tally kept in a child process.
//!
//! ```text
//!   nim ── stdin ──► nim --ledger
//!       ◄─ stdout ──
//! ```
//!
//! Both directions carry newline-delimited envelopes. The child's stderr is
//! inherited, so its logs land next to the parent's.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use huddle_core::{lines, Config, LineTransport, Operations, ProcessChannel, RemoteError};
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tracing::info;

/// Spawn `nim --ledger` and connect to it.
pub fn spawn(config: &Config) -> Result<(Child, Arc<ProcessChannel>)> {
    let mut child = Command::new(std::env::current_exe()?)
        .arg("--ledger")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn ledger process")?;

    let stdin = child.stdin.take().context("ledger stdin not captured")?;
    let stdout = child.stdout.take().context("ledger stdout not captured")?;

    let channel = Arc::new(ProcessChannel::from_config(Arc::new(LineTransport::new(stdin)), config));
    tokio::spawn(channel.clone().listen(lines(stdout)));
    info!(pid = ?child.id(), "ledger started");
    Ok((child, channel))
}

/// Serve the ledger on stdin/stdout until the parent goes away.
pub async fn serve() {
    let channel = Arc::new(
        ProcessChannel::new(Arc::new(LineTransport::new(tokio::io::stdout()))).with_operations(operations()),
    );
    channel.listen(lines(tokio::io::stdin())).await;
    info!("ledger stopped");
}

fn operations() -> Operations {
    let wins: Arc<Mutex<BTreeMap<String, u64>>> = Arc::default();
    let record = wins.clone();

    Operations::new()
        .register("record", move |args| {
            let wins = record.clone();
            async move {
                let (Some(winner), Some(_loser)) = (
                    args.first().and_then(Value::as_str),
                    args.get(1).and_then(Value::as_str),
                ) else {
                    return Err(anyhow::Error::new(RemoteError::new(
                        "TypeError",
                        "record expects a winner and a loser",
                    )));
                };
                let mut wins = wins.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let count = wins.entry(winner.to_string()).or_default();
                *count += 1;
                Ok(json!(*count))
            }
        })
        .register("standings", move |_| {
            let wins = wins.clone();
            async move {
                let wins = wins.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                Ok::<_, anyhow::Error>(serde_json::to_value(&*wins)?)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::{memory_pair, ChannelError};

    fn connected() -> Arc<ProcessChannel> {
        let ((caller_tx, caller_rx), (ledger_tx, ledger_rx)) = memory_pair();
        let caller = Arc::new(ProcessChannel::new(Arc::new(caller_tx)));
        let ledger = Arc::new(ProcessChannel::new(Arc::new(ledger_tx)).with_operations(operations()));
        tokio::spawn(caller.clone().listen(caller_rx));
        tokio::spawn(ledger.listen(ledger_rx));
        caller
    }

    #[tokio::test]
    async fn test_record_counts_wins() {
        let ledger = connected();

        let first: u64 = ledger.call("record", vec![json!("alice"), json!("House")]).await.unwrap();
        let second: u64 = ledger.call("record", vec![json!("alice"), json!("bob")]).await.unwrap();
        assert_eq!((first, second), (1, 2));

        let standings: BTreeMap<String, u64> = ledger.call("standings", vec![]).await.unwrap();
        assert_eq!(standings, BTreeMap::from([("alice".to_string(), 2)]));
    }

    #[tokio::test]
    async fn test_record_rejects_bad_arguments() {
        let ledger = connected();

        match ledger.send("record", vec![json!(7)]).await {
            Err(ChannelError::Remote(error)) => assert_eq!(error.name, "TypeError"),
            other => panic!("expected remote failure, got {other:?}"),
        }
    }
}
