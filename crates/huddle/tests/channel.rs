use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use huddle_core::{lines, ChannelError, LineTransport, Operations, ProcessChannel, RemoteError, SessionError};
use serde_json::{json, Value};
use tokio::io::{duplex, split, AsyncWriteExt};

/// Two channels talking newline-delimited JSON over an in-memory pipe.
fn piped(left_ops: Operations, right_ops: Operations) -> (Arc<ProcessChannel>, Arc<ProcessChannel>) {
    let (left_io, right_io) = duplex(4096);
    let (left_read, left_write) = split(left_io);
    let (right_read, right_write) = split(right_io);

    let left = Arc::new(ProcessChannel::new(Arc::new(LineTransport::new(left_write))).with_operations(left_ops));
    let right = Arc::new(ProcessChannel::new(Arc::new(LineTransport::new(right_write))).with_operations(right_ops));
    tokio::spawn(left.clone().listen(lines(left_read)));
    tokio::spawn(right.clone().listen(lines(right_read)));
    (left, right)
}

fn ledger() -> Operations {
    Operations::new()
        .register("add", |args| async move {
            let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
            Ok::<_, anyhow::Error>(json!(sum))
        })
        .register("range", |args| async move {
            let n = args.first().and_then(Value::as_i64).unwrap_or_default();
            if n < 0 {
                return Err(anyhow::Error::new(RemoteError::new("RangeError", "boom")));
            }
            Ok(json!(n))
        })
        .register("load", |_| async move {
            Err::<Value, _>(anyhow::anyhow!("file missing")).context("loading ledger")
        })
}

#[tokio::test]
async fn test_calls_over_line_transport() {
    let (caller, _callee) = piped(Operations::new(), ledger());

    let sum: i64 = caller.call("add", vec![json!(2), json!(3)]).await.unwrap();
    assert_eq!(sum, 5);

    let (a, b) = tokio::join!(
        caller.call::<i64>("add", vec![json!(1), json!(1)]),
        caller.call::<i64>("range", vec![json!(7)]),
    );
    assert_eq!((a.unwrap(), b.unwrap()), (2, 7));
    assert_eq!(caller.pending(), 0);
}

#[tokio::test]
async fn test_remote_error_survives_the_pipe() {
    let (caller, _callee) = piped(Operations::new(), ledger());

    let remote = match caller.send("range", vec![json!(-1)]).await {
        Err(ChannelError::Remote(remote)) => remote,
        other => panic!("expected remote failure, got {other:?}"),
    };
    assert_eq!(remote.name, "RangeError");
    assert_eq!(remote.message, "boom");
    assert_eq!(remote.to_string(), "RangeError: boom");
}

#[tokio::test]
async fn test_context_chain_becomes_cause_chain() {
    let (caller, _callee) = piped(Operations::new(), ledger());

    let Err(ChannelError::Remote(remote)) = caller.send("load", vec![]).await else {
        panic!("expected remote failure");
    };
    assert_eq!(remote.message, "loading ledger");
    assert_eq!(remote.cause.as_ref().map(|c| c.message.as_str()), Some("file missing"));

    // Sessions see it as a remote failure and show a generic message.
    let session_error = SessionError::from(ChannelError::Remote(remote));
    assert!(matches!(session_error, SessionError::Remote(_)));
    assert_eq!(
        session_error.safe_message(),
        "An error occurred while processing the interaction."
    );
}

#[tokio::test]
async fn test_both_ends_serve_each_other() {
    let echo = Operations::new().register("echo", |args| async move { Ok::<_, anyhow::Error>(Value::Array(args)) });
    let (left, right) = piped(echo.clone(), ledger());

    let echoed: Vec<String> = right.call("echo", vec![json!("ping")]).await.unwrap();
    assert_eq!(echoed, vec!["ping".to_string()]);

    let sum: i64 = left.call("add", vec![json!(40), json!(2)]).await.unwrap();
    assert_eq!(sum, 42);
}

#[tokio::test(start_paused = true)]
async fn test_garbage_on_the_pipe_is_ignored() {
    let (left_io, mut right_io) = duplex(4096);
    let (left_read, left_write) = split(left_io);
    let channel = Arc::new(
        ProcessChannel::new(Arc::new(LineTransport::new(left_write))).with_call_timeout(Duration::from_secs(5)),
    );
    tokio::spawn(channel.clone().listen(lines(left_read)));

    right_io
        .write_all(b"not json\n\n{\"id\":\"999999\",\"kind\":\"result\",\"result\":1}\n")
        .await
        .unwrap();

    // The peer never answers; the call times out instead of hanging.
    let err = channel.send("add", vec![]).await.unwrap_err();
    assert!(matches!(err, ChannelError::Timeout { .. }));
    assert_eq!(channel.pending(), 0);
}
