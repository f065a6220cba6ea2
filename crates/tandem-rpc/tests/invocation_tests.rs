//! Integration tests for outgoing calls: correlation, batch accounting,
//! reconnection and timeouts.

mod common;

use common::{deliver, next_call, wire, Recorder};
use serde_json::{json, Value};
use std::time::Duration;
use tandem_rpc::{ErrorPayload, FunctionTree, Message, RpcError, RpcPeer, RpcPeerBuilder, TransportEvent};

fn acceptor() -> RpcPeerBuilder {
    RpcPeer::builder(FunctionTree::node()).acceptor("srv-1")
}

#[tokio::test]
async fn test_replies_are_matched_by_id_in_any_order() {
    common::init_tracing();
    let (peer, mut outbound) = wire(acceptor());

    let calls: Vec<_> = (0..5)
        .map(|n| {
            let peer = peer.clone();
            tokio::spawn(async move { peer.call("echo", vec![json!(n)]).await })
        })
        .collect();

    let mut invocations = Vec::new();
    for _ in 0..5 {
        invocations.push(next_call(&mut outbound).await);
    }
    assert_eq!(peer.outstanding_calls(), 5);

    // Answer in reverse order, echoing each call's own argument.
    for invocation in invocations.iter().rev() {
        deliver(&peer, Message::resolve(invocation.id, invocation.args[0].clone()));
    }

    for (n, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await.unwrap().unwrap(), json!(n));
    }
    assert_eq!(peer.outstanding_calls(), 0);
}

#[tokio::test]
async fn test_reject_surfaces_remote_error() {
    let (peer, mut outbound) = wire(acceptor());

    let call = tokio::spawn({
        let peer = peer.clone();
        async move { peer.call("math.div", vec![json!(1), json!(0)]).await }
    });
    let invocation = next_call(&mut outbound).await;
    assert_eq!(invocation.fn_path, "math.div");
    assert_eq!(invocation.args, vec![json!(1), json!(0)]);

    let error = ErrorPayload::new("division by zero").with_field("code", 22);
    deliver(&peer, Message::reject(invocation.id, error));

    match call.await.unwrap() {
        Err(RpcError::Remote(remote)) => {
            assert_eq!(remote.message, "division by zero");
            assert_eq!(remote.field("code"), Some(&json!(22)));
        }
        other => panic!("Expected remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_batch_hooks_fire_once_per_burst() {
    let recorder = Recorder::default();
    let (peer, mut outbound) = wire(acceptor().observer(recorder.clone()));

    // A burst of one.
    let single = tokio::spawn({
        let peer = peer.clone();
        async move { peer.call("ping", vec![]).await }
    });
    let invocation = next_call(&mut outbound).await;
    assert_eq!(invocation.id, 1);
    deliver(&peer, Message::resolve(invocation.id, Value::Null));
    single.await.unwrap().unwrap();

    // A burst of three, with ids starting over.
    let burst: Vec<_> = (0..3)
        .map(|_| {
            let peer = peer.clone();
            tokio::spawn(async move { peer.call("ping", vec![]).await })
        })
        .collect();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(next_call(&mut outbound).await.id);
    }
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3]);

    for id in ids {
        deliver(&peer, Message::resolve(id, Value::Null));
    }
    for call in burst {
        call.await.unwrap().unwrap();
    }

    assert_eq!(
        recorder.batch_events(),
        vec![
            "batch_start 1",
            "response 1",
            "batch_end 1",
            "batch_start 1",
            "response 1",
            "response 2",
            "response 3",
            "batch_end 3",
        ]
    );
    let calling = recorder
        .events()
        .into_iter()
        .filter(|e| e.starts_with("calling"))
        .count();
    assert_eq!(calling, 4);
}

#[tokio::test]
async fn test_duplicate_reply_is_reported_and_isolated() {
    let recorder = Recorder::default();
    let (peer, mut outbound) = wire(acceptor().observer(recorder.clone()));

    let first = tokio::spawn({
        let peer = peer.clone();
        async move { peer.call("first", vec![]).await }
    });
    let second = tokio::spawn({
        let peer = peer.clone();
        async move { peer.call("second", vec![]).await }
    });
    let a = next_call(&mut outbound).await;
    let b = next_call(&mut outbound).await;
    let (first_id, second_id) = if a.fn_path == "first" { (a.id, b.id) } else { (b.id, a.id) };

    deliver(&peer, Message::resolve(first_id, json!("once")));
    deliver(&peer, Message::resolve(first_id, json!("twice")));
    deliver(&peer, Message::reject(first_id, ErrorPayload::new("thrice")));

    assert_eq!(first.await.unwrap().unwrap(), json!("once"));
    assert_eq!(recorder.violations().len(), 2);
    assert!(recorder.violations()[0].contains(&format!("Deferred Id {}", first_id)));

    // The other invocation is untouched.
    assert_eq!(peer.outstanding_calls(), 1);
    deliver(&peer, Message::resolve(second_id, json!("fine")));
    assert_eq!(second.await.unwrap().unwrap(), json!("fine"));
}

#[tokio::test]
async fn test_reply_for_unknown_id_is_reported() {
    let recorder = Recorder::default();
    let (peer, _outbound) = wire(acceptor().observer(recorder.clone()));

    deliver(&peer, Message::resolve(42, Value::Null));
    assert_eq!(
        recorder.events(),
        vec!["violation Deferred Id 42 was resolved/rejected more than once, or was never issued"]
    );
}

#[tokio::test]
async fn test_calls_short_circuit_while_reconnecting() {
    let recorder = Recorder::default();
    let (peer, mut outbound) = wire(RpcPeer::builder(FunctionTree::node()).observer(recorder.clone()));

    peer.handle_event(TransportEvent::Connect("cli-1".into()));
    peer.handle_event(TransportEvent::Disconnect {
        reason: "transport close".into(),
    });
    assert!(peer.is_reconnecting());

    let err = peer.call("anything", vec![]).await.unwrap_err();
    assert_eq!(
        err,
        RpcError::Disconnected {
            connection: "cli-1".into()
        }
    );
    assert_eq!(err.to_string(), "socket cli-1 disconnected, call rejected");

    // Nothing was sent, registered or observed.
    assert!(outbound.try_recv().is_err());
    assert_eq!(peer.outstanding_calls(), 0);
    assert!(recorder.events().is_empty());

    peer.handle_event(TransportEvent::Reconnect("cli-1".into()));
    assert!(!peer.is_reconnecting());
    let call = tokio::spawn({
        let peer = peer.clone();
        async move { peer.call("anything", vec![]).await }
    });
    let invocation = next_call(&mut outbound).await;
    assert_eq!(invocation.id, 1);
    deliver(&peer, Message::resolve(invocation.id, json!(true)));
    assert_eq!(call.await.unwrap().unwrap(), json!(true));
}

#[tokio::test]
async fn test_prepared_remote_call_invokes_by_path() {
    let (peer, mut outbound) = wire(acceptor());
    let add = peer.prepare_remote_call("math.add");
    assert_eq!(add.path(), "math.add");
    assert_eq!(add.arity(), None);

    let call = tokio::spawn(async move { add.call(vec![json!(2), json!(3)]).await });
    let invocation = next_call(&mut outbound).await;
    assert_eq!(invocation.fn_path, "math.add");
    deliver(&peer, Message::resolve(invocation.id, json!(5)));
    assert_eq!(call.await.unwrap().unwrap(), json!(5));
}

#[tokio::test(start_paused = true)]
async fn test_call_timeout_abandons_the_invocation() {
    let recorder = Recorder::default();
    let (peer, mut outbound) = wire(
        acceptor()
            .call_timeout(Duration::from_secs(5))
            .observer(recorder.clone()),
    );

    let err = peer.call("never", vec![]).await.unwrap_err();
    assert_eq!(
        err,
        RpcError::Timeout {
            fn_path: "never".into(),
            after: Duration::from_secs(5)
        }
    );
    assert!(err.is_retryable());
    assert_eq!(peer.outstanding_calls(), 0);
    assert_eq!(recorder.batch_events(), vec!["batch_start 1", "response 1", "batch_end 1"]);

    // The reply arrives too late and is only reported.
    let invocation = next_call(&mut outbound).await;
    deliver(&peer, Message::resolve(invocation.id, Value::Null));
    assert_eq!(recorder.violations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_never_settles_a_newer_call() {
    let recorder = Recorder::default();
    let (peer, mut outbound) = wire(
        acceptor()
            .call_timeout(Duration::from_secs(5))
            .observer(recorder.clone()),
    );

    let err = peer.call("slow", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout { .. }));
    let timed_out = next_call(&mut outbound).await;

    let fresh = tokio::spawn({
        let peer = peer.clone();
        async move { peer.call("fast", vec![]).await }
    });
    let invocation = next_call(&mut outbound).await;
    assert_ne!(invocation.id, timed_out.id);

    deliver(&peer, Message::resolve(timed_out.id, json!("reply for slow")));
    assert_eq!(peer.outstanding_calls(), 1);
    assert_eq!(
        recorder.violations(),
        vec![format!(
            "violation Reply for invocation {} arrived after the call was abandoned",
            timed_out.id
        )]
    );

    deliver(&peer, Message::resolve(invocation.id, json!("reply for fast")));
    assert_eq!(fresh.await.unwrap().unwrap(), json!("reply for fast"));
}

#[tokio::test]
async fn test_rpc_error_from_peer_is_reported() {
    let recorder = Recorder::default();
    let (peer, _outbound) = wire(acceptor().observer(recorder.clone()));

    deliver(&peer, Message::rpc_error("Parse error: expected value"));
    assert_eq!(
        recorder.violations(),
        vec!["violation Peer refused a message: Parse error: expected value"]
    );
}

#[tokio::test]
async fn test_call_after_transport_closed_fails() {
    let (peer, outbound) = wire(acceptor());
    drop(outbound);

    let err = peer.call("anything", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::Transport { .. }));
    assert_eq!(peer.outstanding_calls(), 0);
}
