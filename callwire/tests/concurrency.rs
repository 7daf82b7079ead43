//! Concurrent calls never share or cross their byte streams.
#![cfg(unix)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use callwire::{
    Call, CallOutcome, Connection, Connector, Envelope, Executor, Fields, Handler,
    LocalConnector, Provider, SocketConnector, pipe, reply, socket,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Barrier;

const CALLS: usize = 50;

/// Writes its output pipe id back, after a jittered pause.
struct Tag;

#[async_trait]
impl Handler for Tag {
    async fn execute(&self, call: &mut Call) -> Envelope {
        let n = call.envelope.get_int("n").unwrap_or(-1);
        let id = call.request_id.map_or(-1, |id| i64::from(id.get()));
        let pause = u64::try_from(n.rem_euclid(7)).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(pause)).await;
        if let Some(output) = call.output.as_mut() {
            let _ = output.write_all(format!("call-{id}").as_bytes()).await;
        }
        reply::success(Fields::from([
            ("n".to_owned(), n.into()),
            ("id".to_owned(), id.into()),
        ]))
    }
}

/// Holds every call until all of them are running.
struct Rendezvous(Arc<Barrier>);

#[async_trait]
impl Handler for Rendezvous {
    async fn execute(&self, _call: &mut Call) -> Envelope {
        self.0.wait().await;
        reply::success(Fields::new())
    }
}

async fn fan_out(executor: Executor) {
    let mut calls = Vec::new();
    for n in 0..CALLS {
        let n = i32::try_from(n).unwrap();
        let (reader, writer) = pipe().unwrap();
        let request = Envelope::new("test.TAG").with("n", n);
        let handle = executor.invoke_detached(request, None, Some(writer));
        calls.push((n, reader, handle));
    }

    let mut ids = HashSet::new();
    for (n, mut reader, handle) in calls {
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        let outcome = CallOutcome::from_join(handle.await);
        let fields = outcome.fields().expect("success");
        assert_eq!(fields.get("n").and_then(|v| v.as_int()), Some(n));
        let id = fields.get("id").and_then(|v| v.as_long()).expect("request id");
        assert_eq!(out, format!("call-{id}"));
        ids.insert(id);
    }
    assert_eq!(ids.len(), CALLS);
}

async fn all_at_once(executor: Executor) {
    let calls: Vec<_> = (0..CALLS)
        .map(|_| executor.invoke_detached(Envelope::new("test.MEET"), None, None))
        .collect();
    let joined = tokio::time::timeout(Duration::from_secs(10), async {
        let mut outcomes = Vec::new();
        for call in calls {
            outcomes.push(CallOutcome::from_join(call.await));
        }
        outcomes
    })
    .await
    .expect("calls did not overlap");
    assert!(joined.iter().all(CallOutcome::is_success), "{joined:?}");
}

fn serve_socket(connector: &SocketConnector, name: &str, provider: Provider) {
    let listener = socket::listen(connector.socket_path(name)).unwrap();
    tokio::spawn(socket::serve(listener, Arc::new(provider)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_local_calls_keep_their_output() {
    let connector = Arc::new(LocalConnector::default());
    connector.publish("tag", Arc::new(Provider::new(Tag)));
    let conn = Connection::new(connector, "tag");

    fan_out(conn.bind().await.unwrap()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_socket_calls_keep_their_output() {
    let dir = tempfile::tempdir().unwrap();
    let connector = Arc::new(SocketConnector::new(dir.path()));
    serve_socket(&connector, "tag", Provider::new(Tag));

    let conn = Connection::new(connector, "tag");
    fan_out(conn.bind().await.unwrap()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn local_calls_run_simultaneously() {
    let connector = Arc::new(LocalConnector::default());
    let barrier = Arc::new(Barrier::new(CALLS));
    connector.publish("meet", Arc::new(Provider::new(Rendezvous(barrier))));

    let binding = connector.bind("meet").await.unwrap();
    all_at_once(Executor::new(binding.capability)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn socket_calls_run_simultaneously() {
    let dir = tempfile::tempdir().unwrap();
    let connector = SocketConnector::new(dir.path());
    let barrier = Arc::new(Barrier::new(CALLS));
    serve_socket(&connector, "meet", Provider::new(Rendezvous(barrier)));

    let binding = connector.bind("meet").await.unwrap();
    all_at_once(Executor::new(binding.capability)).await;
}
