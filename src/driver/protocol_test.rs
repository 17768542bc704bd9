use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use serde_json::json;

use super::*;
use crate::{
    auth::{Token, store::MemoryCredentialStore},
    http::Transport,
    testing::{ManualClock, ScriptedClient, json as respond, ok},
};

fn executor(client: ScriptedClient) -> (QueryExecutor<ScriptedClient>, Arc<ManualClock>) {
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::at(now));
    let store = Arc::new(MemoryCredentialStore::new(Some(Token::new(
        "tok",
        "r",
        now + chrono::Duration::hours(1),
    ))));
    let session = Session::new(
        Transport::new(client, "https://app.databend.com"),
        store,
        clock.clone(),
    );
    (
        QueryExecutor::new(Arc::new(session), RetryPolicy::query_default(), None),
        clock,
    )
}

fn ctx() -> SessionContext {
    SessionContext::new("acme").with_warehouse("wh")
}

fn page(index: usize, next: Option<String>, running_time_ms: f64) -> serde_json::Value {
    json!({
        "id": "q1",
        "state": if next.is_some() { "Running" } else { "Succeeded" },
        "data": [[index]],
        "schema": {"fields": [{"name": "n", "data_type": "UInt64"}]},
        "stats": {"running_time_ms": running_time_ms, "scan_progress": {"bytes": 8 * index, "rows": index}},
        "next_uri": next.unwrap_or_default(),
        "error": null,
    })
}

/// Serves `times.len()` pages; page `i` links to `/v1/query/q1/page/{i}`.
fn paged_server(times: &'static [f64]) -> ScriptedClient {
    ScriptedClient::with_handler(move |req| {
        let index = match req.url.rsplit_once("/page/") {
            Some((_, n)) => n.parse::<usize>().unwrap(),
            None => 0,
        };
        let next = (index + 1 < times.len()).then(|| format!("/v1/query/q1/page/{}", index + 1));
        ok(page(index, next, times[index]))
    })
}

async fn drain(
    stream: BoxStream<'static, Result<QueryEvent, CloudError>>,
) -> (Vec<QueryResponse>, Option<QuerySummary>, Option<CloudError>) {
    let mut stream = stream;
    let mut pages = Vec::new();
    let mut summary = None;
    let mut failure = None;

    while let Some(event) = stream.next().await {
        match event {
            Ok(QueryEvent::Page(p)) => pages.push(p),
            Ok(QueryEvent::Done(s)) => summary = Some(s),
            Err(e) => failure = Some(e),
        }
    }

    (pages, summary, failure)
}

fn provisioning() -> serde_json::Value {
    json!({
        "id": "",
        "error": {"code": 1001, "kind": "ProvisionWarehouseTimeout", "message": "warehouse is starting"},
    })
}

#[tokio::test]
async fn emits_every_page_in_order_then_done() {
    let client = paged_server(&[1.0, 2.0, 3.0]);
    let (exec, clock) = executor(client.clone());

    let (pages, summary, failure) =
        drain(exec.execute(&ctx(), "SELECT 1", CancellationToken::new())).await;

    assert!(failure.is_none());
    let order: Vec<_> = pages.iter().map(|p| p.data[0][0].as_u64().unwrap()).collect();
    assert_eq!(order, vec![0, 1, 2]);

    let summary = summary.unwrap();
    assert_eq!(summary.pages, 3);
    assert_eq!(summary.query_id, "q1");

    let sent = client.requests();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].method, Method::Post);
    assert!(sent[0].url.ends_with(QUERY_PATH));
    let body: serde_json::Value = serde_json::from_slice(&sent[0].body).unwrap();
    assert_eq!(body, json!({"sql": "SELECT 1"}));
    assert!(!sent[0].headers.contains_key(HEADER_QUERY_ID));

    for (i, req) in sent.iter().enumerate().skip(1) {
        assert_eq!(req.method, Method::Get);
        assert!(req.url.ends_with(&format!("/v1/query/q1/page/{}", i)));
        assert_eq!(req.headers[HEADER_QUERY_ID], "q1");
    }
    for req in &sent {
        assert_eq!(req.headers[HEADER_WAREHOUSE], "wh");
        assert_eq!(req.headers[HEADER_ORG], "acme");
    }
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn single_page_without_continuation_is_done() {
    let client = paged_server(&[5.0]);
    let (exec, _) = executor(client.clone());

    let (pages, summary, failure) =
        drain(exec.execute(&ctx(), "SELECT 1", CancellationToken::new())).await;

    assert!(failure.is_none());
    assert_eq!(pages.len(), 1);
    assert_eq!(summary.unwrap().stats.running_time_ms, 5.0);
    assert_eq!(client.requests().len(), 1);
}

#[tokio::test]
async fn zero_running_time_does_not_clobber_stats() {
    let client = paged_server(&[0.0, 120.0, 0.0]);
    let (exec, _) = executor(client);

    let (_, summary, _) = drain(exec.execute(&ctx(), "SELECT 1", CancellationToken::new())).await;

    let stats = summary.unwrap().stats;
    assert_eq!(stats.running_time_ms, 120.0);
    assert_eq!(stats.scan_progress.rows, 1);
}

#[tokio::test]
async fn provisioning_is_retried_exactly_to_the_budget() {
    let client = ScriptedClient::with_handler(|_| ok(provisioning()));
    let (exec, clock) = executor(client.clone());

    let (pages, summary, failure) =
        drain(exec.execute(&ctx(), "SELECT 1", CancellationToken::new())).await;

    assert!(pages.is_empty());
    assert!(summary.is_none());
    let err = failure.unwrap();
    assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
    assert!(err.message().contains("10 attempts"));
    assert!(err.message().contains("warehouse is starting"));

    assert_eq!(client.requests().len(), 10);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(2); 9]);
}

#[tokio::test]
async fn transient_failures_then_success_resubmits() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let client = ScriptedClient::with_handler(move |_| match seen.fetch_add(1, Ordering::SeqCst) {
        0 => respond(520, json!({"message": "proxy"})),
        1 => ok(provisioning()),
        2 => respond(503, json!({"message": "unavailable"})),
        _ => ok(page(0, None, 7.0)),
    });
    let (exec, clock) = executor(client.clone());

    let (pages, summary, failure) =
        drain(exec.execute(&ctx(), "SELECT 1", CancellationToken::new())).await;

    assert!(failure.is_none());
    assert_eq!(pages.len(), 1);
    assert!(summary.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(clock.sleep_count(), 3);
    assert!(client.requests().iter().all(|r| r.method == Method::Post));
}

#[tokio::test]
async fn query_error_on_first_page_is_fatal() {
    let client = ScriptedClient::with_handler(|_| {
        ok(json!({
            "id": "q7",
            "error": {"code": 1025, "kind": "UnknownTable", "message": "Unknown table 'nope'"},
        }))
    });
    let (exec, clock) = executor(client.clone());

    let (pages, summary, failure) =
        drain(exec.execute(&ctx(), "SELECT * FROM nope", CancellationToken::new())).await;

    assert!(pages.is_empty());
    assert!(summary.is_none());
    let err = failure.unwrap();
    assert_eq!(err.kind(), ErrorKind::QueryFailed);
    assert!(err.message().contains("q7"));
    assert!(err.message().contains("wh"));
    assert!(err.message().contains("Unknown table 'nope'"));
    assert_eq!(client.requests().len(), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn bad_request_is_fatal_without_retry() {
    let client = ScriptedClient::with_handler(|_| respond(400, json!({"message": "bad header"})));
    let (exec, _) = executor(client.clone());

    let (_, _, failure) = drain(exec.execute(&ctx(), "SELECT 1", CancellationToken::new())).await;

    let err = failure.unwrap();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert!(err.message().starts_with("warehouse wh: 400 bad header"));
    assert_eq!(client.requests().len(), 1);
}

#[tokio::test]
async fn error_on_continuation_stops_after_emitted_pages() {
    let client = ScriptedClient::with_handler(|req| {
        if req.url.ends_with(QUERY_PATH) {
            ok(page(0, Some("/v1/query/q1/page/1".into()), 1.0))
        } else {
            ok(json!({
                "id": "q1",
                "error": {"code": 1043, "kind": "Overflow", "message": "overflow"},
            }))
        }
    });
    let (exec, _) = executor(client.clone());

    let (pages, summary, failure) =
        drain(exec.execute(&ctx(), "SELECT 1", CancellationToken::new())).await;

    assert_eq!(pages.len(), 1);
    assert!(summary.is_none());
    assert_eq!(failure.unwrap().kind(), ErrorKind::QueryFailed);
    assert_eq!(client.requests().len(), 2);
}

#[tokio::test]
async fn continuation_gets_a_fresh_retry_budget() {
    let page_calls = Arc::new(AtomicUsize::new(0));
    let seen = page_calls.clone();
    let client = ScriptedClient::with_handler(move |req| {
        if req.url.ends_with(QUERY_PATH) {
            return ok(page(0, Some("/v1/query/q1/page/1".into()), 1.0));
        }
        // nine proxy errors then success: within a fresh budget of ten
        if seen.fetch_add(1, Ordering::SeqCst) < 9 {
            respond(520, json!({}))
        } else {
            ok(page(1, None, 2.0))
        }
    });
    let (exec, clock) = executor(client);

    let (pages, summary, failure) =
        drain(exec.execute(&ctx(), "SELECT 1", CancellationToken::new())).await;

    assert!(failure.is_none());
    assert_eq!(pages.len(), 2);
    assert_eq!(summary.unwrap().stats.running_time_ms, 2.0);
    assert_eq!(page_calls.load(Ordering::SeqCst), 10);
    assert_eq!(clock.sleep_count(), 9);
}

#[tokio::test]
async fn cancellation_before_submit_sends_nothing() {
    let client = paged_server(&[1.0]);
    let (exec, _) = executor(client.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (pages, _, failure) = drain(exec.execute(&ctx(), "SELECT 1", cancel)).await;

    assert!(pages.is_empty());
    assert_eq!(failure.unwrap().kind(), ErrorKind::Cancelled);
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn cancellation_between_pages_stops_continuation() {
    let client = paged_server(&[1.0, 2.0, 3.0]);
    let (exec, _) = executor(client.clone());
    let cancel = CancellationToken::new();

    let mut stream = exec.execute(&ctx(), "SELECT 1", cancel.clone());
    let first = stream.next().await.unwrap().unwrap();
    assert!(matches!(first, QueryEvent::Page(_)));

    cancel.cancel();
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(err.message().contains("q1"));
    assert!(stream.next().await.is_none());
    assert_eq!(client.requests().len(), 1);
}

#[tokio::test]
async fn missing_warehouse_fails_before_any_request() {
    let client = paged_server(&[1.0]);
    let (exec, _) = executor(client.clone());

    let (_, _, failure) = drain(exec.execute(
        &SessionContext::new("acme"),
        "SELECT 1",
        CancellationToken::new(),
    ))
    .await;

    assert_eq!(failure.unwrap().kind(), ErrorKind::BadRequest);
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn query_all_buffers_rows_across_pages() {
    let client = paged_server(&[1.0, 0.0]);
    let (exec, _) = executor(client);

    let (rows, summary) = exec.query_all(&ctx(), "SELECT 1").await.unwrap();

    assert_eq!(rows, vec![vec![json!(0)], vec![json!(1)]]);
    assert_eq!(summary.pages, 2);
}

/// A clock whose sleeps never finish on their own.
struct StalledClock {
    sleeps: AtomicUsize,
}

impl crate::clock::Clock for StalledClock {
    fn now(&self) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn sleep(&self, _: Duration) -> futures_util::future::BoxFuture<'static, ()> {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        Box::pin(futures_util::future::pending())
    }
}

#[tokio::test]
async fn cancellation_interrupts_a_retry_delay() {
    let client = ScriptedClient::with_handler(|_| respond(520, json!({})));
    let clock = Arc::new(StalledClock {
        sleeps: AtomicUsize::new(0),
    });
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let store = Arc::new(MemoryCredentialStore::new(Some(Token::new(
        "tok",
        "r",
        now + chrono::Duration::hours(1),
    ))));
    let session = Session::new(
        Transport::new(client.clone(), "https://app.databend.com"),
        store,
        clock.clone(),
    );
    let exec = QueryExecutor::new(
        Arc::new(session),
        RetryPolicy::new(10, Duration::from_secs(3600)),
        None,
    );
    let cancel = CancellationToken::new();

    let stream = exec.execute(&ctx(), "SELECT 1", cancel.clone());
    let trigger = async {
        while clock.sleeps.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
    };
    let ((pages, summary, failure), ()) = tokio::join!(drain(stream), trigger);

    assert!(pages.is_empty());
    assert!(summary.is_none());
    assert_eq!(failure.unwrap().kind(), ErrorKind::Cancelled);
    assert_eq!(client.requests().len(), 1);
    assert_eq!(clock.sleeps.load(Ordering::SeqCst), 1);
}
