//! Scripted transport and manual clock used by the unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::{
    CloudError,
    clock::Clock,
    http::client::{CloudHttpClient, HttpRequest, HttpResponse},
};

type Handler = dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync;

/// Answers every request through a handler and keeps a log of what was sent.
#[derive(Clone)]
pub(crate) struct ScriptedClient {
    handler: Arc<Handler>,
    log: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedClient {
    pub fn with_handler(
        handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replies with the queued responses in order; panics when they run out.
    pub fn with_responses(responses: Vec<HttpResponse>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::with_handler(move |req| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected request {} {}", req.method.as_str(), req.url))
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn count_path(&self, suffix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.url.ends_with(suffix))
            .count()
    }
}

impl CloudHttpClient for ScriptedClient {
    fn new() -> Self {
        Self::with_responses(Vec::new())
    }

    async fn exchange(&self, request: HttpRequest) -> Result<HttpResponse, CloudError> {
        // give concurrent callers a chance to interleave, as real I/O would
        tokio::task::yield_now().await;
        let resp = (self.handler)(&request);
        self.log.lock().unwrap().push(request);
        Ok(resp)
    }
}

pub(crate) fn json(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        body: serde_json::to_vec(&body).unwrap(),
    }
}

pub(crate) fn ok(body: Value) -> HttpResponse {
    json(200, body)
}

pub(crate) fn empty(status: u16) -> HttpResponse {
    HttpResponse {
        status,
        body: Vec::new(),
    }
}

/// A clock whose `sleep` returns immediately and records the requested delay.
pub(crate) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
    sleep_calls: AtomicUsize,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            sleeps: Arc::new(Mutex::new(Vec::new())),
            sleep_calls: AtomicUsize::new(0),
        }
    }

    pub fn epoch() -> Self {
        Self::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn sleep_count(&self) -> usize {
        self.sleep_calls.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.sleep_calls.fetch_add(1, Ordering::SeqCst);
        self.sleeps.lock().unwrap().push(duration);
        Box::pin(async {})
    }
}
