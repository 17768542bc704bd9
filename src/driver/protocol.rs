use std::{sync::Arc, time::Duration};

use async_stream::try_stream;
use futures_util::{StreamExt, stream::BoxStream};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    CloudError,
    auth::{SessionContext, session::Session},
    driver::query::{QUERY_PATH, QueryRequest, QueryResponse, QueryStats},
    errors::ErrorKind,
    error,
    http::{
        HEADER_ORG, HEADER_QUERY_ID, HEADER_WAREHOUSE, Request, RequestBuilder,
        client::{CloudHttpClient, Method},
        headers,
    },
    retry::RetryPolicy,
};

/// What a running query hands to its consumer.
#[derive(Debug, Clone)]
pub enum QueryEvent {
    /// A result page, in server order.
    Page(QueryResponse),
    /// The last page has been delivered.
    Done(QuerySummary),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySummary {
    pub query_id: String,
    pub pages: usize,
    /// Stats from the latest page that reported a non-zero running time.
    pub stats: QueryStats,
}

impl QuerySummary {
    // Summary pages may report zero running time; they must not hide the last real figure.
    fn observe(&mut self, stats: &QueryStats) {
        if stats.running_time_ms > 0.0 {
            self.stats = stats.clone();
        }
    }
}

/// Submits SQL and follows the server's continuation pointers until the
/// result is exhausted.
///
/// Every HTTP call (the submission and each continuation fetch) gets its own
/// retry budget. Only proxy errors, provisioning timeouts and other 5xx
/// answers are retried; anything else ends the stream on first occurrence.
pub struct QueryExecutor<C: CloudHttpClient> {
    session: Arc<Session<C>>,
    policy: RetryPolicy,
    request_timeout: Option<Duration>,
}

impl<C: CloudHttpClient> Clone for QueryExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            policy: self.policy,
            request_timeout: self.request_timeout,
        }
    }
}

impl<C: CloudHttpClient> QueryExecutor<C> {
    pub fn new(session: Arc<Session<C>>, policy: RetryPolicy, request_timeout: Option<Duration>) -> Self {
        Self {
            session,
            policy,
            request_timeout,
        }
    }

    /// Runs `sql` on the context's warehouse.
    ///
    /// The stream yields every page in order followed by a single
    /// [`QueryEvent::Done`]. On failure it yields one error and ends. Pages are
    /// fetched only as the consumer polls, one request at a time. Triggering
    /// `cancel` (or dropping the stream) abandons the in-flight request; the
    /// former ends the stream with [`ErrorKind::Cancelled`].
    pub fn execute(
        &self,
        ctx: &SessionContext,
        sql: impl ToString,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<QueryEvent, CloudError>> {
        let session = self.session.clone();
        let policy = self.policy;
        let timeout = self.request_timeout;
        let sql = sql.to_string();
        let org = ctx.org().to_string();
        let warehouse = ctx.require_warehouse().map(str::to_string);

        let stream = try_stream! {
            let warehouse = warehouse?;
            let routing = headers!((HEADER_WAREHOUSE, &warehouse), (HEADER_ORG, &org));

            let body = serde_json::to_value(QueryRequest { sql: &sql })
                .map_err(|e| error!("failed to serialise query body", e))?;

            let mut builder = RequestBuilder::default();
            builder
                .method(Method::Post)
                .path(QUERY_PATH)
                .headers(routing.clone())
                .body(body);
            if let Some(timeout) = timeout {
                builder.timeout(timeout);
            }
            let submit = builder
                .build()
                .map_err(|e| error!("failed to build query request", e))?;

            let mut pager = Pager {
                session,
                policy,
                cancel,
                warehouse,
                query_id: String::new(),
            };

            let first = pager.fetch(&submit).await?;
            pager.query_id = first.id.clone();
            info!(query_id = %first.id, warehouse = %pager.warehouse, "query submitted");

            let mut summary = QuerySummary {
                query_id: first.id.clone(),
                ..Default::default()
            };
            summary.observe(&first.stats);
            summary.pages += 1;

            let mut next_uri = first.next_uri().map(str::to_string);
            yield QueryEvent::Page(first);

            while let Some(uri) = next_uri.take() {
                let mut page_headers = routing.clone();
                page_headers.insert(HEADER_QUERY_ID.to_string(), summary.query_id.clone());

                let mut continuation = Request::get(uri).with_headers(page_headers);
                continuation.timeout = timeout;

                let page = pager.fetch(&continuation).await?;
                summary.observe(&page.stats);
                summary.pages += 1;
                next_uri = page.next_uri().map(str::to_string);

                debug!(
                    query_id = %summary.query_id,
                    page = summary.pages,
                    rows = page.data.len(),
                    more = next_uri.is_some(),
                    "received page"
                );
                yield QueryEvent::Page(page);
            }

            info!(query_id = %summary.query_id, pages = summary.pages, "query finished");
            yield QueryEvent::Done(summary);
        };

        Box::pin(stream)
    }

    /// Runs `sql` to completion and buffers every row.
    pub async fn query_all(
        &self,
        ctx: &SessionContext,
        sql: impl ToString,
    ) -> Result<(Vec<Vec<Value>>, QuerySummary), CloudError> {
        let mut stream = self.execute(ctx, sql, CancellationToken::new());
        let mut rows = Vec::new();

        while let Some(event) = stream.next().await {
            match event? {
                QueryEvent::Page(page) => rows.extend(page.data),
                QueryEvent::Done(summary) => return Ok((rows, summary)),
            }
        }

        Err(error!("query stream ended without completing"))
    }
}

/// Per-query state for fetching pages with retries.
struct Pager<C: CloudHttpClient> {
    session: Arc<Session<C>>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    warehouse: String,
    query_id: String,
}

impl<C: CloudHttpClient> Pager<C> {
    fn cancelled(&self) -> CloudError {
        error!(kind = ErrorKind::Cancelled, "query cancelled").context(self.location())
    }

    fn location(&self) -> String {
        if self.query_id.is_empty() {
            format!("warehouse {}", self.warehouse)
        } else {
            format!("query {} on warehouse {}", self.query_id, self.warehouse)
        }
    }

    /// One page, retrying the narrow set of transient failures with a fresh budget.
    async fn fetch(&self, request: &Request) -> Result<QueryResponse, CloudError> {
        let attempts = self.policy.attempts();
        let mut attempt = 1;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                resp = self.session.call::<QueryResponse>(request) => resp,
            };

            let err = match outcome {
                Ok(mut page) => match page.error.take() {
                    None => return Ok(page),
                    Some(query_error) => {
                        let id = if page.id.is_empty() { &self.query_id } else { &page.id };
                        query_error.into_error(&self.warehouse, id)
                    }
                },
                Err(err) => err.context(self.location()),
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt >= attempts {
                return Err(error!(
                    kind = ErrorKind::RetriesExhausted,
                    "gave up after {} attempts, last error: {}",
                    attempts,
                    err.message()
                )
                .with_hint("please retry again later."));
            }

            warn!(
                attempt,
                max_attempts = attempts,
                delay_ms = self.policy.delay.as_millis() as u64,
                kind = ?err.kind(),
                error = %err.message(),
                "transient query failure, retrying"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                _ = self.session.clock().sleep(self.policy.delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
#[path = "./protocol_test.rs"]
mod protocol_test;
