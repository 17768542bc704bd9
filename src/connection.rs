use std::{sync::Arc, time::Duration};

use derive_builder::Builder;
use futures_util::stream::BoxStream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    CloudError,
    auth::{SessionContext, Token, session::Session, store::CredentialStore},
    clock::{Clock, SystemClock},
    driver::protocol::{QueryEvent, QueryExecutor, QuerySummary},
    errors::ErrorKind,
    error,
    http::{
        HINT_ARGUMENTS, Transport,
        client::CloudHttpClient,
        url::{ENDPOINT_ENV, resolve_endpoint},
    },
    retry::RetryPolicy,
    stage::StageClient,
    warehouse::{WarehouseController, WarehouseSize, WarehouseStatus},
};

#[derive(Builder, Debug, Clone)]
pub struct CloudConnectionOpts {
    /// Override the API endpoint.
    ///
    /// `BENDSQL_API_ENDPOINT` takes precedence when set. If neither is set,
    /// this defaults to `https://app.databend.com`.
    ///
    /// 如果你是在中国境内连接，请将此项设置为 `https://app.databend.cn`
    #[builder(setter(into, strip_option), default = None)]
    pub(crate) endpoint: Option<String>,

    #[builder(setter(into))]
    pub(crate) org: String,

    #[builder(setter(into, strip_option), default = None)]
    pub(crate) warehouse: Option<String>,

    /// Budget for query submission and for each continuation fetch.
    #[builder(default = RetryPolicy::query_default())]
    pub(crate) query_retry: RetryPolicy,

    /// Budget for polling a resumed warehouse until it runs.
    #[builder(default = RetryPolicy::warehouse_wait_default())]
    pub(crate) warehouse_wait: RetryPolicy,

    /// Per-request timeout for query calls. Unbounded when unset.
    #[builder(setter(strip_option), default = None)]
    pub(crate) request_timeout: Option<Duration>,

    #[builder(default = Duration::from_secs(60))]
    pub(crate) upload_timeout: Duration,
}

impl CloudConnectionOpts {
    pub fn connect_with_client<C: CloudHttpClient>(
        self,
        store: Arc<dyn CredentialStore>,
    ) -> CloudConnection<C> {
        let env_endpoint = std::env::var(ENDPOINT_ENV).ok();
        self.assemble(C::new(), store, Arc::new(SystemClock), env_endpoint)
    }

    #[cfg(feature = "reqwest")]
    pub fn connect(self, store: Arc<dyn CredentialStore>) -> CloudConnection<reqwest::Client> {
        self.connect_with_client::<reqwest::Client>(store)
    }

    pub(crate) fn assemble<C: CloudHttpClient>(
        self,
        client: C,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        env_endpoint: Option<String>,
    ) -> CloudConnection<C> {
        let endpoint = resolve_endpoint(env_endpoint, self.endpoint.as_deref());
        let session = Arc::new(Session::new(Transport::new(client, endpoint), store, clock));

        let executor = QueryExecutor::new(session.clone(), self.query_retry, self.request_timeout);
        let stage = StageClient::new(session.clone(), executor.clone(), self.upload_timeout);

        let mut context = SessionContext::new(self.org.clone());
        if let Some(warehouse) = self.warehouse.as_deref() {
            context = context.with_warehouse(warehouse);
        }

        CloudConnection {
            warehouses: WarehouseController::new(session.clone()),
            session,
            executor,
            stage,
            context,
            opts: Arc::new(self),
        }
    }
}

/// A session together with the controllers that share it, bound to a
/// default org and warehouse.
pub struct CloudConnection<C: CloudHttpClient> {
    session: Arc<Session<C>>,
    warehouses: WarehouseController<C>,
    executor: QueryExecutor<C>,
    stage: StageClient<C>,
    context: SessionContext,
    opts: Arc<CloudConnectionOpts>,
}

impl<C: CloudHttpClient> CloudConnection<C> {
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn endpoint(&self) -> &str {
        self.session.transport().endpoint()
    }

    pub fn session(&self) -> &Arc<Session<C>> {
        &self.session
    }

    pub fn warehouses(&self) -> &WarehouseController<C> {
        &self.warehouses
    }

    pub fn executor(&self) -> &QueryExecutor<C> {
        &self.executor
    }

    pub fn stage(&self) -> &StageClient<C> {
        &self.stage
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Token, CloudError> {
        self.session.login(email, password).await
    }

    /// Streams `sql` on the default warehouse.
    pub fn query(
        &self,
        sql: impl ToString,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<QueryEvent, CloudError>> {
        self.executor.execute(&self.context, sql, cancel)
    }

    pub async fn query_all(
        &self,
        sql: impl ToString,
    ) -> Result<(Vec<Vec<Value>>, QuerySummary), CloudError> {
        self.executor.query_all(&self.context, sql).await
    }

    pub async fn resume_and_wait(&self, name: &str) -> Result<WarehouseStatus, CloudError> {
        self.warehouses
            .resume_and_wait(&self.context, name, self.opts.warehouse_wait)
            .await
    }

    pub async fn create_and_wait(
        &self,
        name: &str,
        size: WarehouseSize,
    ) -> Result<WarehouseStatus, CloudError> {
        self.warehouses
            .create_and_wait(&self.context, name, size, self.opts.warehouse_wait)
            .await
    }

    /// Picks an org and warehouse the account can use.
    ///
    /// Named values must exist. Otherwise the first org membership and the
    /// first warehouse in that org are chosen. An org without warehouses
    /// yields a context with no warehouse.
    pub async fn resolve_context(
        &self,
        org: Option<&str>,
        warehouse: Option<&str>,
    ) -> Result<SessionContext, CloudError> {
        let orgs = self.session.list_orgs().await?;
        let membership = match org.filter(|o| !o.is_empty()) {
            Some(wanted) => orgs.iter().find(|o| o.org_slug == wanted).ok_or_else(|| {
                error!(kind = ErrorKind::NotFound, "org {} not found", wanted)
                    .with_hint(HINT_ARGUMENTS)
            })?,
            None => orgs
                .first()
                .ok_or_else(|| error!(kind = ErrorKind::NotFound, "account belongs to no org"))?,
        };

        let ctx = SessionContext::new(membership.org_slug.clone());
        let available = self.warehouses.list(&ctx).await?;
        let chosen = match warehouse.filter(|w| !w.is_empty()) {
            Some(wanted) => Some(
                available
                    .iter()
                    .find(|w| w.name == wanted)
                    .ok_or_else(|| {
                        error!(
                            kind = ErrorKind::NotFound,
                            "warehouse {} not found in org {}",
                            wanted,
                            ctx.org()
                        )
                        .with_hint(HINT_ARGUMENTS)
                    })?,
            ),
            None => available.first(),
        };

        Ok(match chosen {
            Some(status) => ctx.with_warehouse(status.name.clone()),
            None => ctx,
        })
    }

    /// Checks credentials and reachability by running a trivial query.
    pub async fn ping(&self) -> Result<(), CloudError> {
        self.query_all("SELECT 1").await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "./connection_test.rs"]
mod connection_test;
