use std::{fmt::Display, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    CloudError,
    auth::{SessionContext, session::Session},
    errors::ErrorKind,
    error,
    http::{self, Request, client::CloudHttpClient, url::encode_segment},
    retry::RetryPolicy,
    this_errors,
};

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WarehouseSize {
    XSmall,
    Small,
    Medium,
    Large,
    XLarge,
    XXLarge,
    XXXLarge,
    #[default]
    #[serde(other)]
    Unknown,
}

impl WarehouseSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarehouseSize::XSmall => "XSmall",
            WarehouseSize::Small => "Small",
            WarehouseSize::Medium => "Medium",
            WarehouseSize::Large => "Large",
            WarehouseSize::XLarge => "XLarge",
            WarehouseSize::XXLarge => "XXLarge",
            WarehouseSize::XXXLarge => "XXXLarge",
            WarehouseSize::Unknown => "Unknown",
        }
    }
}

impl Display for WarehouseSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WarehouseSize {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let size = match s.to_ascii_lowercase().as_str() {
            "xsmall" => WarehouseSize::XSmall,
            "small" => WarehouseSize::Small,
            "medium" => WarehouseSize::Medium,
            "large" => WarehouseSize::Large,
            "xlarge" => WarehouseSize::XLarge,
            "xxlarge" => WarehouseSize::XXLarge,
            "xxxlarge" => WarehouseSize::XXXLarge,
            _ => {
                return Err(error!(
                    kind = ErrorKind::BadRequest,
                    "unknown warehouse size {:?}",
                    s
                ));
            }
        };
        Ok(size)
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WarehouseState {
    Starting,
    Running,
    Suspending,
    Suspended,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Display for WarehouseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A snapshot of a warehouse. Never cached: the server changes it out of band.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WarehouseStatus {
    #[serde(rename = "id", default)]
    pub name: String,
    #[serde(default)]
    pub size: WarehouseSize,
    #[serde(default)]
    pub state: WarehouseState,
    #[serde(default)]
    pub ready_instances: u64,
    #[serde(default)]
    pub total_instances: u64,
}

impl Display for WarehouseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}):{}", self.name, self.size, self.state)
    }
}

#[derive(Serialize, Debug)]
struct CreateWarehouseRequest<'a> {
    name: &'a str,
    size: &'a str,
}

/// Reads and drives the state of named warehouses in an org.
pub struct WarehouseController<C: CloudHttpClient> {
    session: Arc<Session<C>>,
}

impl<C: CloudHttpClient> Clone for WarehouseController<C> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

impl<C: CloudHttpClient> WarehouseController<C> {
    pub fn new(session: Arc<Session<C>>) -> Self {
        Self { session }
    }

    fn collection_path(ctx: &SessionContext) -> String {
        format!("/api/v1/orgs/{}/tenant/warehouses", encode_segment(ctx.org()))
    }

    fn item_path(ctx: &SessionContext, name: &str) -> String {
        format!("{}/{}", Self::collection_path(ctx), encode_segment(name))
    }

    pub async fn list(&self, ctx: &SessionContext) -> Result<Vec<WarehouseStatus>, CloudError> {
        let resp = self
            .session
            .call::<http::GenericResponse<Vec<WarehouseStatus>>>(&Request::get(
                Self::collection_path(ctx),
            ))
            .await?;
        Ok(resp.data)
    }

    /// Fails with [`ErrorKind::NotFound`] when the warehouse does not exist.
    pub async fn view(&self, ctx: &SessionContext, name: &str) -> Result<WarehouseStatus, CloudError> {
        let resp = self
            .session
            .call::<http::GenericResponse<WarehouseStatus>>(&Request::get(Self::item_path(
                ctx, name,
            )))
            .await?;
        Ok(resp.data)
    }

    /// Asks the server to start the warehouse. Does not wait.
    pub async fn resume(&self, ctx: &SessionContext, name: &str) -> Result<(), CloudError> {
        let path = format!("{}/resume", Self::item_path(ctx, name));
        self.session.call_ack(&Request::post(path, None)).await?;
        info!(warehouse = name, "resume requested");
        Ok(())
    }

    pub async fn suspend(&self, ctx: &SessionContext, name: &str) -> Result<(), CloudError> {
        let path = format!("{}/suspend", Self::item_path(ctx, name));
        self.session.call_ack(&Request::post(path, None)).await?;
        info!(warehouse = name, "suspend requested");
        Ok(())
    }

    pub async fn create(
        &self,
        ctx: &SessionContext,
        name: &str,
        size: WarehouseSize,
    ) -> Result<(), CloudError> {
        let body = this_errors!(
            "failed to serialise create warehouse body",
            serde_json::to_value(CreateWarehouseRequest {
                name,
                size: size.as_str(),
            })
        );
        self.session
            .call_ack(&Request::post(Self::collection_path(ctx), Some(body)))
            .await?;
        info!(warehouse = name, size = size.as_str(), "warehouse created");
        Ok(())
    }

    pub async fn delete(&self, ctx: &SessionContext, name: &str) -> Result<(), CloudError> {
        self.session
            .call_ack(&Request::delete(Self::item_path(ctx, name)))
            .await?;
        info!(warehouse = name, "warehouse deleted");
        Ok(())
    }

    /// Resumes the warehouse, then polls it until it is running.
    ///
    /// Polls exactly `policy.max_attempts` times at most, sleeping
    /// `policy.delay` between polls, and fails with [`ErrorKind::Timeout`]
    /// when the budget runs out. A failing poll is returned as is.
    pub async fn resume_and_wait(
        &self,
        ctx: &SessionContext,
        name: &str,
        policy: RetryPolicy,
    ) -> Result<WarehouseStatus, CloudError> {
        self.resume(ctx, name).await?;
        self.wait_running(ctx, name, policy).await
    }

    pub async fn create_and_wait(
        &self,
        ctx: &SessionContext,
        name: &str,
        size: WarehouseSize,
        policy: RetryPolicy,
    ) -> Result<WarehouseStatus, CloudError> {
        self.create(ctx, name, size).await?;
        self.resume_and_wait(ctx, name, policy).await
    }

    async fn wait_running(
        &self,
        ctx: &SessionContext,
        name: &str,
        policy: RetryPolicy,
    ) -> Result<WarehouseStatus, CloudError> {
        let clock = self.session.clock();
        let attempts = policy.attempts();
        let mut last_state = WarehouseState::Unknown;

        for attempt in 1..=attempts {
            let status = self.view(ctx, name).await?;
            debug!(warehouse = name, attempt, state = %status.state, "polled warehouse");

            if status.state == WarehouseState::Running {
                return Ok(status);
            }
            last_state = status.state;

            if attempt < attempts {
                clock.sleep(policy.delay).await;
            }
        }

        Err(error!(
            kind = ErrorKind::Timeout,
            "warehouse {} is not running after {} polls, state is {}",
            name,
            attempts,
            last_state
        )
        .with_hint("the warehouse may still be starting, please try again."))
    }
}
