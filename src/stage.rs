use std::{collections::HashMap, sync::Arc, time::Duration};

use serde_json::Value;
use tracing::{debug, info};

use crate::{
    CloudError,
    auth::{SessionContext, session::Session},
    driver::protocol::QueryExecutor,
    errors::ErrorKind,
    error,
    http::{
        self, HINT_ARGUMENTS,
        client::{CloudHttpClient, HttpRequest, Method},
    },
};

/// Where and how to send the file, as handed out by `PRESIGN UPLOAD`.
#[derive(Debug, Clone, PartialEq)]
pub struct PresignedUpload {
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub url: String,
}

impl PresignedUpload {
    /// Reads the first result row: `[method, headers, url]`.
    ///
    /// `headers` may arrive as a JSON object or as a string holding one.
    pub(crate) fn from_row(row: &[Value]) -> Result<Self, CloudError> {
        let [method, headers, url, ..] = row else {
            return Err(error!(
                kind = ErrorKind::Internal,
                "presign row has {} columns, expected 3",
                row.len()
            ));
        };

        let method = match method.as_str().map(str::to_ascii_uppercase).as_deref() {
            Some("PUT") => Method::Put,
            Some("POST") => Method::Post,
            other => {
                return Err(error!(
                    kind = ErrorKind::Internal,
                    "unsupported presign method {:?}",
                    other
                ));
            }
        };

        let headers = match headers {
            Value::String(raw) if raw.trim().is_empty() => Value::Object(Default::default()),
            Value::String(raw) => http::decode::<Value>(raw.as_bytes())?,
            other => other.clone(),
        };
        let headers = match headers {
            Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| match v {
                    Value::String(s) => (k, s),
                    other => (k, other.to_string()),
                })
                .collect(),
            Value::Null => HashMap::new(),
            other => {
                return Err(error!(
                    kind = ErrorKind::Internal,
                    "presign headers are not an object: {}",
                    other
                ));
            }
        };

        let url = url
            .as_str()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| error!(kind = ErrorKind::Internal, "presign row has no url"))?
            .to_string();

        Ok(Self {
            method,
            headers,
            url,
        })
    }
}

/// Lists stages and uploads files into them through presigned URLs.
pub struct StageClient<C: CloudHttpClient> {
    session: Arc<Session<C>>,
    executor: QueryExecutor<C>,
    timeout: Duration,
}

impl<C: CloudHttpClient> StageClient<C> {
    pub fn new(session: Arc<Session<C>>, executor: QueryExecutor<C>, timeout: Duration) -> Self {
        Self {
            session,
            executor,
            timeout,
        }
    }

    /// Lists the org's stages, or the files under `@stage[/path]` when given.
    pub async fn list(
        &self,
        ctx: &SessionContext,
        stage: Option<&str>,
    ) -> Result<Vec<Vec<Value>>, CloudError> {
        let (rows, _) = self.executor.query_all(ctx, list_sql(stage)).await?;
        Ok(rows)
    }

    pub async fn presign(
        &self,
        ctx: &SessionContext,
        stage: &str,
        file_name: &str,
    ) -> Result<PresignedUpload, CloudError> {
        let sql = format!(
            "PRESIGN UPLOAD @{}/{}",
            stage.trim_start_matches('@'),
            file_name.trim_start_matches('/')
        );
        let (rows, _) = self.executor.query_all(ctx, &sql).await?;

        let row = rows.first().ok_or_else(|| {
            error!(kind = ErrorKind::Internal, "`{}` returned no rows", sql)
        })?;
        PresignedUpload::from_row(row)
    }

    /// Sends `data` to `@stage/file_name`.
    pub async fn upload(
        &self,
        ctx: &SessionContext,
        stage: &str,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<(), CloudError> {
        let presigned = self.presign(ctx, stage, file_name).await?;
        debug!(stage, file_name, method = presigned.method.as_str(), "got presigned url");

        let size = data.len();
        let mut headers = presigned.headers;
        headers.insert("Content-Length".into(), size.to_string());

        let request = HttpRequest {
            method: presigned.method,
            url: presigned.url,
            headers,
            body: data,
            timeout: Some(self.timeout),
        };

        let resp = self.session.transport().client().exchange(request).await?;
        if resp.status >= 400 {
            return Err(error!(
                kind = ErrorKind::BadRequest,
                "failed to upload {} to stage {}: {} {}",
                file_name,
                stage,
                resp.status,
                String::from_utf8_lossy(&resp.body).trim()
            )
            .with_hint(HINT_ARGUMENTS));
        }

        info!(stage, file_name, bytes = size, "uploaded file to stage");
        Ok(())
    }
}

fn list_sql(stage: Option<&str>) -> String {
    match stage.map(|s| s.trim().trim_start_matches('@')) {
        Some(stage) if !stage.is_empty() => format!("LIST @{}", stage),
        _ => "SHOW STAGES".to_string(),
    }
}

#[cfg(test)]
#[path = "./stage_test.rs"]
mod stage_test;
