use std::{collections::HashMap, time::Duration};

use derive_builder::Builder;
use serde::{Deserialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    CloudError,
    errors::ErrorKind,
    error,
    http::client::{CloudHttpClient, HttpRequest, HttpResponse, Method},
    this_errors,
};

pub mod client;
pub mod login;
mod macros;
pub mod renew;
pub mod url;

pub(crate) use macros::headers;

pub(crate) const HEADER_WAREHOUSE: &str = "X-DATABENDCLOUD-WAREHOUSE";
pub(crate) const HEADER_ORG: &str = "X-DATABENDCLOUD-ORG";
pub(crate) const HEADER_QUERY_ID: &str = "queryID";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

pub(crate) const HINT_LOGIN: &str = "please use `bendsql auth login` to login your account.";
pub(crate) const HINT_RETRY: &str = "please retry again later.";
pub(crate) const HINT_ARGUMENTS: &str = "please check your arguments.";

const STATUS_UNAUTHORIZED: u16 = 401;
const STATUS_NOT_FOUND: u16 = 404;
const STATUS_PROXY_ERROR: u16 = 520;

#[derive(Deserialize, Debug)]
pub(crate) struct GenericResponse<T> {
    pub(crate) data: T,
}

/// Body the API sends alongside a non-2xx status. Both fields are optional
/// in practice, and the body may not be JSON at all.
#[derive(Deserialize, Debug, Default)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub message: String,
}

/// Describes one API call. Authentication and the endpoint are supplied by
/// whoever sends it, so the same value can be re-sent after a token refresh.
#[derive(Builder, Clone, Debug)]
pub struct Request {
    #[builder(default = Method::Get)]
    pub(crate) method: Method,

    #[builder(setter(into))]
    pub(crate) path: String,

    #[builder(setter(into), default = HashMap::new())]
    pub(crate) headers: HashMap<String, String>,

    #[builder(setter(strip_option), default = None)]
    pub(crate) body: Option<serde_json::Value>,

    #[builder(setter(strip_option), default = None)]
    pub(crate) timeout: Option<Duration>,
}

impl Request {
    pub(crate) fn get(path: impl Into<String>) -> Self {
        Self::bare(Method::Get, path)
    }

    pub(crate) fn post(path: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            body,
            ..Self::bare(Method::Post, path)
        }
    }

    pub(crate) fn delete(path: impl Into<String>) -> Self {
        Self::bare(Method::Delete, path)
    }

    fn bare(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub(crate) fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// Performs a single exchange against the API and turns the status code into
/// an [`ErrorKind`]. Never retries.
#[derive(Clone)]
pub struct Transport<C: CloudHttpClient> {
    client: C,
    endpoint: String,
}

impl<C: CloudHttpClient> Transport<C> {
    pub fn new(client: C, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn client(&self) -> &C {
        &self.client
    }

    fn build(&self, request: &Request, auth_token: Option<&str>) -> Result<HttpRequest, CloudError> {
        let url = url::construct_url(&self.endpoint, &request.path);

        let mut headers = request.headers.clone();
        headers.insert("Content-Type".into(), JSON_CONTENT_TYPE.into());
        headers.insert("Accept".into(), JSON_CONTENT_TYPE.into());

        if let Some(token) = auth_token {
            headers.insert("Authorization".into(), format!("Bearer {}", token));
        }

        let body = match request.body.as_ref() {
            Some(body) => this_errors!("failed to serialise body as json", serde_json::to_vec(body)),
            None => Vec::new(),
        };

        Ok(HttpRequest {
            method: request.method,
            url,
            headers,
            body,
            timeout: request.timeout,
        })
    }

    pub async fn send(
        &self,
        request: &Request,
        auth_token: Option<&str>,
    ) -> Result<HttpResponse, CloudError> {
        let http_request = self.build(request, auth_token)?;

        debug!(
            method = request.method.as_str(),
            path = %request.path,
            "sending request"
        );

        let resp = self.client.exchange(http_request).await?;
        check_status(resp.status, &resp.body)?;

        Ok(resp)
    }

    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: &Request,
        auth_token: Option<&str>,
    ) -> Result<T, CloudError> {
        let resp = self.send(request, auth_token).await?;
        decode(&resp.body)
    }
}

pub(crate) fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, CloudError> {
    Ok(this_errors!(
        "failed to parse response as json",
        serde_json::from_slice::<T>(body)
    ))
}

/// Maps an HTTP status to the error taxonomy. 2xx and other non-error codes pass.
pub(crate) fn check_status(status: u16, body: &[u8]) -> Result<(), CloudError> {
    if status < 400 {
        return Ok(());
    }

    let parsed = serde_json::from_slice::<ApiErrorBody>(body).unwrap_or_default();
    let message = if !parsed.message.is_empty() {
        parsed.message
    } else if !parsed.error.is_empty() {
        parsed.error
    } else {
        String::from_utf8_lossy(body).trim().to_string()
    };

    let (kind, hint) = match status {
        STATUS_UNAUTHORIZED => (ErrorKind::AuthFailed, HINT_LOGIN),
        STATUS_NOT_FOUND => (ErrorKind::NotFound, HINT_ARGUMENTS),
        STATUS_PROXY_ERROR => (ErrorKind::ProxyError, HINT_RETRY),
        s if s >= 500 => (ErrorKind::ServerUnavailable, HINT_RETRY),
        _ => (ErrorKind::BadRequest, HINT_ARGUMENTS),
    };

    Err(error!(kind = kind, "{} {}", status, message.trim_end_matches('.')).with_hint(hint))
}
