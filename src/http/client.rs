use std::{collections::HashMap, time::Duration};

use crate::CloudError;
use core::future::Future;

#[cfg(feature = "reqwest")]
use reqwest;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// A fully resolved request, ready to be put on the wire.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// A single HTTP exchange. Implementations must not retry and must not
/// interpret the status code; both are handled by the caller.
pub trait CloudHttpClient: Clone + Send + Sync + 'static {
    fn new() -> Self;

    fn exchange(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, CloudError>> + Send;
}

#[cfg(feature = "reqwest")]
impl CloudHttpClient for reqwest::Client {
    fn new() -> Self {
        reqwest::Client::builder()
            .gzip(true)
            .referer(false)
            .build()
            .unwrap_or_default()
    }

    fn exchange(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = Result<HttpResponse, CloudError>> + Send {
        use crate::{error, this_errors};

        async move {
            use reqwest::header::HeaderMap;

            let url = this_errors!("failed to parse url", reqwest::Url::parse(&request.url));

            let headers = this_errors!(
                "failed to convert headers",
                request
                    .headers
                    .iter()
                    .map(|(k, v)| {
                        Ok((
                            reqwest::header::HeaderName::from_bytes(k.as_bytes())
                                .map_err(|e| error!(e))?,
                            reqwest::header::HeaderValue::from_str(v.as_str())
                                .map_err(|e| error!(e))?,
                        ))
                    })
                    .collect::<Result<
                        Vec<(reqwest::header::HeaderName, reqwest::header::HeaderValue)>,
                        CloudError,
                    >>()
            );

            let method = match request.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Delete => reqwest::Method::DELETE,
            };

            let mut builder = self
                .request(method, url)
                .headers(HeaderMap::from_iter(headers))
                .body(request.body);

            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }

            let resp = this_errors!("failed to send request", builder.send().await);
            let status = resp.status().as_u16();

            let bytes = this_errors!("failed to get response bytes", resp.bytes().await);

            Ok(HttpResponse {
                status,
                body: bytes.to_vec(),
            })
        }
    }
}
