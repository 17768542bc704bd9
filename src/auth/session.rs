use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
    CloudError,
    auth::{Token, store::CredentialStore},
    clock::Clock,
    errors::ErrorKind,
    error,
    http::{
        self, HINT_LOGIN, Request, Transport,
        client::{CloudHttpClient, HttpResponse},
        login::{
            ACCOUNT_INFO_PATH, AccountInfo, MY_ORGS_PATH, OrgMembership, SIGN_IN_PATH,
            SignInRequest, SignInResponse,
        },
        renew::{RENEW_TOKEN_PATH, RenewTokenRequest, RenewTokenResponse},
    },
    this_errors,
};

/// Attaches a valid access token to every API call.
///
/// The token is refreshed before a call when it has expired, and once more if
/// the server still answers 401. The check-then-refresh sequence runs under a
/// single async lock so concurrent callers never race two refreshes against
/// each other.
pub struct Session<C: CloudHttpClient> {
    transport: Transport<C>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    // Loaded from the store on first use.
    token: Mutex<Option<Token>>,
}

impl<C: CloudHttpClient> Session<C> {
    pub fn new(
        transport: Transport<C>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            store,
            clock,
            token: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &Transport<C> {
        &self.transport
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Signs in with email and password and persists the returned token.
    pub async fn login(&self, email: &str, password: &str) -> Result<Token, CloudError> {
        let body = this_errors!(
            "failed to serialise sign-in body",
            serde_json::to_value(SignInRequest { email, password })
        );
        let request = Request::post(SIGN_IN_PATH, Some(body));

        let resp = self
            .transport
            .send_json::<SignInResponse>(&request, None)
            .await
            .map_err(|e| match e.kind() {
                // the server's own message is the useful part here
                ErrorKind::AuthFailed => e.without_hint(),
                _ => e,
            })?;

        let token = Token::from(resp.data);
        let mut guard = self.token.lock().await;
        self.store.save(&token)?;
        *guard = Some(token.clone());

        info!("signed in");
        Ok(token)
    }

    /// Adopts an existing access/refresh pair and checks it against the API.
    ///
    /// The pair's expiry is unknown, so it is stored as already expired: the
    /// validating call renews it and persists the server's expiry.
    pub async fn login_with_token(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<AccountInfo, CloudError> {
        let token = Token::new(access_token, refresh_token, self.clock.now());
        {
            let mut guard = self.token.lock().await;
            self.store.save(&token)?;
            *guard = Some(token);
        }

        let account = self.account_info().await?;
        info!(account = %account.email, "signed in with token");
        Ok(account)
    }

    pub async fn account_info(&self) -> Result<AccountInfo, CloudError> {
        let resp = self
            .call::<http::GenericResponse<AccountInfo>>(&Request::get(ACCOUNT_INFO_PATH))
            .await?;
        Ok(resp.data)
    }

    pub async fn list_orgs(&self) -> Result<Vec<OrgMembership>, CloudError> {
        let resp = self
            .call::<http::GenericResponse<Vec<OrgMembership>>>(&Request::get(MY_ORGS_PATH))
            .await?;
        Ok(resp.data)
    }

    /// Sends `request` with a valid token and decodes the JSON answer.
    pub async fn call<T: DeserializeOwned>(&self, request: &Request) -> Result<T, CloudError> {
        let resp = self.authorized_call(request).await?;
        http::decode(&resp.body)
    }

    /// Sends `request` with a valid token, ignoring the response body.
    pub async fn call_ack(&self, request: &Request) -> Result<(), CloudError> {
        self.authorized_call(request).await?;
        Ok(())
    }

    pub async fn authorized_call(&self, request: &Request) -> Result<HttpResponse, CloudError> {
        let access_token = self.valid_access_token().await?;

        match self.transport.send(request, Some(&access_token)).await {
            Err(err) if err.kind() == ErrorKind::AuthFailed => {
                warn!(
                    method = request.method.as_str(),
                    path = %request.path,
                    "request rejected as unauthorized, refreshing token once"
                );
                let access_token = self.refresh_after_rejection(&access_token).await?;
                self.transport
                    .send(request, Some(&access_token))
                    .await
                    .map_err(|e| match e.kind() {
                        ErrorKind::AuthFailed => e.with_kind(ErrorKind::Unauthenticated),
                        _ => e,
                    })
            }
            other => other,
        }
    }

    async fn valid_access_token(&self) -> Result<String, CloudError> {
        let mut guard = self.token.lock().await;
        let token = self.current_token(&mut guard)?;

        if token.is_expired(self.clock.now()) {
            debug!(expires_at = %token.expires_at, "access token expired");
            let fresh = self.refresh(&token).await?;
            let access = fresh.access_token.clone();
            *guard = Some(fresh);
            return Ok(access);
        }

        Ok(token.access_token)
    }

    /// Refreshes after a 401, unless another caller already replaced the
    /// rejected token while this one was waiting for the lock.
    async fn refresh_after_rejection(&self, rejected: &str) -> Result<String, CloudError> {
        let mut guard = self.token.lock().await;
        let token = self.current_token(&mut guard)?;

        if token.access_token != rejected {
            return Ok(token.access_token);
        }

        let fresh = self.refresh(&token).await?;
        let access = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access)
    }

    fn current_token(&self, guard: &mut MutexGuard<'_, Option<Token>>) -> Result<Token, CloudError> {
        if guard.is_none() {
            **guard = self.store.load()?;
        }

        guard.clone().ok_or_else(|| {
            error!(kind = ErrorKind::Unauthenticated, "no token found").with_hint(HINT_LOGIN)
        })
    }

    async fn refresh(&self, token: &Token) -> Result<Token, CloudError> {
        info!("refreshing access token");

        let body = this_errors!(
            "failed to serialise renew-token body",
            serde_json::to_value(RenewTokenRequest {
                refresh_token: &token.refresh_token,
            })
        );
        let request = Request::post(RENEW_TOKEN_PATH, Some(body));

        let resp = self
            .transport
            .send_json::<RenewTokenResponse>(&request, None)
            .await
            .map_err(|e| {
                error!(
                    kind = ErrorKind::Unauthenticated,
                    "failed to refresh token: {}",
                    e.message()
                )
                .with_hint(HINT_LOGIN)
            })?;

        let fresh = Token::from(resp.data);
        self.store.save(&fresh)?;

        Ok(fresh)
    }
}

#[cfg(test)]
#[path = "./session_test.rs"]
mod session_test;
