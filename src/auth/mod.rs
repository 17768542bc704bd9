use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CloudError, errors::ErrorKind, error};

pub mod session;
pub mod store;

/// Access/refresh token pair as persisted by a [`store::CredentialStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl From<crate::http::login::TokenData> for Token {
    fn from(data: crate::http::login::TokenData) -> Self {
        Self {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            expires_at: data.expires_at,
        }
    }
}

/// The org and warehouse a command runs against.
///
/// Values are never mutated in place; switching warehouse or org produces a
/// new context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionContext {
    org: String,
    warehouse: Option<String>,
}

impl SessionContext {
    pub fn new(org: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            warehouse: None,
        }
    }

    pub fn with_warehouse(&self, warehouse: impl Into<String>) -> Self {
        Self {
            org: self.org.clone(),
            warehouse: Some(warehouse.into()),
        }
    }

    pub fn with_org(&self, org: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            warehouse: self.warehouse.clone(),
        }
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn warehouse(&self) -> Option<&str> {
        self.warehouse.as_deref()
    }

    pub(crate) fn require_warehouse(&self) -> Result<&str, CloudError> {
        self.warehouse
            .as_deref()
            .filter(|w| !w.is_empty())
            .ok_or_else(|| {
                error!(kind = ErrorKind::BadRequest, "no warehouse selected")
                    .with_hint("pass a warehouse name or select a default one.")
            })
    }
}
