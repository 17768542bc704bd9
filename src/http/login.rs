use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) static SIGN_IN_PATH: &str = "/api/v1/account/sign-in";
pub(crate) static ACCOUNT_INFO_PATH: &str = "/api/v1/account/info";
pub(crate) static MY_ORGS_PATH: &str = "/api/v1/my/orgs";

#[derive(Debug, Serialize)]
pub(crate) struct SignInRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Token pair handed out by sign-in and renew-token.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TokenData {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

pub(crate) type SignInResponse = super::GenericResponse<TokenData>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub default_org_slug: String,
    #[serde(default)]
    pub password_enabled: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgMembership {
    #[serde(default)]
    pub org_slug: String,
    #[serde(default)]
    pub org_name: String,
    #[serde(default)]
    pub org_state: String,
    #[serde(default, rename = "tenantID")]
    pub tenant_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub member_kind: String,
}

impl std::fmt::Display for OrgMembership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({})[{}]{}@{}:{}",
            self.org_state, self.org_name, self.org_slug, self.provider, self.region
        )
    }
}
