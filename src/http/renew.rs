use serde::Serialize;

pub(crate) static RENEW_TOKEN_PATH: &str = "/api/v1/account/renew-token";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RenewTokenRequest<'a> {
    pub refresh_token: &'a str,
}

pub(crate) type RenewTokenResponse = super::GenericResponse<super::login::TokenData>;
