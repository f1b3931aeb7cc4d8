//! GitHub App authentication: RS256 app JWTs exchanged for installation tokens.

use chrono::Utc;
use codex_github::github_api_error::GithubApiError;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;

use crate::app_config::AppConfig;
use crate::github_http::GithubHttp;
use crate::installation_api::InstallationToken;

/// GitHub accepts app JWTs valid for at most ten minutes.
const APP_JWT_BACKDATE_SECONDS: i64 = 60;
const APP_JWT_LIFETIME_SECONDS: i64 = 540;

pub struct GithubAppAuth {
    app_id: String,
    encoding_key: EncodingKey,
    http: GithubHttp,
}

#[derive(Debug, Serialize)]
struct AppJwtClaims<'a> {
    iat: i64,
    exp: i64,
    iss: &'a str,
}

impl GithubAppAuth {
    pub fn new(config: &AppConfig, http: GithubHttp) -> Result<Self, GithubApiError> {
        let encoding_key = EncodingKey::from_rsa_pem(config.private_key.as_bytes())
            .map_err(|error| GithubApiError::Auth(format!("invalid app private key: {error}")))?;
        Ok(Self {
            app_id: config.app_id.clone(),
            encoding_key,
            http,
        })
    }

    pub fn http(&self) -> &GithubHttp {
        &self.http
    }

    /// Sign the app-level JWT for `now_unix` (seconds).
    pub fn app_jwt(&self, now_unix: i64) -> Result<String, GithubApiError> {
        let claims = AppJwtClaims {
            iat: now_unix - APP_JWT_BACKDATE_SECONDS,
            exp: now_unix + APP_JWT_LIFETIME_SECONDS,
            iss: &self.app_id,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|error| GithubApiError::Auth(format!("failed to sign app jwt: {error}")))
    }

    /// `POST /app/installations/{installation_id}/access_tokens`
    pub async fn mint_installation_token(
        &self,
        installation_id: u64,
    ) -> Result<InstallationToken, GithubApiError> {
        let jwt = self.app_jwt(Utc::now().timestamp())?;
        let url = self
            .http
            .api_url(&format!("/app/installations/{installation_id}/access_tokens"));
        let token: InstallationToken = self
            .http
            .request_json("mint installation token", || {
                self.http.client().post(url.as_str()).bearer_auth(&jwt)
            })
            .await?;
        tracing::debug!(
            installation_id,
            expires_at = %token.expires_at,
            "minted installation access token"
        );
        Ok(token)
    }
}
