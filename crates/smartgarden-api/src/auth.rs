// OAuth2 client-credentials flow against the Husqvarna authentication API.
//
// Token exchange: POST {auth_host}/v1/oauth2/token (form encoded)
// Token revoke:   POST {auth_host}/v1/oauth2/revoke

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{self, Error};
use crate::transport::TransportConfig;

/// Application key + secret issued by the developer portal.
///
/// The key doubles as the `X-Api-Key` header on every smart system call.
#[derive(Debug, Clone)]
pub struct ApplicationCredentials {
    pub application_key: String,
    pub application_secret: SecretString,
}

impl ApplicationCredentials {
    pub fn new(application_key: impl Into<String>, application_secret: SecretString) -> Self {
        Self {
            application_key: application_key.into(),
            application_secret,
        }
    }
}

/// A freshly issued access token, as returned by the token endpoint.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub access_token: SecretString,
    pub token_type: String,
    pub expires_in: Duration,
    pub scope: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: u64,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

/// Client for the authentication host.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: ApplicationCredentials,
}

impl AuthClient {
    /// Build from credentials and a transport config.
    pub fn new(
        base_url: Url,
        credentials: ApplicationCredentials,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, credentials))
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        credentials: ApplicationCredentials,
    ) -> Self {
        Self {
            http,
            base_url,
            credentials,
        }
    }

    /// The application credentials this client authenticates with.
    pub fn credentials(&self) -> &ApplicationCredentials {
        &self.credentials
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    /// Exchange the application credentials for an access token.
    pub async fn exchange(&self) -> Result<AccessGrant, Error> {
        let url = self.url("/v1/oauth2/token")?;
        debug!("POST {url}");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.application_key.as_str()),
            (
                "client_secret",
                self.credentials.application_secret.expose_secret(),
            ),
        ];

        let resp = self.http.post(url).form(&form).send().await?;
        let status = resp.status();

        if status.is_success() {
            let body = resp.text().await?;
            let token: TokenResponse =
                serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                    message: format!("token response: {e}"),
                    body: String::new(),
                })?;
            return Ok(AccessGrant {
                access_token: SecretString::from(token.access_token),
                token_type: token.token_type,
                expires_in: Duration::from_secs(token.expires_in),
                scope: token.scope,
                user_id: token.user_id,
            });
        }

        Err(token_error(status, resp).await)
    }

    /// Revoke an access token. Used when a session ends.
    pub async fn revoke(&self, token: &SecretString) -> Result<(), Error> {
        let url = self.url("/v1/oauth2/revoke")?;
        debug!("POST {url}");

        let resp = self
            .http
            .post(url)
            .bearer_auth(token.expose_secret())
            .form(&[("token", token.expose_secret())])
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(token_error(status, resp).await)
        }
    }
}

/// Map a failed token endpoint response into the auth error taxonomy.
async fn token_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
    let retry_after = error::retry_after_header(resp.headers());
    let raw = resp.text().await.unwrap_or_default();
    let message = error::error_message(&raw, status.as_str());

    if error::mentions_simultaneous_login(&message) {
        return Error::SimultaneousLogin { message };
    }

    match status.as_u16() {
        400 | 401 => Error::Authentication {
            status: status.as_u16(),
            message,
        },
        403 => Error::AccessDenied {
            message: format!("{message} (hint: did you 'Connect an API' in your application?)"),
        },
        429 => Error::RateLimited {
            retry_after_secs: retry_after,
        },
        code => Error::Api {
            status: code,
            message,
        },
    }
}
