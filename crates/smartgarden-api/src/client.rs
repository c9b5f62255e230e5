// Hand-crafted async HTTP client for the smart system API (v2).
//
// Base path: /v2/
// Auth: bearer token + `Authorization-Provider: husqvarna` + `X-Api-Key`

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::{self, Error};
use crate::models::{
    CommandRequest, LocationDocument, LocationList, Resource, WebSocketRequest, WebSocketResponse,
};
use crate::transport::TransportConfig;

const JSON_API: &str = "application/vnd.api+json";

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the smart system REST surface.
///
/// Stateless with respect to auth: every call takes the bearer token the
/// caller obtained from its token manager.
pub struct SmartSystemClient {
    http: reqwest::Client,
    base_url: Url,
    application_key: String,
}

impl SmartSystemClient {
    // ── Constructors ─────────────────────────────────────────────────

    pub fn new(
        base_url: Url,
        application_key: impl Into<String>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, application_key))
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        application_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url,
            application_key: application_key.into(),
        }
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: Url,
        token: &SecretString,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(token.expose_secret())
            .header("Authorization-Provider", "husqvarna")
            .header("X-Api-Key", &self.application_key)
    }

    // ── Locations ────────────────────────────────────────────────────

    /// List every location registered to the account.
    ///
    /// An empty list is reported as [`Error::NoLocations`].
    pub async fn list_locations(&self, token: &SecretString) -> Result<Vec<Resource>, Error> {
        let url = self.url("/v2/locations")?;
        debug!("GET {url}");

        let resp = self.request(reqwest::Method::GET, url, token).send().await?;
        let list: LocationList = handle_response(resp).await?;
        if list.data.is_empty() {
            return Err(Error::NoLocations);
        }
        Ok(list.data)
    }

    /// Fetch one location with every device service in `included`.
    pub async fn get_location(
        &self,
        token: &SecretString,
        location_id: &str,
    ) -> Result<LocationDocument, Error> {
        let url = self.url(&format!("/v2/locations/{location_id}"))?;
        debug!("GET {url}");

        let resp = self.request(reqwest::Method::GET, url, token).send().await?;
        handle_response(resp).await
    }

    // ── Push socket negotiation ──────────────────────────────────────

    /// Ask for a websocket URL bound to a location.
    ///
    /// The returned URL embeds its own credentials and is only valid for a
    /// short time; connect right away.
    pub async fn websocket_url(
        &self,
        token: &SecretString,
        location_id: &str,
    ) -> Result<Url, Error> {
        let url = self.url("/v2/websocket")?;
        debug!("POST {url}");

        let resp = self
            .json_request(
                reqwest::Method::POST,
                url,
                token,
                &WebSocketRequest::for_location(location_id),
            )?
            .send()
            .await?;
        let body: WebSocketResponse = handle_response(resp).await?;
        Ok(Url::parse(&body.data.attributes.url)?)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Send a control command to a service. Accepted commands return 202.
    pub async fn send_command(
        &self,
        token: &SecretString,
        service_id: &str,
        command: &CommandRequest,
    ) -> Result<(), Error> {
        let url = self.url(&format!("/v2/command/{service_id}"))?;
        debug!(
            command = %command.data.attributes.command,
            request_id = %command.data.id,
            "PUT {url}"
        );

        let resp = self
            .json_request(reqwest::Method::PUT, url, token, command)?
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(parse_error(status, resp).await)
        }
    }

    fn json_request<B: Serialize>(
        &self,
        method: reqwest::Method,
        url: Url,
        token: &SecretString,
        body: &B,
    ) -> Result<reqwest::RequestBuilder, Error> {
        let payload = serde_json::to_vec(body).map_err(|e| Error::Deserialization {
            message: format!("failed to encode request body: {e}"),
            body: String::new(),
        })?;
        Ok(self
            .request(method, url, token)
            .header(reqwest::header::CONTENT_TYPE, JSON_API)
            .body(payload))
    }
}

// ── Response handling ────────────────────────────────────────────────

async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    if !status.is_success() {
        return Err(parse_error(status, resp).await);
    }

    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body,
        }
    })
}

async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
    let retry_after = error::retry_after_header(resp.headers());
    let raw = resp.text().await.unwrap_or_default();
    let message = error::error_message(&raw, status.as_str());

    match status.as_u16() {
        401 if error::mentions_simultaneous_login(&message) => Error::SimultaneousLogin { message },
        401 => Error::Unauthorized,
        403 => Error::AccessDenied { message },
        429 => Error::RateLimited {
            retry_after_secs: retry_after,
        },
        code => Error::Api {
            status: code,
            message,
        },
    }
}
