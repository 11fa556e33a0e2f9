//! REST API client for the salt-api HTTP endpoints.
//!
//! Wraps login, lowstate submission and job lookup using [`reqwest`].
//! A [`SaltApi`] is built from one [`Session`] and never changes its
//! credentials afterwards; re-authentication produces a new instance.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{StatusCode, Url};
use saltctl_core::types::{JobId, ResultRecord, WorkRequest};

use crate::error::ClientError;
use crate::messages::{
    merge_job_results, DispatchEntry, LoginGrant, LoginRequest, ReturnEnvelope,
};
use crate::session::Session;

/// Header carrying the session token on authenticated requests.
pub const AUTH_HEADER: &str = "x-auth-header";

/// Upper bound on a single HTTP round trip to salt-api.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for a single salt-api origin.
pub struct SaltApi {
    client: reqwest::Client,
    origin: Url,
    token: String,
}

impl SaltApi {
    /// Build a client that carries `session`'s token on every request,
    /// both as the auth header and as a cookie bound to the origin.
    pub fn new(session: &Session) -> Result<Self, ClientError> {
        let jar = reqwest::cookie::Jar::default();
        if !session.token().is_empty() {
            jar.add_cookie_str(&session.cookie(), session.origin());
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if !session.token().is_empty() {
            let value = HeaderValue::from_str(session.token()).map_err(|_| {
                ClientError::InvalidRequest("session token is not a valid header value".into())
            })?;
            headers.insert(HeaderName::from_static(AUTH_HEADER), value);
        }

        let client = reqwest::Client::builder()
            .cookie_provider(std::sync::Arc::new(jar))
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            origin: session.origin().clone(),
            token: session.token().to_string(),
        })
    }

    /// Build a client without credentials, for `POST /login`.
    pub fn anonymous(origin: &Url) -> Result<Self, ClientError> {
        Self::new(&Session::absent(origin.clone()))
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Whether this client sends a session token at all.
    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    /// Exchange credentials for a session token.
    ///
    /// Sends `POST /login`. A 401 reply is [`ClientError::AuthFailure`];
    /// a reply without any grant is a decode error.
    pub async fn login(&self, request: &LoginRequest<'_>) -> Result<LoginGrant, ClientError> {
        let response = self
            .client
            .post(self.endpoint("login"))
            .json(request)
            .send()
            .await?;

        let envelope: ReturnEnvelope<LoginGrant> = Self::parse_response(response, "login")
            .await
            .map_err(|e| match e {
                ClientError::NeedsAuth => ClientError::AuthFailure,
                other => other,
            })?;

        envelope
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Decode("login reply contains no token".into()))
    }

    /// Submit a batch of lowstate requests as one JSON array.
    ///
    /// Sends `POST /`. Returns one entry per request, in submission order.
    /// A 401 reply is [`ClientError::NeedsAuth`] and is not retried here.
    pub async fn submit(
        &self,
        requests: &[WorkRequest],
    ) -> Result<Vec<DispatchEntry>, ClientError> {
        let response = self
            .client
            .post(self.endpoint(""))
            .json(requests)
            .send()
            .await?;

        let envelope: ReturnEnvelope<DispatchEntry> =
            Self::parse_response(response, "dispatch").await?;
        Ok(envelope.entries)
    }

    /// Look up the results reported so far for a background job.
    ///
    /// Sends `GET /jobs/{jid}`. Returns `Ok(None)` while no target has
    /// reported, otherwise every reported target merged into one batch.
    pub async fn job_results(&self, jid: &JobId) -> Result<Option<ResultRecord>, ClientError> {
        let response = self
            .client
            .get(self.endpoint(&format!("jobs/{jid}")))
            .send()
            .await?;

        let envelope: ReturnEnvelope<ResultRecord> =
            Self::parse_response(response, "job lookup").await?;
        merge_job_results(envelope.entries).map_err(ClientError::Decode)
    }

    // ---- private helpers ----

    /// `<origin>/<path>`, tolerating a trailing slash on the origin.
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.origin.as_str().trim_end_matches('/'), path)
    }

    /// Map 401 to [`ClientError::NeedsAuth`] and any other non-2xx status
    /// to [`ClientError::Api`] with the body text attached.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::NeedsAuth);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON body, reporting shape mismatches as
    /// [`ClientError::Decode`] rather than transport failures.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, ClientError> {
        let response = Self::ensure_success(response).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| ClientError::Decode(format!("{what} reply: {e}")))
    }
}
