//! Authenticated session capability shared by every journey.
//!
//! A VU signs in once with the configured account and keeps
//! `data.access_token` on its client; following calls carry it as a bearer
//! token. A 401 the call did not expect drops the cached token so the next
//! `ensure_signed_in` logs in again.

use anyhow::{anyhow, Context};
use loadbeat_core::client::ExpectedStatuses;
use loadbeat_core::{HarnessConfig, HttpExchange, RandomSource, RequestSpec, VuContext};
use tracing::{debug, warn};

use crate::api::{paths, Envelope, LoginRequest, TokenData};

/// Login identity
#[derive(Debug, Clone)]
pub struct Credentials {
    pub identifier: String,
    pub password: String,
}

impl Credentials {
    /// The account named by `credentials.email` / `credentials.password`
    pub fn configured(config: &HarnessConfig) -> anyhow::Result<Self> {
        let identifier = config
            .credentials
            .email
            .clone()
            .filter(|e| !e.is_empty())
            .context("No test account configured (set EMAIL)")?;
        let password = config
            .credentials
            .password
            .as_ref()
            .map(|p| p.expose_secret().clone())
            .unwrap_or_default();
        Ok(Self { identifier, password })
    }

    /// An account that does not exist
    pub fn invalid(rng: &mut RandomSource) -> Self {
        let identifier = rng.email("invalid_user");
        let password = rng.string(30, None).unwrap_or_else(|_| "x".repeat(30));
        Self { identifier, password }
    }

    pub fn request(&self) -> LoginRequest {
        LoginRequest::email(&self.identifier, &self.password)
    }
}

/// Token under `data.access_token`, if the body carries a non-empty one
pub fn access_token(exchange: &HttpExchange) -> Option<String> {
    exchange
        .decode::<Envelope<TokenData>>()
        .ok()
        .map(|e| e.data.access_token)
        .filter(|t| !t.is_empty())
}

/// Statuses accepted as a successful login
pub fn login_statuses(config: &HarnessConfig) -> ExpectedStatuses {
    ExpectedStatuses::codes(&config.scenario.login_statuses)
}

/// POST the login form without touching the session
pub async fn attempt_login(ctx: &VuContext, creds: &Credentials, expected: ExpectedStatuses) -> HttpExchange {
    let body = serde_json::to_value(creds.request()).unwrap_or_default();
    ctx.send(RequestSpec::post(paths::LOGIN).json(body).expect(expected).anonymous().tag("login"))
        .await
}

/// Log in with the configured account and store the token on the client
pub async fn sign_in(ctx: &mut VuContext) -> anyhow::Result<String> {
    let creds = Credentials::configured(ctx.config())?;
    let expected = login_statuses(ctx.config());
    let res = attempt_login(ctx, &creds, expected.clone()).await;

    let token = access_token(&res);
    let ok = ctx
        .check(&res)
        .that("login: status accepted", |r| r.status.is_some_and(|s| expected.contains(s)))
        .that("login: has access token", |_| token.is_some())
        .passed();

    match token {
        Some(token) if ok => {
            debug!(vu = ctx.id, "Signed in");
            ctx.client.set_token(token.clone());
            Ok(token)
        }
        _ => Err(anyhow!("Login failed with status {:?}", res.status)),
    }
}

/// Cached token, or a fresh login
pub async fn ensure_signed_in(ctx: &mut VuContext) -> anyhow::Result<String> {
    if let Some(token) = ctx.client.token() {
        return Ok(token.to_string());
    }
    sign_in(ctx).await
}

/// Send with the session token and forget it when the call is rejected
/// with an unexpected 401
pub async fn send(ctx: &mut VuContext, spec: RequestSpec) -> HttpExchange {
    let res = ctx.send(spec).await;
    if res.status_is(401) && !res.expected && ctx.client.token().is_some() {
        warn!(vu = ctx.id, tag = %res.tag, "Session token rejected, signing in again next time");
        ctx.client.clear_token();
    }
    res
}
