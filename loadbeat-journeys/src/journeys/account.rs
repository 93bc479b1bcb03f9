//! Authentication flows: login, signup, identifier lookup, token refresh,
//! global logout and the account maintenance endpoints.

use async_trait::async_trait;
use loadbeat_core::client::ExpectedStatuses;
use loadbeat_core::{Journey, RequestSpec, SetupData, Threshold, VuContext};
use serde_json::json;
use tracing::{debug, info};

use crate::api::{
    paths, ChangePassword, Envelope, IdentifierData, IdentifierQuery, MessageOnly, SignupComplete, SignupStart,
    SignupStartData, SignupVerify, SiteKeyData, UsernameUpdate,
};
use crate::auth::{self, Credentials};

/// Placeholder captcha accepted by test deployments
const TEST_CAPTCHA_TOKEN: &str = "loadbeat-test-captcha";
const USERNAME_CHARSET: &str = "abcdefghijklmnopqrstuvwxyz0123456789_";

/// Valid login followed by a login with a random unknown account
pub struct Login;

#[async_trait]
impl Journey for Login {
    type Shared = ();

    fn name(&self) -> &'static str {
        "login"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_failed", "rate<0.01"),
            ("http_req_duration", "p(95)<500"),
            ("checks", "rate>0.95"),
        ])
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> anyhow::Result<()> {
        let creds = Credentials::configured(ctx.config())?;
        let expected = auth::login_statuses(ctx.config());
        let valid = auth::attempt_login(ctx, &creds, expected.clone()).await;
        let token = auth::access_token(&valid);
        ctx.check(&valid)
            .that("valid user: status accepted", |r| r.status.is_some_and(|s| expected.contains(s)))
            .that("valid user: has access token", |_| token.is_some());

        ctx.think(1.0, 2.0).await;

        let invalid = Credentials::invalid(&mut ctx.rng);
        let rejected = auth::attempt_login(ctx, &invalid, ExpectedStatuses::codes(&[400, 401, 404])).await;
        ctx.check(&rejected)
            .that("invalid user: rejected", |r| r.status_in(&[400, 401, 404]))
            .that("invalid user: no token", |r| auth::access_token(r).is_none());

        ctx.think(1.0, 2.0).await;
        Ok(())
    }
}

/// Three-step registration, login with the new account and password change
pub struct Signup;

#[async_trait]
impl Journey for Signup {
    type Shared = ();

    fn name(&self) -> &'static str {
        "signup"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_failed", "rate<0.01"),
            ("http_req_duration", "p(95)<500"),
            ("checks", "rate>0.95"),
        ])
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> anyhow::Result<()> {
        let suffix = ctx.rng.string(7, None)?;
        let start = SignupStart {
            name: format!("Test User {suffix}"),
            birth_date: "1990-01-15".to_string(),
            email: ctx.rng.email("signup_test"),
            captcha_token: TEST_CAPTCHA_TOKEN.to_string(),
        };
        let step1 = ctx
            .send(
                RequestSpec::post(paths::SIGNUP_STEP1)
                    .json(serde_json::to_value(&start)?)
                    .expect_codes(&[200, 201, 409])
                    .anonymous()
                    .tag("signup step1"),
            )
            .await;
        ctx.check(&step1)
            .that("step1: status 200/201/409", |r| r.status_in(&[200, 201, 409]))
            .that("step1: email sent", |r| {
                r.status_is(409)
                    || r.decode::<Envelope<SignupStartData>>()
                        .is_ok_and(|e| e.data.is_email_sent)
            });

        if step1.status_is(409) {
            debug!(vu = ctx.id, email = %start.email, "Email already registered");
            return Ok(());
        }
        if !step1.status_in(&[200, 201]) {
            return Ok(());
        }
        ctx.metrics().add_counter("signup_email_sent", 1);
        ctx.think(1.0, 2.0).await;

        let verify = SignupVerify {
            email: start.email.clone(),
            token: ctx.rng.otp(),
        };
        let step2 = ctx
            .send(
                RequestSpec::post(paths::SIGNUP_STEP2)
                    .json(serde_json::to_value(&verify)?)
                    .expect_codes(&[201, 400, 404])
                    .anonymous()
                    .tag("signup step2"),
            )
            .await;
        if !ctx.check(&step2).that("step2: status 201", |r| r.status_is(201)).passed() {
            debug!(vu = ctx.id, status = ?step2.status, "OTP not accepted");
            return Ok(());
        }
        ctx.think(1.0, 2.0).await;

        let password = ctx.rng.strong_password(12);
        let complete = SignupComplete {
            email: start.email.clone(),
            password: password.clone(),
            username: format!("user_{}", ctx.rng.string(10, Some(USERNAME_CHARSET))?),
            language: "en".to_string(),
        };
        let step3 = ctx
            .send(
                RequestSpec::post(paths::SIGNUP_STEP3)
                    .json(serde_json::to_value(&complete)?)
                    .expect_codes(&[200, 201, 409])
                    .anonymous()
                    .tag("signup step3"),
            )
            .await;
        if !ctx
            .check(&step3)
            .that("step3: status 200/201", |r| r.status_in(&[200, 201]))
            .passed()
        {
            return Ok(());
        }
        info!(vu = ctx.id, username = %complete.username, "Account created");
        ctx.think(1.0, 2.0).await;

        let creds = Credentials {
            identifier: start.email,
            password: password.clone(),
        };
        let login = auth::attempt_login(ctx, &creds, ExpectedStatuses::codes(&[200, 201, 401])).await;
        let token = auth::access_token(&login);
        ctx.check(&login)
            .that("login: status 200/201", |r| r.status_in(&[200, 201]))
            .that("login: has access token", |_| token.is_some());
        let Some(token) = token else {
            return Ok(());
        };
        ctx.think(1.0, 2.0).await;

        let change = ChangePassword {
            old_password: password.clone(),
            new_password: format!("{password}1"),
        };
        let changed = ctx
            .send(
                RequestSpec::post(paths::CHANGE_PASSWORD)
                    .json(serde_json::to_value(&change)?)
                    .bearer(token)
                    .expect_codes(&[200, 201, 401])
                    .tag("change password"),
            )
            .await;
        ctx.check(&changed)
            .that("change: status 200/201", |r| r.status_in(&[200, 201]))
            .that("change: success message", |r| {
                r.decode::<MessageOnly>().is_ok_and(|m| m.lowered().contains("success"))
            });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum IdentifierKind {
    Email,
    Phone,
    Username,
}

impl IdentifierKind {
    fn label(self) -> &'static str {
        match self {
            Self::Email => "random email",
            Self::Phone => "random phone",
            Self::Username => "random username",
        }
    }
}

/// Identifier availability for the configured account and for random
/// unknown emails, phones and usernames (70/20/10)
pub struct CheckIdentifier;

#[async_trait]
impl Journey for CheckIdentifier {
    type Shared = ();

    fn name(&self) -> &'static str {
        "check-identifier"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_failed", "rate<0.01"),
            ("http_req_duration", "p(95)<300"),
            ("http_req_duration", "p(90)<200"),
            ("checks", "rate>0.99"),
        ])
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> anyhow::Result<()> {
        match ctx.config().credentials.email.clone().filter(|e| !e.is_empty()) {
            Some(email) => {
                let res = ctx
                    .send(
                        RequestSpec::post(paths::CHECK_IDENTIFIER)
                            .json(serde_json::to_value(IdentifierQuery { identifier: email })?)
                            .expect_codes(&[200, 201])
                            .anonymous()
                            .tag("check identifier existing"),
                    )
                    .await;
                let data = res.decode::<Envelope<IdentifierData>>().ok();
                ctx.check(&res)
                    .that("existing email: status 200/201", |r| r.status_in(&[200, 201]))
                    .that("existing email: identifier type is email", |_| {
                        data.as_ref().is_some_and(|d| d.data.identifier_type == "email")
                    })
                    .that("existing email: has user id", |_| {
                        data.as_ref().is_some_and(|d| !d.data.user_id.is_empty())
                    })
                    .that("existing email: message says available", |r| {
                        r.decode::<MessageOnly>().is_ok_and(|m| m.lowered().contains("available"))
                    });
            }
            None => debug!(vu = ctx.id, "No account configured, skipping existing identifier"),
        }

        ctx.think(0.5, 1.0).await;

        let kinds = [IdentifierKind::Email, IdentifierKind::Phone, IdentifierKind::Username];
        let kind = *ctx.rng.weighted_pick(&kinds, &[0.7, 0.2, 0.1])?;
        let identifier = match kind {
            IdentifierKind::Email => ctx.rng.email("nonexistent"),
            IdentifierKind::Phone => ctx.rng.phone(),
            IdentifierKind::Username => ctx.rng.string(12, Some(USERNAME_CHARSET))?,
        };
        let res = ctx
            .send(
                RequestSpec::post(paths::CHECK_IDENTIFIER)
                    .json(serde_json::to_value(IdentifierQuery { identifier })?)
                    .expect_codes(&[404])
                    .anonymous()
                    .tag(format!("check identifier {}", kind.label())),
            )
            .await;
        let label = kind.label();
        ctx.check(&res)
            .that(&format!("{label}: status 404"), |r| r.status_is(404))
            .that(&format!("{label}: message says not found"), |r| {
                r.decode::<MessageOnly>().is_ok_and(|m| m.lowered().contains("not found"))
            });

        ctx.think(0.5, 1.0).await;
        Ok(())
    }
}

/// Login then cookie-based token refresh. Only 5xx responses count as
/// failed requests.
pub struct Refresh;

#[async_trait]
impl Journey for Refresh {
    type Shared = ();

    fn name(&self) -> &'static str {
        "refresh"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_failed", "rate<0.01"),
            ("http_req_duration", "p(90)<600"),
            ("http_req_duration", "p(95)<900"),
            ("checks", "rate>0.95"),
        ])
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> anyhow::Result<()> {
        let below_500 = ExpectedStatuses::range(200, 499);
        let creds = Credentials::configured(ctx.config())?;
        let login = auth::attempt_login(ctx, &creds, below_500.clone()).await;
        let accepted = auth::login_statuses(ctx.config());

        let old_token = match auth::access_token(&login) {
            Some(token) if login.status.is_some_and(|s| accepted.contains(s)) => token,
            _ => {
                ctx.metrics().add_counter("refresh_unexpected", 1);
                debug!(vu = ctx.id, status = ?login.status, "Login not accepted, skipping refresh");
                return Ok(());
            }
        };
        ctx.think(1.0, 2.0).await;

        let refreshed = ctx
            .send(
                RequestSpec::post(paths::REFRESH)
                    .expect(below_500)
                    .anonymous()
                    .tag("refresh"),
            )
            .await;
        let new_token = auth::access_token(&refreshed);
        let ok = ctx
            .check(&refreshed)
            .that("refresh: status 200/201", |r| r.status_in(&[200, 201]))
            .that("refresh: returns access token", |_| new_token.is_some())
            .passed();

        if ok {
            ctx.metrics().add_counter("refresh_success", 1);
            if new_token.as_deref() != Some(old_token.as_str()) {
                debug!(vu = ctx.id, "Refresh rotated the access token");
            }
        } else {
            ctx.metrics().add_counter("refresh_unexpected", 1);
        }

        ctx.think(1.0, 2.0).await;
        Ok(())
    }
}

/// Fresh login then revocation of every session of the account
pub struct LogoutAll;

#[async_trait]
impl Journey for LogoutAll {
    type Shared = ();

    fn name(&self) -> &'static str {
        "logout-all"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_duration", "p(95)<500"),
            ("checks", "rate>0.95"),
            ("http_req_failed", "rate<0.01"),
        ])
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> anyhow::Result<()> {
        auth::sign_in(ctx).await?;
        ctx.think(1.0, 2.0).await;

        let res = ctx
            .send(
                RequestSpec::post(paths::LOGOUT_ALL)
                    .json(json!({}))
                    .expect_codes(&[201])
                    .tag("logout all"),
            )
            .await;
        ctx.check(&res).that("logout: status 201", |r| r.status_is(201));
        ctx.client.clear_token();

        ctx.think(1.0, 2.0).await;
        Ok(())
    }
}

/// Anonymous fetch of the captcha site key used by the signup form
pub struct CaptchaSiteKey;

#[async_trait]
impl Journey for CaptchaSiteKey {
    type Shared = ();

    fn name(&self) -> &'static str {
        "captcha-site-key"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_failed", "rate<0.05"),
            ("http_req_duration", "p(95)<1500"),
            ("checks", "rate>0.95"),
        ])
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> anyhow::Result<()> {
        let res = ctx
            .send(
                RequestSpec::get(paths::CAPTCHA_SITE_KEY)
                    .expect_codes(&[200])
                    .anonymous()
                    .tag("captcha site key"),
            )
            .await;
        let ok = ctx
            .check(&res)
            .that("captcha site key: status 200", |r| r.status_is(200))
            .that("captcha site key: has siteKey", |r| {
                r.decode::<Envelope<SiteKeyData>>().is_ok_and(|e| !e.data.site_key.is_empty())
            })
            .that("captcha site key: has success message", |r| {
                r.decode::<MessageOnly>().is_ok_and(|m| m.lowered().contains("successfully"))
            })
            .that("captcha site key: count is 1", |r| {
                r.json().is_ok_and(|body| body["count"] == 1)
            })
            .passed();
        let counter = if ok { "captcha_site_key_success" } else { "captcha_site_key_failed" };
        ctx.metrics().add_counter(counter, 1);

        ctx.think(1.0, 2.0).await;
        Ok(())
    }
}

/// Password reset for an account that does not exist
pub struct ForgetPassword;

#[async_trait]
impl Journey for ForgetPassword {
    type Shared = ();

    fn name(&self) -> &'static str {
        "forget-password"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_failed", "rate<0.01"),
            ("http_req_duration", "p(95)<500"),
            ("checks", "rate>0.95"),
        ])
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> anyhow::Result<()> {
        let identifier = format!("nonexistentuser_{}@test.com", ctx.rng.string(6, None)?);
        let res = ctx
            .send(
                RequestSpec::post(paths::FORGET_PASSWORD)
                    .json(serde_json::to_value(IdentifierQuery { identifier })?)
                    .expect_codes(&[400, 404])
                    .anonymous()
                    .tag("forget password unknown"),
            )
            .await;
        ctx.check(&res)
            .that("invalid forget-password: status is 400 or 404", |r| r.status_in(&[400, 404]));
        Ok(())
    }
}

/// Rename the account, then try an invalid token and a malformed name
pub struct UpdateUsername;

#[async_trait]
impl Journey for UpdateUsername {
    type Shared = ();

    fn name(&self) -> &'static str {
        "update-username"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_failed", "rate<0.05"),
            ("http_req_duration", "p(95)<1500"),
            ("checks", "rate>0.95"),
        ])
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> anyhow::Result<()> {
        auth::ensure_signed_in(ctx).await?;
        ctx.think(0.5, 1.0).await;

        let username = format!("user_{}", ctx.rng.string(8, Some(USERNAME_CHARSET))?);
        let renamed = auth::send(
            ctx,
            RequestSpec::post(paths::UPDATE_USERNAME)
                .json(serde_json::to_value(UsernameUpdate { username: username.clone() })?)
                .expect_codes(&[200, 201])
                .tag("update username"),
        )
        .await;
        ctx.check(&renamed)
            .that("valid: status 200 or 201", |r| r.status_in(&[200, 201]))
            .that("valid: username matches", |r| {
                r.decode::<Envelope<UsernameUpdate>>().is_ok_and(|e| e.data.username == username)
            });
        ctx.think(1.0, 2.0).await;

        let other = format!("user_{}", ctx.rng.string(8, Some(USERNAME_CHARSET))?);
        let rejected = ctx
            .send(
                RequestSpec::post(paths::UPDATE_USERNAME)
                    .json(serde_json::to_value(UsernameUpdate { username: other })?)
                    .bearer("invalid_token_xyz")
                    .expect_codes(&[401])
                    .tag("update username invalid token"),
            )
            .await;
        ctx.check(&rejected)
            .that("invalid token: status 401", |r| r.status_is(401))
            .that("invalid token: has error", |r| {
                r.decode::<MessageOnly>().is_ok_and(|m| {
                    let text = m.lowered();
                    text.contains("invalid") || text.contains("expired")
                })
            });
        ctx.think(1.0, 2.0).await;

        let malformed = auth::send(
            ctx,
            RequestSpec::post(paths::UPDATE_USERNAME)
                .json(serde_json::to_value(UsernameUpdate { username: "ab".to_string() })?)
                .expect_codes(&[400, 404, 422])
                .tag("update username malformed"),
        )
        .await;
        ctx.check(&malformed)
            .that("invalid: status 400 or 422", |r| r.status_in(&[400, 422]))
            .that("invalid: has error", |r| {
                r.decode::<MessageOnly>().is_ok_and(|m| !m.lowered().is_empty())
            });

        ctx.think(1.0, 2.0).await;
        Ok(())
    }
}
