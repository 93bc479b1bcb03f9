//! Read-side user endpoints: lookups by id and username, per-user listings
//! and the current user's relation lists. Plus interest assignment.

use anyhow::Context;
use async_trait::async_trait;
use loadbeat_core::{HttpExchange, Journey, RequestSpec, SetupData, Threshold, VuContext};
use tracing::debug;

use super::social::{shared_sign_in, target_user, SessionToken};
use crate::api::{
    paths, AssignInterests as InterestsBody, Envelope, Listing, LookupRecord, MessageOnly, Recommendations,
    RelationsCount, UserData,
};

const LOOKUP_MISS: [u16; 3] = [200, 400, 404];

fn records(exchange: &HttpExchange) -> Option<Vec<LookupRecord>> {
    exchange.decode::<Envelope<Vec<LookupRecord>>>().ok().map(|e| e.data)
}

/// Anonymous batch lookups by username and id, a miss for each, and a
/// single-user read of `targets.user_id`
pub struct UserLookup;

impl UserLookup {
    async fn lookup_hit(ctx: &mut VuContext, url: String, label: &str) {
        let res = ctx
            .send(RequestSpec::get(url).anonymous().expect_codes(&[200]).tag(label.to_string()))
            .await;
        let found = records(&res);
        ctx.check(&res)
            .that(&format!("{label}: status is 200"), |r| r.status_is(200))
            .that(&format!("{label}: contains data array"), |_| found.is_some())
            .that(&format!("{label}: at least one success"), |_| {
                found.as_ref().is_some_and(|list| list.iter().any(|rec| rec.success))
            });
    }

    async fn lookup_miss(ctx: &mut VuContext, url: String, label: &str) {
        let res = ctx
            .send(RequestSpec::get(url).anonymous().expect_codes(&LOOKUP_MISS).tag(label.to_string()))
            .await;
        let found = records(&res);
        ctx.check(&res)
            .that(&format!("{label}: status 200, 400, or 404"), |r| r.status_in(&LOOKUP_MISS))
            .that(&format!("{label}: all records failed"), |r| {
                !r.status_is(200) || found.as_ref().is_some_and(|list| list.iter().all(|rec| !rec.success))
            });
    }
}

#[async_trait]
impl Journey for UserLookup {
    type Shared = ();

    fn name(&self) -> &'static str {
        "user-lookup"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_failed", "rate<0.05"),
            ("http_req_duration", "p(95)<1000"),
            ("checks", "rate>0.95"),
        ])
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> anyhow::Result<()> {
        if let Some(username) = ctx.config().targets.username.clone().filter(|name| !name.is_empty()) {
            let url = format!("{}?usernames={username}", paths::USERS_BY_USERNAME);
            Self::lookup_hit(ctx, url, "valid usernames").await;
            ctx.think(1.0, 2.0).await;
        }

        let unknown_names = [ctx.rng.string(12, None)?, ctx.rng.string(12, None)?].join(",");
        let url = format!("{}?usernames={unknown_names}", paths::USERS_BY_USERNAME);
        Self::lookup_miss(ctx, url, "invalid usernames").await;
        ctx.think(1.0, 2.0).await;

        let unknown_ids = [ctx.rng.string(16, None)?, ctx.rng.string(16, None)?].join(",");
        Self::lookup_miss(ctx, format!("{}?ids={unknown_ids}", paths::USERS), "invalid users").await;
        ctx.think(1.0, 2.0).await;

        let Some(target) = target_user(ctx) else {
            debug!(vu = ctx.id, "No target user configured, skipping lookups by id");
            return Ok(());
        };
        Self::lookup_hit(ctx, format!("{}?ids={target}", paths::USERS), "valid users").await;
        ctx.think(1.0, 2.0).await;

        let res = ctx
            .send(
                RequestSpec::get(paths::user(&target))
                    .anonymous()
                    .expect_codes(&[200])
                    .tag("get user by id"),
            )
            .await;
        let user = res.decode::<Envelope<UserData>>().ok();
        ctx.check(&res)
            .that("user by id: status is 200", |r| r.status_is(200))
            .that("user by id: contains user data", |_| {
                user.as_ref().is_some_and(|u| u.data.user_id == target)
            })
            .that("user by id: success message", |_| {
                user.as_ref()
                    .and_then(|u| u.message.as_deref())
                    .is_some_and(|m| m == "User retrieved successfully")
            });

        ctx.think(1.0, 2.0).await;
        Ok(())
    }
}

/// Every listing keyed on a user: the current user's relation counts,
/// blocked, muted, liked posts and username suggestions, then followers,
/// following, posts and replies of the target (or the current user).
pub struct UserLists;

impl UserLists {
    /// GET a `{"data": {"data": [...]}}` listing
    async fn list(ctx: &mut VuContext, token: &str, url: String, label: &str) {
        let res = ctx
            .send(RequestSpec::get(url).bearer(token).expect_codes(&[200]).tag(label.to_string()))
            .await;
        let has_items = res.decode::<Envelope<Listing>>().is_ok();
        ctx.check(&res)
            .that(&format!("{label}: status 200"), |r| r.status_is(200))
            .that(&format!("{label}: contains data array"), |_| has_items);
    }
}

#[async_trait]
impl Journey for UserLists {
    type Shared = SessionToken;

    fn name(&self) -> &'static str {
        "user-lists"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_failed", "rate<0.05"),
            ("http_req_duration", "p(95)<1000"),
            ("checks", "rate>0.95"),
        ])
    }

    async fn setup(&self, ctx: &mut VuContext) -> anyhow::Result<SessionToken> {
        shared_sign_in(ctx).await
    }

    async fn iteration(&self, ctx: &mut VuContext, shared: &SetupData<SessionToken>) -> anyhow::Result<()> {
        let token = shared.get()?.0.clone();

        let counts = ctx
            .send(
                RequestSpec::get(paths::RELATIONS_COUNT)
                    .bearer(&token)
                    .expect_codes(&[200])
                    .tag("relations count"),
            )
            .await;
        let parsed = counts.decode::<Envelope<RelationsCount>>().ok();
        ctx.check(&counts)
            .that("relations count: status 200", |r| r.status_is(200))
            .that("relations count: has data", |_| parsed.is_some());
        ctx.think(0.5, 1.0).await;

        Self::list(ctx, &token, paths::BLOCKED.to_string(), "blocked").await;
        Self::list(ctx, &token, paths::MUTED.to_string(), "muted").await;
        Self::list(ctx, &token, paths::LIKED_POSTS.to_string(), "liked posts").await;
        ctx.think(0.5, 1.0).await;

        let suggested = ctx
            .send(
                RequestSpec::get(paths::USERNAME_RECOMMENDATIONS)
                    .bearer(&token)
                    .expect_codes(&[200])
                    .tag("username recommendations"),
            )
            .await;
        let parsed = suggested.decode::<Envelope<Recommendations>>().ok();
        ctx.check(&suggested)
            .that("username recommendations: status 200", |r| r.status_is(200))
            .that("username recommendations: has data", |_| parsed.is_some());
        ctx.think(0.5, 1.0).await;

        let subject = match target_user(ctx) {
            Some(target) => target,
            None => {
                let me = ctx
                    .send(RequestSpec::get(paths::ME).bearer(&token).expect_codes(&[200]).tag("get current user"))
                    .await;
                me.decode::<Envelope<UserData>>()
                    .context("Current user response has no data.user_id")?
                    .data
                    .user_id
            }
        };
        for listing in ["followers", "following", "posts", "replies"] {
            Self::list(ctx, &token, paths::user_action(&subject, listing), listing).await;
        }
        let page_size = ctx.rng.int(5, 20)?;
        let paged = format!("{}?page_offset=1&page_size={page_size}", paths::user_action(&subject, "following"));
        Self::list(ctx, &token, paged, "following paged").await;

        ctx.think(1.0, 2.0).await;
        Ok(())
    }
}

/// Assign a fixed set of interest categories to the setup account
pub struct AssignInterests;

#[async_trait]
impl Journey for AssignInterests {
    type Shared = SessionToken;

    fn name(&self) -> &'static str {
        "assign-interests"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_failed", "rate<0.05"),
            ("http_req_duration", "p(95)<1000"),
            ("checks", "rate>0.95"),
        ])
    }

    async fn setup(&self, ctx: &mut VuContext) -> anyhow::Result<SessionToken> {
        shared_sign_in(ctx).await
    }

    async fn iteration(&self, ctx: &mut VuContext, shared: &SetupData<SessionToken>) -> anyhow::Result<()> {
        let token = shared.get()?.0.clone();
        let body = InterestsBody {
            category_ids: vec![1, 2, 3],
        };
        let res = ctx
            .send(
                RequestSpec::post(paths::INTERESTS)
                    .bearer(token)
                    .json(serde_json::to_value(&body)?)
                    .expect_codes(&[201])
                    .tag("assign interests"),
            )
            .await;
        ctx.check(&res)
            .that("assign interests: status 201", |r| r.status_is(201))
            .that("assign interests: success message", |r| {
                r.decode::<MessageOnly>()
                    .is_ok_and(|m| m.lowered().contains("interests assigned"))
            });

        ctx.think(1.0, 2.0).await;
        Ok(())
    }
}
