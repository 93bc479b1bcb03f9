use async_trait::async_trait;
use loadbeat_core::{Journey, RequestSpec, SetupData, Threshold, VuContext};
use tracing::{debug, warn};

use crate::api::{paths, Envelope, TimelinePage};
use crate::auth;

/// Largest page size the API accepts
const MAX_PAGE: i64 = 100;

/// Both timelines with default, custom and cursor pagination, plus an
/// oversized page (400) and an invalid token (401)
pub struct Timeline;

impl Timeline {
    async fn browse(ctx: &mut VuContext, feed: &str, label: &str) -> anyhow::Result<()> {
        let first = auth::send(ctx, RequestSpec::get(feed).expect_codes(&[200]).tag(format!("{label} default"))).await;
        ctx.check(&first).that(&format!("{label} default: status 200"), |r| r.status_is(200));
        ctx.think(0.5, 1.5).await;

        let limit = ctx.rng.int(5, 20)?;
        let custom = auth::send(
            ctx,
            RequestSpec::get(format!("{feed}?limit={limit}"))
                .expect_codes(&[200])
                .tag(format!("{label} custom limit")),
        )
        .await;
        ctx.check(&custom).that(&format!("{label} custom limit: status 200"), |r| r.status_is(200));

        let cursor = first
            .decode::<Envelope<TimelinePage>>()
            .ok()
            .and_then(|page| page.data.pagination.next_cursor);
        if let Some(cursor) = cursor {
            ctx.think(2.0, 3.0).await;
            let next = auth::send(
                ctx,
                RequestSpec::get(format!("{feed}?cursor={cursor}&limit=10"))
                    .expect_codes(&[200])
                    .tag(format!("{label} cursor")),
            )
            .await;
            ctx.check(&next).that(&format!("{label} cursor: status 200"), |r| r.status_is(200));
        }
        Ok(())
    }
}

#[async_trait]
impl Journey for Timeline {
    type Shared = ();

    fn name(&self) -> &'static str {
        "timeline"
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
        ctx.think(1.0, 2.0).await;

        Self::browse(ctx, paths::FOR_YOU, "for-you").await?;
        ctx.think(1.0, 2.0).await;
        Self::browse(ctx, paths::FOLLOWING, "following").await?;
        ctx.think(0.5, 1.5).await;

        let oversized = auth::send(
            ctx,
            RequestSpec::get(format!("{}?limit={}", paths::FOR_YOU, MAX_PAGE + 50))
                .expect_codes(&[400])
                .tag("timeline oversized limit"),
        )
        .await;
        ctx.check(&oversized).that("invalid limit: status 400", |r| r.status_is(400));
        ctx.think(0.5, 1.5).await;

        let rejected = ctx
            .send(
                RequestSpec::get(paths::FOR_YOU)
                    .bearer("invalid")
                    .expect_codes(&[401])
                    .tag("timeline invalid token"),
            )
            .await;
        ctx.check(&rejected).that("invalid token: status 401", |r| r.status_is(401));

        ctx.think(0.5, 1.5).await;
        Ok(())
    }
}

/// Login, one following-timeline read, logout. Every iteration pays for a
/// fresh session and counts responses that are not JSON.
pub struct FollowingFeed;

#[async_trait]
impl Journey for FollowingFeed {
    type Shared = ();

    fn name(&self) -> &'static str {
        "following-bottleneck"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[("http_req_failed", "rate<0.05"), ("http_req_duration", "p(95)<1000")])
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> anyhow::Result<()> {
        let token = auth::sign_in(ctx).await?;
        ctx.think(0.5, 0.5).await;

        let res = auth::send(
            ctx,
            RequestSpec::get(paths::FOLLOWING)
                .expect_codes(&[200])
                .timeout(std::time::Duration::from_secs(30))
                .tag("following bottleneck"),
        )
        .await;
        match res.status {
            Some(200) => match res.json() {
                Ok(_) => ctx.metrics().add_counter("following_200", 1),
                Err(_) => {
                    let preview: String = res.body_text().unwrap_or_default().chars().take(400).collect();
                    warn!(vu = ctx.id, content_type = ?res.header("content-type"), %preview, "Following timeline is not JSON");
                    ctx.metrics().add_counter("following_returns_html", 1);
                }
            },
            status => {
                debug!(vu = ctx.id, ?status, "Following timeline did not answer 200");
                ctx.metrics().add_counter("following_other", 1);
            }
        }

        ctx.send(
            RequestSpec::post(paths::LOGOUT)
                .bearer(token)
                .expect_codes(&[200, 201, 204])
                .tag("logout"),
        )
        .await;
        ctx.client.clear_token();

        ctx.think(2.0, 6.0).await;
        Ok(())
    }
}
