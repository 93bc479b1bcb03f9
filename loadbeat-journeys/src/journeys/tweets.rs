//! Tweet journeys: full create/read/delete lifecycle, the interaction
//! sweep over a freshly created tweet, and generated summaries.

use anyhow::Context;
use async_trait::async_trait;
use loadbeat_core::{HttpExchange, Journey, RequestSpec, SetupData, Threshold, VuContext};
use tracing::debug;

use crate::api::{paths, Envelope, NewTweet, SummaryData, TweetData, UNKNOWN_TWEET_ID};
use crate::auth;

const IMAGES: [&str; 2] = [
    "https://pbs.twimg.com/media/Ga8p2v8XAAAcovered.jpg",
    "https://images.unsplash.com/photo-1682695797221-8164ff1fafc9?w=800",
];
const VIDEO: &str = "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/BigBuckBunny.mp4";

fn tweet_of(exchange: &HttpExchange) -> Option<TweetData> {
    exchange.decode::<Envelope<TweetData>>().ok().map(|e| e.data)
}

/// POST a tweet and return its id when the backend answered 201
async fn create_tweet(ctx: &mut VuContext, tweet: &NewTweet) -> anyhow::Result<Option<String>> {
    let res = auth::send(
        ctx,
        RequestSpec::post(paths::TWEETS)
            .json(serde_json::to_value(tweet)?)
            .expect_codes(&[201])
            .tag("create tweet"),
    )
    .await;
    if !ctx.check(&res).that("create: status 201", |r| r.status_is(201)).passed() {
        return Ok(None);
    }
    let data = tweet_of(&res).context("Create response has no data.tweet_id")?;
    Ok(Some(data.tweet_id))
}

/// Create, read back, probe unknown and unauthorized reads, delete, and
/// confirm the tweet is gone
pub struct TweetLifecycle;

#[async_trait]
impl Journey for TweetLifecycle {
    type Shared = ();

    fn name(&self) -> &'static str {
        "tweet-lifecycle"
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

        let content = format!("This is a test tweet {}", ctx.rng.string(8, None)?);
        let Some(tweet_id) = create_tweet(ctx, &NewTweet::text(content.clone())).await? else {
            return Ok(());
        };
        ctx.metrics().add_counter("tweets_created", 1);
        ctx.think(1.0, 2.0).await;

        let url = paths::tweet(&tweet_id);
        let fetched = auth::send(ctx, RequestSpec::get(&url).expect_codes(&[200]).tag("get tweet")).await;
        let data = tweet_of(&fetched);
        ctx.check(&fetched)
            .that("get: status 200", |r| r.status_is(200))
            .that("get: content matches", |_| {
                data.as_ref().is_some_and(|d| d.content.as_deref() == Some(content.as_str()))
            })
            .that("get: tweet_id matches", |_| data.as_ref().is_some_and(|d| d.tweet_id == tweet_id));
        ctx.think(1.0, 2.0).await;

        let missing = auth::send(
            ctx,
            RequestSpec::get(paths::tweet(UNKNOWN_TWEET_ID))
                .expect_codes(&[404])
                .tag("get unknown tweet"),
        )
        .await;
        ctx.check(&missing).that("unknown: status 404", |r| r.status_is(404));
        ctx.think(0.5, 1.5).await;

        let unauthorized = ctx
            .send(
                RequestSpec::get(&url)
                    .bearer("invalid")
                    .expect_codes(&[401])
                    .tag("get tweet invalid token"),
            )
            .await;
        ctx.check(&unauthorized).that("invalid token: status 401", |r| r.status_is(401));
        ctx.think(0.5, 1.5).await;

        let deleted = auth::send(ctx, RequestSpec::delete(&url).expect_codes(&[200, 204]).tag("delete tweet")).await;
        ctx.check(&deleted).that("delete: status 200/204", |r| r.status_in(&[200, 204]));

        let gone = auth::send(ctx, RequestSpec::get(&url).expect_codes(&[404]).tag("get deleted tweet")).await;
        ctx.check(&gone).that("deleted: status 404", |r| r.status_is(404));

        ctx.think(0.5, 1.5).await;
        Ok(())
    }
}

/// One tweet with media, then edit, reply, quote, toggled like/repost/
/// bookmark, a view, the listing endpoints, and cleanup
pub struct TweetInteractions;

impl TweetInteractions {
    async fn toggle(ctx: &mut VuContext, tweet_id: &str, action: &str, on: &[u16], undo: &[u16]) {
        let url = paths::tweet_action(tweet_id, action);
        let res = auth::send(ctx, RequestSpec::post(&url).expect_codes(on).tag(action.to_string())).await;
        ctx.check(&res).that(&format!("{action}: accepted"), |r| r.status_in(on));
        ctx.metrics().add_counter(&format!("{action}s"), 1);
        ctx.think(0.3, 0.3).await;

        let res = auth::send(ctx, RequestSpec::delete(&url).expect_codes(undo).tag(format!("un{action}"))).await;
        ctx.check(&res).that(&format!("un{action}: accepted"), |r| r.status_in(undo));
    }
}

#[async_trait]
impl Journey for TweetInteractions {
    type Shared = ();

    fn name(&self) -> &'static str {
        "tweet-interactions"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[("http_req_failed", "rate<0.01"), ("http_req_duration", "p(95)<800")])
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> anyhow::Result<()> {
        auth::ensure_signed_in(ctx).await?;

        let tweet = NewTweet {
            content: format!("loadbeat full flow {} VU{}", chrono::Utc::now().to_rfc3339(), ctx.id),
            images: IMAGES.iter().map(|s| s.to_string()).collect(),
            videos: vec![VIDEO.to_string()],
        };
        let Some(tweet_id) = create_tweet(ctx, &tweet).await? else {
            return Ok(());
        };
        ctx.metrics().add_counter("tweets_created", 1);
        ctx.think(1.0, 3.0).await;

        let listed = auth::send(ctx, RequestSpec::get(format!("{}?limit=10", paths::TWEETS)).tag("list tweets")).await;
        ctx.check(&listed).that("list: status 200", |r| r.status_is(200));

        let url = paths::tweet(&tweet_id);
        auth::send(ctx, RequestSpec::get(&url).tag("get tweet")).await;

        let edit = serde_json::json!({ "content": format!("UPDATED by loadbeat @ {}", chrono::Utc::now().timestamp_millis()) });
        let edited = auth::send(ctx, RequestSpec::patch(&url).json(edit).tag("edit tweet")).await;
        ctx.check(&edited).that("edit: status 200", |r| r.status_is(200));

        let reply = NewTweet {
            content: format!("Auto reply from VU{}", ctx.id),
            images: vec![IMAGES[0].to_string()],
            videos: Vec::new(),
        };
        let replied = auth::send(
            ctx,
            RequestSpec::post(paths::tweet_action(&tweet_id, "reply"))
                .json(serde_json::to_value(&reply)?)
                .expect_codes(&[201])
                .tag("reply"),
        )
        .await;
        ctx.check(&replied).that("reply: status 201", |r| r.status_is(201));
        let reply_id = tweet_of(&replied).map(|d| d.tweet_id);

        let quote = NewTweet {
            content: "This is a quote tweet by loadbeat #loadtest".to_string(),
            images: IMAGES.iter().map(|s| s.to_string()).collect(),
            videos: Vec::new(),
        };
        let quoted = auth::send(
            ctx,
            RequestSpec::post(paths::tweet_action(&tweet_id, "quote"))
                .json(serde_json::to_value(&quote)?)
                .expect_codes(&[201])
                .tag("quote"),
        )
        .await;
        ctx.check(&quoted).that("quote: status 201", |r| r.status_is(201));
        let quote_id = tweet_of(&quoted).map(|d| d.tweet_id);

        Self::toggle(ctx, &tweet_id, "like", &[204], &[204]).await;
        Self::toggle(ctx, &tweet_id, "repost", &[201], &[200, 204]).await;
        Self::toggle(ctx, &tweet_id, "bookmark", &[201, 204], &[200, 204]).await;

        let viewed = auth::send(
            ctx,
            RequestSpec::post(paths::tweet_action(&tweet_id, "view"))
                .expect_codes(&[200, 201, 204])
                .tag("view"),
        )
        .await;
        ctx.check(&viewed).that("view: accepted", |r| r.status_in(&[200, 201, 204]));
        ctx.metrics().add_counter("views", 1);

        let listings = [
            format!("{}?limit=5", paths::BOOKMARKS),
            format!("{}?limit=10", paths::tweet_action(&tweet_id, "likes")),
            format!("{}?limit=10", paths::tweet_action(&tweet_id, "reposts")),
            format!("{}?limit=10", paths::tweet_action(&tweet_id, "quotes")),
            format!("{}?limit=10", paths::tweet_action(&tweet_id, "replies")),
        ];
        for target in listings {
            let res = auth::send(ctx, RequestSpec::get(target).expect_codes(&[200])).await;
            ctx.check(&res).that("listing: status 200", |r| r.status_is(200));
        }

        if let Some(quote_id) = &quote_id {
            let edit = serde_json::json!({ "content": format!("Quote updated by loadbeat @ {}", chrono::Utc::now().timestamp_millis()) });
            auth::send(ctx, RequestSpec::patch(paths::tweet_action(quote_id, "quote")).json(edit).tag("edit quote")).await;
        }

        ctx.think(2.0, 5.0).await;

        let deleted = auth::send(ctx, RequestSpec::delete(&url).expect_codes(&[200, 204]).tag("delete tweet")).await;
        ctx.check(&deleted).that("tweet deleted", |r| r.status_in(&[200, 204]));

        for extra in reply_id.iter().chain(quote_id.iter()) {
            auth::send(ctx, RequestSpec::delete(paths::tweet(extra)).expect_codes(&[200, 204, 404]).tag("delete derived tweet")).await;
        }
        debug!(vu = ctx.id, tweet = %tweet_id, "Interaction sweep complete");

        ctx.think(3.0, 8.0).await;
        Ok(())
    }
}

/// Tweet every VU summarizes: `targets.tweet_id`, or one created in setup
#[derive(Debug, Clone, Default)]
pub struct SummaryTarget {
    pub tweet_id: String,
    /// Token that created the tweet, set only when teardown must delete it
    owner_token: Option<String>,
}

/// Request the generated summary of one tweet twice; the second call is
/// normally served from the backend's cache
pub struct TweetSummary;

impl TweetSummary {
    async fn summarize(ctx: &mut VuContext, tweet_id: &str, label: &str) -> HttpExchange {
        let statuses: [u16; 3] = [200, 404, 500];
        let res = auth::send(
            ctx,
            RequestSpec::get(paths::tweet_action(tweet_id, "summary"))
                .expect_codes(&statuses)
                .tag(format!("{label} summary")),
        )
        .await;
        let data = res.decode::<Envelope<SummaryData>>().ok().map(|e| e.data);
        ctx.check(&res)
            .that(&format!("{label} summary: status 200, 404, or 500"), |r| r.status_in(&statuses))
            .that(&format!("{label} summary: has summary when 200"), |r| {
                !r.status_is(200) || data.as_ref().is_some_and(|d| !d.summary.is_empty())
            })
            .that(&format!("{label} summary: has tweet_id when 200"), |r| {
                !r.status_is(200) || data.as_ref().is_some_and(|d| d.tweet_id == tweet_id)
            });
        match res.status {
            Some(200) => ctx.metrics().add_counter("summary_success", 1),
            Some(404) => ctx.metrics().add_counter("summary_not_found", 1),
            _ => ctx.metrics().add_counter("summary_failed", 1),
        }
        res
    }
}

#[async_trait]
impl Journey for TweetSummary {
    type Shared = SummaryTarget;

    fn name(&self) -> &'static str {
        "tweet-summary"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        // Summaries are generated on demand
        super::thresholds(&[
            ("http_req_failed", "rate<0.05"),
            ("http_req_duration", "p(95)<5000"),
            ("checks", "rate>0.95"),
        ])
    }

    async fn setup(&self, ctx: &mut VuContext) -> anyhow::Result<SummaryTarget> {
        if let Some(tweet_id) = ctx.config().targets.tweet_id.clone().filter(|id| !id.is_empty()) {
            return Ok(SummaryTarget {
                tweet_id,
                owner_token: None,
            });
        }
        let token = auth::sign_in(ctx).await.context("Setup login failed")?;
        let content = format!("Summary source tweet {}", ctx.rng.string(12, None)?);
        let tweet_id = create_tweet(ctx, &NewTweet::text(content))
            .await?
            .context("Setup could not create a tweet to summarize")?;
        Ok(SummaryTarget {
            tweet_id,
            owner_token: Some(token),
        })
    }

    async fn iteration(&self, ctx: &mut VuContext, shared: &SetupData<SummaryTarget>) -> anyhow::Result<()> {
        let tweet_id = shared.get()?.tweet_id.clone();
        auth::ensure_signed_in(ctx).await?;
        ctx.think(1.0, 2.0).await;

        Self::summarize(ctx, &tweet_id, "first").await;
        ctx.think(1.0, 2.0).await;
        Self::summarize(ctx, &tweet_id, "cached").await;

        ctx.think(1.0, 2.0).await;
        Ok(())
    }

    async fn teardown(&self, ctx: &mut VuContext, shared: &SetupData<SummaryTarget>) -> anyhow::Result<()> {
        let Ok(target) = shared.get() else {
            return Ok(());
        };
        if let Some(token) = &target.owner_token {
            ctx.send(
                RequestSpec::delete(paths::tweet(&target.tweet_id))
                    .bearer(token.clone())
                    .expect_codes(&[200, 204, 404])
                    .tag("delete summary tweet"),
            )
            .await;
        }
        Ok(())
    }
}
