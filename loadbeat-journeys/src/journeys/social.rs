//! Relationship journeys. They act on `targets.user_id` and are skipped
//! when no target is configured.

use anyhow::Context;
use async_trait::async_trait;
use loadbeat_core::{Journey, RequestSpec, SetupData, Threshold, VuContext};
use tracing::debug;

use crate::api::{paths, Envelope, MessageOnly, UserData};
use crate::auth;

/// Access token obtained once in setup and shared by every VU
#[derive(Debug, Clone, Default)]
pub struct SessionToken(pub String);

pub(super) fn target_user(ctx: &VuContext) -> Option<String> {
    ctx.config().targets.user_id.clone().filter(|id| !id.is_empty())
}

pub(super) async fn shared_sign_in(ctx: &mut VuContext) -> anyhow::Result<SessionToken> {
    let token = auth::sign_in(ctx).await.context("Setup login failed")?;
    Ok(SessionToken(token))
}

/// Apply a relation (`block`, `mute`) then lift it again
async fn toggle_relation(
    ctx: &mut VuContext,
    token: &str,
    target: &str,
    apply: &str,
    lift: &str,
    noun: &str,
) {
    let applied = ctx
        .send(
            RequestSpec::post(paths::user_action(target, apply))
                .bearer(token)
                .expect_codes(&[201])
                .tag(format!("{apply} user")),
        )
        .await;
    let applied_message = format!("{noun} user successfully");
    ctx.check(&applied)
        .that(&format!("{apply}: status 201"), |r| r.status_is(201))
        .that(&format!("{apply}: success message"), |r| {
            r.decode::<MessageOnly>()
                .is_ok_and(|m| m.message.as_deref() == Some(applied_message.as_str()))
        });

    let lifted = ctx
        .send(
            RequestSpec::delete(paths::user_action(target, lift))
                .bearer(token)
                .expect_codes(&[200])
                .tag(format!("{lift} user")),
        )
        .await;
    let lifted_message = format!("Un{} user successfully", noun.to_lowercase());
    ctx.check(&lifted)
        .that(&format!("{lift}: status 200"), |r| r.status_is(200))
        .that(&format!("{lift}: success message"), |r| {
            r.decode::<MessageOnly>()
                .is_ok_and(|m| m.message.as_deref() == Some(lifted_message.as_str()))
        });
}

/// Resolve the current user, then follow the configured target
pub struct Follow;

#[async_trait]
impl Journey for Follow {
    type Shared = ();

    fn name(&self) -> &'static str {
        "follow"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_failed", "rate<0.02"),
            ("http_req_duration", "p(95)<800"),
            ("checks", "rate>0.95"),
        ])
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> anyhow::Result<()> {
        auth::ensure_signed_in(ctx).await?;
        ctx.think(1.0, 2.0).await;

        let me = auth::send(ctx, RequestSpec::get(paths::ME).expect_codes(&[200]).tag("get current user")).await;
        let me = me
            .decode::<Envelope<UserData>>()
            .context("Current user response has no data.user_id")?;
        ctx.think(0.5, 1.0).await;

        let Some(target) = target_user(ctx) else {
            debug!(vu = ctx.id, "No target user configured, skipping follow");
            return Ok(());
        };
        if target == me.data.user_id {
            debug!(vu = ctx.id, "Target user is the test account, skipping follow");
            return Ok(());
        }

        let statuses: [u16; 4] = [201, 409, 403, 404];
        let res = auth::send(
            ctx,
            RequestSpec::post(paths::user_action(&target, "follow"))
                .expect_codes(&statuses)
                .tag("follow user"),
        )
        .await;
        ctx.check(&res)
            .that("follow target: status 201, 409, 403, or 404", |r| r.status_in(&statuses));

        ctx.think(0.5, 1.0).await;
        Ok(())
    }
}

/// Block then unblock the target with the setup token
pub struct BlockUnblock;

#[async_trait]
impl Journey for BlockUnblock {
    type Shared = SessionToken;

    fn name(&self) -> &'static str {
        "block-unblock"
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
        let Some(target) = target_user(ctx) else {
            debug!(vu = ctx.id, "No target user configured, skipping block");
            return Ok(());
        };
        toggle_relation(ctx, &token, &target, "block", "unblock", "Blocked").await;
        ctx.think(1.0, 2.0).await;
        Ok(())
    }
}

/// Mute then unmute the target with the setup token
pub struct MuteUnmute;

#[async_trait]
impl Journey for MuteUnmute {
    type Shared = SessionToken;

    fn name(&self) -> &'static str {
        "mute-unmute"
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
        let Some(target) = target_user(ctx) else {
            debug!(vu = ctx.id, "No target user configured, skipping mute");
            return Ok(());
        };
        toggle_relation(ctx, &token, &target, "mute", "unmute", "Muted").await;
        ctx.think(1.0, 2.0).await;
        Ok(())
    }
}
