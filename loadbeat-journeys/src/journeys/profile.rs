//! Current-user profile journeys: bio edit and avatar/cover media.

use async_trait::async_trait;
use loadbeat_core::{Journey, RequestSpec, SetupData, Threshold, VuContext};
use tracing::debug;

use super::SessionToken;
use crate::api::{paths, sample_jpeg, Envelope, MediaData, MediaDelete, MessageOnly, ProfilePatch, UserData};
use crate::auth;

/// Patch the bio and verify the response echoes it
pub struct ProfileUpdate;

#[async_trait]
impl Journey for ProfileUpdate {
    type Shared = ();

    fn name(&self) -> &'static str {
        "profile-update"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_failed", "rate<0.05"),
            ("http_req_duration", "p(95)<1000"),
            ("checks", "rate>0.95"),
        ])
    }

    async fn iteration(&self, ctx: &mut VuContext, _shared: &SetupData<()>) -> anyhow::Result<()> {
        auth::ensure_signed_in(ctx).await?;
        ctx.think(1.0, 2.0).await;

        let bio = format!("Random bio {}", ctx.rng.string(6, None)?);
        let res = auth::send(
            ctx,
            RequestSpec::patch(paths::ME)
                .json(serde_json::to_value(ProfilePatch { bio: bio.clone() })?)
                .expect_codes(&[200, 400, 401])
                .tag("update current user"),
        )
        .await;
        ctx.check(&res)
            .that("update: status 200", |r| r.status_is(200))
            .that("update: bio is updated", |r| {
                r.decode::<Envelope<UserData>>()
                    .is_ok_and(|e| e.data.bio.as_deref() == Some(bio.as_str()))
            });

        ctx.think(1.0, 2.0).await;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum MediaSlot {
    Avatar,
    Cover,
}

impl MediaSlot {
    fn noun(self) -> &'static str {
        match self {
            Self::Avatar => "Avatar",
            Self::Cover => "Cover",
        }
    }

    fn upload_path(self) -> &'static str {
        match self {
            Self::Avatar => paths::UPLOAD_AVATAR,
            Self::Cover => paths::UPLOAD_COVER,
        }
    }

    fn delete_path(self) -> &'static str {
        match self {
            Self::Avatar => paths::DELETE_AVATAR,
            Self::Cover => paths::DELETE_COVER,
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            Self::Avatar => "avatar.jpg",
            Self::Cover => "cover.jpg",
        }
    }
}

/// Upload avatar and cover images, then delete both by returned URL
pub struct MediaUpload;

impl MediaUpload {
    async fn upload(ctx: &mut VuContext, token: &str, slot: MediaSlot) -> Option<String> {
        let noun = slot.noun();
        let res = ctx
            .send(
                RequestSpec::post(slot.upload_path())
                    .file(slot.file_name(), "image/jpeg", sample_jpeg())
                    .bearer(token)
                    .expect_codes(&[201])
                    .tag(format!("upload {}", noun.to_lowercase())),
            )
            .await;
        let message = format!("{noun} uploaded successfully");
        ctx.check(&res)
            .that(&format!("{} upload status is 201", noun.to_lowercase()), |r| r.status_is(201))
            .that(&format!("{} upload success message", noun.to_lowercase()), |r| {
                r.decode::<MessageOnly>()
                    .is_ok_and(|m| m.message.as_deref() == Some(message.as_str()))
            });

        if res.is_transport_error() {
            debug!(vu = ctx.id, slot = noun, "Upload got no response, skipping delete");
            return None;
        }
        res.decode::<Envelope<MediaData>>()
            .ok()
            .filter(|_| res.status_is(201))
            .map(|e| e.data.image_url)
    }

    async fn delete(ctx: &mut VuContext, token: &str, slot: MediaSlot, url: String) -> anyhow::Result<()> {
        let noun = slot.noun();
        let res = ctx
            .send(
                RequestSpec::delete(slot.delete_path())
                    .json(serde_json::to_value(MediaDelete { file_url: url })?)
                    .bearer(token)
                    .expect_codes(&[200])
                    .tag(format!("delete {}", noun.to_lowercase())),
            )
            .await;
        let message = format!("{noun} deleted successfully");
        ctx.check(&res)
            .that(&format!("{} delete status is 200", noun.to_lowercase()), |r| r.status_is(200))
            .that(&format!("{} delete success message", noun.to_lowercase()), |r| {
                r.decode::<MessageOnly>()
                    .is_ok_and(|m| m.message.as_deref() == Some(message.as_str()))
            });
        Ok(())
    }
}

#[async_trait]
impl Journey for MediaUpload {
    type Shared = SessionToken;

    fn name(&self) -> &'static str {
        "media-upload"
    }

    fn thresholds(&self) -> Option<Vec<Threshold>> {
        super::thresholds(&[
            ("http_req_failed", "rate<0.05"),
            ("http_req_duration", "p(95)<2000"),
            ("checks", "rate>0.95"),
        ])
    }

    async fn setup(&self, ctx: &mut VuContext) -> anyhow::Result<SessionToken> {
        Ok(SessionToken(auth::sign_in(ctx).await?))
    }

    async fn iteration(&self, ctx: &mut VuContext, shared: &SetupData<SessionToken>) -> anyhow::Result<()> {
        let token = shared.get()?.0.clone();

        let avatar = Self::upload(ctx, &token, MediaSlot::Avatar).await;
        let cover = Self::upload(ctx, &token, MediaSlot::Cover).await;

        for (slot, url) in [(MediaSlot::Avatar, avatar), (MediaSlot::Cover, cover)] {
            match url {
                Some(url) => Self::delete(ctx, &token, slot, url).await?,
                None => debug!(vu = ctx.id, slot = slot.noun(), "No image URL, skipping delete"),
            }
        }

        ctx.think(1.0, 2.0).await;
        Ok(())
    }
}
