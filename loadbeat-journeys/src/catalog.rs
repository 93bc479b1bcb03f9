//! Journey registry: names, descriptions and dispatch by name.

use loadbeat_core::{HarnessError, Result, RunSummary, Runner, ScenarioProfile};
use std::sync::Arc;

use crate::journeys::{
    AssignInterests, BlockUnblock, CaptchaSiteKey, ChatMessages, CheckIdentifier, Follow, FollowingFeed, ForgetPassword,
    Login, LogoutAll, MediaUpload, MuteUnmute, ProfileUpdate, Refresh, Signup, Timeline, TweetInteractions,
    TweetLifecycle, TweetSummary, UpdateUsername, UserLists, UserLookup,
};

/// Registry entry
#[derive(Debug, Clone, Copy)]
pub struct JourneyInfo {
    pub name: &'static str,
    pub description: &'static str,
    /// Stages used when neither the command line nor the configuration
    /// choose a profile
    pub default_stages: Option<&'static str>,
}

impl JourneyInfo {
    pub fn default_profile(&self) -> Result<Option<ScenarioProfile>> {
        self.default_stages.map(ScenarioProfile::parse_stages).transpose()
    }
}

pub const JOURNEYS: &[JourneyInfo] = &[
    JourneyInfo {
        name: "login",
        description: "Valid login (token issued) and random invalid login (rejected)",
        default_stages: None,
    },
    JourneyInfo {
        name: "signup",
        description: "Signup steps 1-3, login with the new account, change password",
        default_stages: None,
    },
    JourneyInfo {
        name: "check-identifier",
        description: "Existing email is known; random email/phone/username are not",
        default_stages: None,
    },
    JourneyInfo {
        name: "refresh",
        description: "Login then cookie-based token refresh; only 5xx fail",
        default_stages: None,
    },
    JourneyInfo {
        name: "logout-all",
        description: "Login then revoke every session",
        default_stages: None,
    },
    JourneyInfo {
        name: "tweet-lifecycle",
        description: "Create, fetch, unauthorized fetch, delete, fetch deleted",
        default_stages: None,
    },
    JourneyInfo {
        name: "tweet-interactions",
        description: "Like, repost, bookmark, view, quote, reply and listings on a new tweet",
        default_stages: None,
    },
    JourneyInfo {
        name: "timeline",
        description: "For-you and following timelines with pagination and error cases",
        default_stages: None,
    },
    JourneyInfo {
        name: "follow",
        description: "Follow TARGET_USER_ID (skipped when unset)",
        default_stages: None,
    },
    JourneyInfo {
        name: "block-unblock",
        description: "Block then unblock TARGET_USER_ID with a setup token",
        default_stages: Some("1s:1"),
    },
    JourneyInfo {
        name: "mute-unmute",
        description: "Mute then unmute TARGET_USER_ID with a setup token",
        default_stages: Some("1s:1"),
    },
    JourneyInfo {
        name: "profile-update",
        description: "Patch the current user's bio and verify the echo",
        default_stages: None,
    },
    JourneyInfo {
        name: "media-upload",
        description: "Upload and delete avatar and cover images",
        default_stages: Some("30s:10"),
    },
    JourneyInfo {
        name: "captcha-site-key",
        description: "Fetch the public captcha site key",
        default_stages: None,
    },
    JourneyInfo {
        name: "forget-password",
        description: "Password reset for an unknown identifier is rejected",
        default_stages: None,
    },
    JourneyInfo {
        name: "update-username",
        description: "Rename the account; invalid token and invalid name are rejected",
        default_stages: None,
    },
    JourneyInfo {
        name: "tweet-summary",
        description: "Generated summary of TARGET_TWEET_ID (or a setup tweet), fetched twice",
        default_stages: None,
    },
    JourneyInfo {
        name: "following-bottleneck",
        description: "Login, following timeline, logout; counts non-JSON replies",
        default_stages: None,
    },
    JourneyInfo {
        name: "chat-messages",
        description: "Paged history of TARGET_CHAT_ID (skipped when unset)",
        default_stages: None,
    },
    JourneyInfo {
        name: "user-lookup",
        description: "Lookups by TARGET_USERNAME and TARGET_USER_ID plus misses",
        default_stages: None,
    },
    JourneyInfo {
        name: "user-lists",
        description: "Relation counts, blocked, muted, liked posts and per-user listings",
        default_stages: Some("1s:1"),
    },
    JourneyInfo {
        name: "assign-interests",
        description: "Assign interest categories with a setup token",
        default_stages: Some("1s:1"),
    },
];

pub fn find(name: &str) -> Result<&'static JourneyInfo> {
    JOURNEYS
        .iter()
        .find(|j| j.name == name)
        .ok_or_else(|| HarnessError::UnknownJourney(name.to_string()))
}

pub fn journey_names() -> impl Iterator<Item = &'static str> {
    JOURNEYS.iter().map(|j| j.name)
}

/// Run the journey registered as `name`
pub async fn run_named(name: &str, runner: &Runner) -> Result<RunSummary> {
    match name {
        "login" => runner.run(Arc::new(Login)).await,
        "signup" => runner.run(Arc::new(Signup)).await,
        "check-identifier" => runner.run(Arc::new(CheckIdentifier)).await,
        "refresh" => runner.run(Arc::new(Refresh)).await,
        "logout-all" => runner.run(Arc::new(LogoutAll)).await,
        "tweet-lifecycle" => runner.run(Arc::new(TweetLifecycle)).await,
        "tweet-interactions" => runner.run(Arc::new(TweetInteractions)).await,
        "timeline" => runner.run(Arc::new(Timeline)).await,
        "follow" => runner.run(Arc::new(Follow)).await,
        "block-unblock" => runner.run(Arc::new(BlockUnblock)).await,
        "mute-unmute" => runner.run(Arc::new(MuteUnmute)).await,
        "profile-update" => runner.run(Arc::new(ProfileUpdate)).await,
        "media-upload" => runner.run(Arc::new(MediaUpload)).await,
        "captcha-site-key" => runner.run(Arc::new(CaptchaSiteKey)).await,
        "forget-password" => runner.run(Arc::new(ForgetPassword)).await,
        "update-username" => runner.run(Arc::new(UpdateUsername)).await,
        "tweet-summary" => runner.run(Arc::new(TweetSummary)).await,
        "following-bottleneck" => runner.run(Arc::new(FollowingFeed)).await,
        "chat-messages" => runner.run(Arc::new(ChatMessages)).await,
        "user-lookup" => runner.run(Arc::new(UserLookup)).await,
        "user-lists" => runner.run(Arc::new(UserLists)).await,
        "assign-interests" => runner.run(Arc::new(AssignInterests)).await,
        other => Err(HarnessError::UnknownJourney(other.to_string())),
    }
}
