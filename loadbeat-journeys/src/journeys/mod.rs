//! Scripted user flows against the social-network API.

mod account;
mod chat;
mod profile;
mod social;
mod timeline;
mod tweets;
mod users;

pub use account::{CaptchaSiteKey, CheckIdentifier, ForgetPassword, Login, LogoutAll, Refresh, Signup, UpdateUsername};
pub use chat::ChatMessages;
pub use profile::{MediaUpload, ProfileUpdate};
pub use social::{BlockUnblock, Follow, MuteUnmute, SessionToken};
pub use timeline::{FollowingFeed, Timeline};
pub use tweets::{SummaryTarget, TweetInteractions, TweetLifecycle, TweetSummary};
pub use users::{AssignInterests, UserLists, UserLookup};

use loadbeat_core::Threshold;
use tracing::warn;

/// Build a journey's threshold set from `(metric, expression)` pairs
pub(crate) fn thresholds(pairs: &[(&str, &str)]) -> Option<Vec<Threshold>> {
    let parsed: loadbeat_core::Result<Vec<Threshold>> =
        pairs.iter().map(|(metric, expr)| Threshold::new(*metric, expr)).collect();
    match parsed {
        Ok(list) => Some(list),
        Err(e) => {
            warn!(error = %e, "Ignoring journey thresholds");
            None
        }
    }
}
