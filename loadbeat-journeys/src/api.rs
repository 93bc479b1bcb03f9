//! Wire types and routes of the social-network API under test.
//!
//! Responses wrap their payload as `{"data": ..., "message": ...}`.

use serde::{Deserialize, Serialize};

/// Standard response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of a response that carries only a message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageOnly {
    #[serde(default)]
    pub message: Option<String>,
}

impl MessageOnly {
    /// Lowercased message, empty when absent
    pub fn lowered(&self) -> String {
        self.message.as_deref().unwrap_or_default().to_lowercase()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl LoginRequest {
    pub fn email(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password: password.into(),
            kind: "email".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenData {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupStart {
    pub name: String,
    pub birth_date: String,
    pub email: String,
    pub captcha_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupStartData {
    #[serde(rename = "isEmailSent")]
    pub is_email_sent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupVerify {
    pub email: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupComplete {
    pub email: String,
    pub password: String,
    pub username: String,
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePassword {
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierQuery {
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierData {
    pub identifier_type: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTweet {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<String>,
}

impl NewTweet {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            images: Vec::new(),
            videos: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetData {
    pub tweet_id: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserData {
    pub user_id: String,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub bio: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaData {
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDelete {
    pub file_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelinePage {
    #[serde(default)]
    pub pagination: Pagination,
}

/// One record of a batch lookup (`/users?ids=`, `/users/by/username`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupRecord {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserData>,
}

/// Paged user-facing listing: `{"data": {"data": [...]}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub data: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationsCount {
    pub blocked_count: u64,
    pub muted_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendations {
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignInterests {
    pub category_ids: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsernameUpdate {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteKeyData {
    #[serde(rename = "siteKey")]
    pub site_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryData {
    pub tweet_id: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPage {
    pub messages: Vec<serde_json::Value>,
    #[serde(default)]
    pub pagination: Pagination,
}

/// Route table
pub mod paths {
    pub const LOGIN: &str = "/auth/login";
    pub const REFRESH: &str = "/auth/refresh";
    pub const LOGOUT: &str = "/auth/logout";
    pub const LOGOUT_ALL: &str = "/auth/logout-all";
    pub const CHECK_IDENTIFIER: &str = "/auth/check-identifier";
    pub const SIGNUP_STEP1: &str = "/auth/signup/step1";
    pub const SIGNUP_STEP2: &str = "/auth/signup/step2";
    pub const SIGNUP_STEP3: &str = "/auth/signup/step3";
    pub const CHANGE_PASSWORD: &str = "/auth/change-password";
    pub const FORGET_PASSWORD: &str = "/auth/forget-password";
    pub const UPDATE_USERNAME: &str = "/auth/update-username";
    pub const CAPTCHA_SITE_KEY: &str = "/auth/captcha/site-key";

    pub const TWEETS: &str = "/tweets";
    pub const BOOKMARKS: &str = "/tweets/bookmarks";

    pub const FOR_YOU: &str = "/timeline/for-you";
    pub const FOLLOWING: &str = "/timeline/following";

    pub const USERS: &str = "/users";
    pub const USERS_BY_USERNAME: &str = "/users/by/username";
    pub const ME: &str = "/users/me";
    pub const RELATIONS_COUNT: &str = "/users/me/relations-count";
    pub const BLOCKED: &str = "/users/me/blocked";
    pub const MUTED: &str = "/users/me/muted";
    pub const LIKED_POSTS: &str = "/users/me/liked-posts";
    pub const USERNAME_RECOMMENDATIONS: &str = "/users/me/username-recommendations";
    pub const INTERESTS: &str = "/users/me/interests";
    pub const UPLOAD_AVATAR: &str = "/users/me/upload-avatar";
    pub const DELETE_AVATAR: &str = "/users/me/delete-avatar";
    pub const UPLOAD_COVER: &str = "/users/me/upload-cover";
    pub const DELETE_COVER: &str = "/users/me/delete-cover";

    pub fn tweet(id: &str) -> String {
        format!("/tweets/{id}")
    }

    /// `/tweets/{id}/{action}` for like, repost, bookmark, view, quote, reply and their listings
    pub fn tweet_action(id: &str, action: &str) -> String {
        format!("/tweets/{id}/{action}")
    }

    pub fn user(id: &str) -> String {
        format!("/users/{id}")
    }

    /// `/users/{id}/{action}` for follow, block, mute, the reverse actions
    /// and the followers, following, posts and replies listings
    pub fn user_action(id: &str, action: &str) -> String {
        format!("/users/{id}/{action}")
    }

    pub fn chat_messages(chat_id: &str) -> String {
        format!("/messages/chats/{chat_id}/messages")
    }
}

/// Tweet id no backend will ever issue
pub const UNKNOWN_TWEET_ID: &str = "ffffffff-ffff-ffff-ffff-ffffffffffff";

/// Smallest well-formed JPEG: SOI, an empty APP0 JFIF segment and EOI
pub fn sample_jpeg() -> Vec<u8> {
    vec![
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01,
        0x00, 0x00, 0xFF, 0xD9,
    ]
}
