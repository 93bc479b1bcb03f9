//! In-memory social-network backend for exercising journeys without a
//! real deployment.
//!
//! It implements the subset of the API the journeys call, with the same
//! status codes and `{"data", "message"}` envelopes. State lives in
//! `DashMap`s and is lost on shutdown.

use anyhow::{Context, Result};
use axum::{
    extract::{Multipart, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::api::{
    AssignInterests, ChangePassword, IdentifierQuery, LoginRequest, MediaDelete, NewTweet, SignupComplete,
    SignupStart, SignupVerify, UsernameUpdate,
};

/// Page size above which list endpoints answer 400
pub const MAX_PAGE_SIZE: usize = 100;
const DEFAULT_PAGE_SIZE: usize = 20;
/// Messages seeded into the target chat, enough for a second page
const SEEDED_MESSAGES: usize = 30;
const CAPTCHA_SITE_KEY: &str = "loadbeat-site-key";

type Reply = std::result::Result<Response, Response>;

#[derive(Debug, Clone)]
struct Account {
    user_id: String,
    email: String,
    username: String,
    password: String,
    bio: Option<String>,
    avatar: Option<String>,
    cover: Option<String>,
    interests: Vec<u32>,
}

impl Account {
    fn new(email: &str, username: &str, password: &str) -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            bio: None,
            avatar: None,
            cover: None,
            interests: Vec::new(),
        }
    }

    /// Fields any caller may see
    fn public_view(&self) -> Value {
        json!({
            "user_id": self.user_id,
            "username": self.username,
            "bio": self.bio,
            "avatar_url": self.avatar,
        })
    }

    fn view(&self) -> Value {
        json!({
            "user_id": self.user_id,
            "username": self.username,
            "email": self.email,
            "bio": self.bio,
            "avatar_url": self.avatar,
            "cover_url": self.cover,
        })
    }
}

#[derive(Debug, Clone)]
struct Tweet {
    tweet_id: String,
    author: String,
    content: String,
    parent: Option<(String, &'static str)>,
    seq: u64,
    created_at: DateTime<Utc>,
}

impl Tweet {
    fn view(&self) -> Value {
        json!({
            "tweet_id": self.tweet_id,
            "user_id": self.author,
            "content": self.content,
            "created_at": self.created_at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone)]
struct Chat {
    participants: Vec<String>,
    messages: Vec<Value>,
}

/// Counters exposed at `/__mock/stats`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MockStats {
    pub accounts: usize,
    pub tweets: usize,
    pub live_tokens: usize,
    pub requests: u64,
}

#[derive(Debug, Default)]
struct MockState {
    accounts: DashMap<String, Account>,
    access_tokens: DashMap<String, String>,
    refresh_tokens: DashMap<String, String>,
    /// email -> verified
    pending_signups: DashMap<String, bool>,
    tweets: DashMap<String, Tweet>,
    chats: DashMap<String, Chat>,
    /// (user, relation, subject)
    relations: DashSet<(String, String, String)>,
    seq: AtomicU64,
    requests: AtomicU64,
}

impl MockState {
    fn find_account(&self, identifier: &str) -> Option<Account> {
        self.accounts
            .iter()
            .find(|a| a.email == identifier || a.username == identifier)
            .map(|a| a.value().clone())
    }

    fn issue_access(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.access_tokens.insert(token.clone(), user_id.to_string());
        token
    }

    fn authenticate(&self, headers: &HeaderMap) -> std::result::Result<String, Response> {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .and_then(|token| self.access_tokens.get(token).map(|u| u.value().clone()))
            .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Invalid or expired token"))
    }

    fn insert_tweet(&self, author: &str, content: String, parent: Option<(String, &'static str)>) -> Tweet {
        let tweet = Tweet {
            tweet_id: Uuid::new_v4().to_string(),
            author: author.to_string(),
            content,
            parent,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            created_at: Utc::now(),
        };
        self.tweets.insert(tweet.tweet_id.clone(), tweet.clone());
        tweet
    }

    /// Newest-first tweets matching `filter`
    fn tweets_where(&self, filter: impl Fn(&Tweet) -> bool) -> Vec<Value> {
        let mut matching: Vec<Tweet> = self
            .tweets
            .iter()
            .filter(|t| filter(t.value()))
            .map(|t| t.value().clone())
            .collect();
        matching.sort_by(|a, b| b.seq.cmp(&a.seq));
        matching.iter().map(Tweet::view).collect()
    }

    /// Newest-first page of tweets matching `filter`
    fn page(&self, query: &PageQuery, filter: impl Fn(&Tweet) -> bool) -> Reply {
        let (items, next_cursor) = query.slice(self.tweets_where(filter))?;
        Ok(ok(
            StatusCode::OK,
            json!({ "tweets": items, "pagination": { "next_cursor": next_cursor } }),
            None,
        ))
    }

    /// Public views of the accounts `user` has a `relation` with, or, when
    /// `reverse`, of the accounts that have it with `user`
    fn related_accounts(&self, user: &str, relation: &str, reverse: bool) -> Vec<Value> {
        let mut ids: Vec<String> = self
            .relations
            .iter()
            .filter(|r| r.1 == relation && if reverse { r.2 == user } else { r.0 == user })
            .map(|r| if reverse { r.0.clone() } else { r.2.clone() })
            .collect();
        ids.sort();
        ids.iter()
            .filter_map(|id| self.accounts.get(id).map(|a| a.public_view()))
            .collect()
    }

    fn relation_count(&self, user: &str, relation: &str) -> usize {
        self.relations.iter().filter(|r| r.0 == user && r.1 == relation).count()
    }

    fn stats(&self) -> MockStats {
        MockStats {
            accounts: self.accounts.len(),
            tweets: self.tweets.len(),
            live_tokens: self.access_tokens.len(),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }
}

type Shared = Arc<MockState>;

fn ok(status: StatusCode, data: Value, message: Option<&str>) -> Response {
    match message {
        Some(message) => (status, Json(json!({ "data": data, "message": message }))).into_response(),
        None => (status, Json(json!({ "data": data }))).into_response(),
    }
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// `limit`/`cursor` paging, with `page_offset`/`page_size` (1-based pages)
/// accepted as an alternative
#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    limit: Option<usize>,
    cursor: Option<String>,
    page_offset: Option<usize>,
    page_size: Option<usize>,
}

impl PageQuery {
    /// Cut one page out of `items`, returning it with the next cursor
    fn slice(&self, items: Vec<Value>) -> std::result::Result<(Vec<Value>, Option<String>), Response> {
        let limit = self.limit.or(self.page_size).unwrap_or(DEFAULT_PAGE_SIZE);
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(message(
                StatusCode::BAD_REQUEST,
                &format!("limit must be between 1 and {MAX_PAGE_SIZE}"),
            ));
        }
        let offset = match (&self.cursor, self.page_offset) {
            (Some(cursor), _) => cursor
                .parse::<usize>()
                .map_err(|_| message(StatusCode::BAD_REQUEST, "Invalid cursor"))?,
            (None, Some(page)) => page.saturating_sub(1).saturating_mul(limit),
            (None, None) => 0,
        };
        let total = items.len();
        let page: Vec<Value> = items.into_iter().skip(offset).take(limit).collect();
        let next_cursor = (offset.saturating_add(limit) < total).then(|| (offset + limit).to_string());
        Ok((page, next_cursor))
    }
}

/// Listing body shared by the user endpoints: `{"data": {"data": [...]}}`
fn listing(query: &PageQuery, items: Vec<Value>, text: &str) -> Reply {
    let total = items.len();
    let (page, next_cursor) = query.slice(items)?;
    Ok(ok(
        StatusCode::OK,
        json!({ "data": page, "count": total, "pagination": { "next_cursor": next_cursor } }),
        Some(text),
    ))
}

/// Username of the seeded extra user
pub const TARGET_USERNAME: &str = "loadbeat_target";

/// Handle to a configured backend
#[derive(Debug, Clone)]
pub struct MockBackend {
    state: Shared,
    target_user_id: String,
    target_chat_id: String,
}

impl MockBackend {
    /// Backend with one login account, one extra user to act on and a chat
    /// between the two
    pub fn new(email: &str, password: &str) -> Self {
        let state = Arc::new(MockState::default());
        let account = Account::new(email, "loadbeat_user", password);
        let account_id = account.user_id.clone();
        state.accounts.insert(account.user_id.clone(), account);

        let target = Account::new("target@loadbeat.test", TARGET_USERNAME, &Uuid::new_v4().to_string());
        let target_user_id = target.user_id.clone();
        state.accounts.insert(target.user_id.clone(), target);

        let target_chat_id = Uuid::new_v4().to_string();
        let participants = vec![account_id, target_user_id.clone()];
        let messages = (0..SEEDED_MESSAGES)
            .map(|i| {
                json!({
                    "message_id": Uuid::new_v4().to_string(),
                    "sender_id": participants[i % 2],
                    "content": format!("message {i}"),
                    "created_at": Utc::now().to_rfc3339(),
                })
            })
            .collect();
        state.chats.insert(target_chat_id.clone(), Chat { participants, messages });

        Self {
            state,
            target_user_id,
            target_chat_id,
        }
    }

    /// User id suitable for `TARGET_USER_ID`
    pub fn target_user_id(&self) -> &str {
        &self.target_user_id
    }

    /// Chat id suitable for `TARGET_CHAT_ID`
    pub fn target_chat_id(&self) -> &str {
        &self.target_chat_id
    }

    pub fn stats(&self) -> MockStats {
        self.state.stats()
    }

    /// Routes mounted under `prefix` (empty for the root)
    pub fn router(&self, prefix: &str) -> Router {
        let api = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/refresh", post(refresh))
            .route("/auth/logout-all", post(logout_all))
            .route("/auth/check-identifier", post(check_identifier))
            .route("/auth/signup/step1", post(signup_start))
            .route("/auth/signup/step2", post(signup_verify))
            .route("/auth/signup/step3", post(signup_complete))
            .route("/auth/change-password", post(change_password))
            .route("/auth/forget-password", post(forget_password))
            .route("/auth/update-username", post(update_username))
            .route("/auth/captcha/site-key", get(captcha_site_key))
            .route("/auth/logout", post(logout))
            .route("/tweets", get(list_tweets).post(create_tweet))
            .route("/tweets/bookmarks", get(list_bookmarks))
            .route("/tweets/:id", get(get_tweet).patch(edit_tweet).delete(delete_tweet))
            .route(
                "/tweets/:id/:action",
                get(tweet_listing)
                    .post(tweet_action)
                    .patch(edit_derived)
                    .delete(undo_tweet_action),
            )
            .route("/timeline/for-you", get(timeline_for_you))
            .route("/timeline/following", get(timeline_following))
            .route("/users", get(users_by_id))
            .route("/users/by/username", get(users_by_username))
            .route("/users/me", get(current_user).patch(update_current_user))
            .route("/users/me/relations-count", get(relations_count))
            .route("/users/me/blocked", get(blocked_users))
            .route("/users/me/muted", get(muted_users))
            .route("/users/me/liked-posts", get(liked_posts))
            .route("/users/me/username-recommendations", get(username_recommendations))
            .route("/users/me/interests", post(assign_interests))
            .route("/users/me/upload-avatar", post(upload_avatar))
            .route("/users/me/upload-cover", post(upload_cover))
            .route("/users/me/delete-avatar", delete(delete_avatar))
            .route("/users/me/delete-cover", delete(delete_cover))
            .route("/users/:id", get(user_by_id))
            .route(
                "/users/:id/:action",
                get(user_listing).post(apply_relation).delete(lift_relation),
            )
            .route("/messages/chats/:id/messages", get(chat_messages))
            .route("/__mock/stats", get(stats));

        let api = if prefix.is_empty() || prefix == "/" {
            api
        } else {
            Router::new().nest(prefix, api)
        };
        api.layer(middleware::from_fn_with_state(Arc::clone(&self.state), count_requests))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve on an already bound listener until the task is dropped
    pub async fn serve(self, listener: TcpListener, prefix: &str) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(listen_addr = %addr, prefix = %prefix, "Mock backend started");
        axum::serve(listener, self.router(prefix))
            .await
            .context("Mock backend server error")
    }

    /// Bind `addr` and serve in the background
    pub async fn start(self, addr: &str) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {addr}"))?;
        let local = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = self.serve(listener, "").await {
                error!(error = %e, "Mock backend stopped");
            }
        });
        Ok((local, handle))
    }
}

async fn count_requests(State(state): State<Shared>, request: Request, next: Next) -> Response {
    state.requests.fetch_add(1, Ordering::Relaxed);
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    debug!(method = %method, path = %path, status = response.status().as_u16(), "Mock: handled request");
    response
}

async fn stats(State(state): State<Shared>) -> Json<MockStats> {
    Json(state.stats())
}

async fn login(State(state): State<Shared>, Json(req): Json<LoginRequest>) -> Response {
    match state.find_account(&req.identifier) {
        Some(account) if account.password == req.password => {
            let access = state.issue_access(&account.user_id);
            let refresh = Uuid::new_v4().simple().to_string();
            state.refresh_tokens.insert(refresh.clone(), account.user_id);
            (
                StatusCode::CREATED,
                [(header::SET_COOKIE, format!("refresh_token={refresh}; Path=/; HttpOnly"))],
                Json(json!({ "data": { "access_token": access }, "message": "Logged in successfully" })),
            )
                .into_response()
        }
        Some(_) => message(StatusCode::UNAUTHORIZED, "Invalid credentials"),
        None => message(StatusCode::NOT_FOUND, "User not found"),
    }
}

async fn refresh(State(state): State<Shared>, headers: HeaderMap) -> Reply {
    let refresh = cookie_value(&headers, "refresh_token")
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Missing refresh token"))?;
    let user_id = state
        .refresh_tokens
        .get(&refresh)
        .map(|u| u.value().clone())
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Invalid refresh token"))?;
    let access = state.issue_access(&user_id);
    Ok(ok(StatusCode::OK, json!({ "access_token": access }), Some("Token refreshed")))
}

async fn logout_all(State(state): State<Shared>, headers: HeaderMap) -> Reply {
    let user_id = state.authenticate(&headers)?;
    state.access_tokens.retain(|_, owner| *owner != user_id);
    state.refresh_tokens.retain(|_, owner| *owner != user_id);
    Ok(message(StatusCode::CREATED, "Logged out from all devices"))
}

async fn check_identifier(State(state): State<Shared>, Json(req): Json<IdentifierQuery>) -> Reply {
    let account = state
        .find_account(&req.identifier)
        .ok_or_else(|| message(StatusCode::NOT_FOUND, "User not found"))?;
    let identifier_type = if account.email == req.identifier { "email" } else { "username" };
    Ok(ok(
        StatusCode::OK,
        json!({ "identifier_type": identifier_type, "user_id": account.user_id }),
        Some("Identifier is available"),
    ))
}

async fn signup_start(State(state): State<Shared>, Json(req): Json<SignupStart>) -> Reply {
    if req.email.is_empty() || req.captcha_token.is_empty() {
        return Err(message(StatusCode::BAD_REQUEST, "Email and captcha are required"));
    }
    if state.find_account(&req.email).is_some() {
        return Err(message(StatusCode::CONFLICT, "Email already exists"));
    }
    state.pending_signups.insert(req.email, false);
    Ok(ok(StatusCode::CREATED, json!({ "isEmailSent": true }), Some("Verification email sent")))
}

async fn signup_verify(State(state): State<Shared>, Json(req): Json<SignupVerify>) -> Reply {
    let mut pending = state
        .pending_signups
        .get_mut(&req.email)
        .ok_or_else(|| message(StatusCode::NOT_FOUND, "No pending signup for this email"))?;
    if req.token.len() != 6 || !req.token.chars().all(|c| c.is_ascii_digit()) {
        return Err(message(StatusCode::BAD_REQUEST, "Invalid OTP"));
    }
    *pending = true;
    Ok(message(StatusCode::CREATED, "Email verified"))
}

async fn signup_complete(State(state): State<Shared>, Json(req): Json<SignupComplete>) -> Reply {
    let verified = state.pending_signups.get(&req.email).map(|v| *v).unwrap_or(false);
    if !verified {
        return Err(message(StatusCode::BAD_REQUEST, "Email not verified"));
    }
    if state.find_account(&req.username).is_some() || state.find_account(&req.email).is_some() {
        return Err(message(StatusCode::CONFLICT, "Username or email already taken"));
    }
    let account = Account::new(&req.email, &req.username, &req.password);
    let user_id = account.user_id.clone();
    state.accounts.insert(user_id.clone(), account);
    state.pending_signups.remove(&req.email);
    Ok(ok(StatusCode::CREATED, json!({ "user_id": user_id }), Some("Account created")))
}

async fn change_password(State(state): State<Shared>, headers: HeaderMap, Json(req): Json<ChangePassword>) -> Reply {
    let user_id = state.authenticate(&headers)?;
    let mut account = state
        .accounts
        .get_mut(&user_id)
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Unauthorized"))?;
    if account.password != req.old_password {
        return Err(message(StatusCode::UNAUTHORIZED, "Old password is incorrect"));
    }
    account.password = req.new_password;
    Ok(message(StatusCode::OK, "Password changed successfully"))
}

async fn forget_password(State(state): State<Shared>, Json(req): Json<IdentifierQuery>) -> Reply {
    if req.identifier.trim().is_empty() {
        return Err(message(StatusCode::BAD_REQUEST, "Identifier is required"));
    }
    state
        .find_account(&req.identifier)
        .ok_or_else(|| message(StatusCode::NOT_FOUND, "User not found"))?;
    Ok(message(StatusCode::OK, "Password reset email sent successfully"))
}

fn valid_username(username: &str) -> bool {
    (3..=30).contains(&username.chars().count())
        && username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

async fn update_username(State(state): State<Shared>, headers: HeaderMap, Json(req): Json<UsernameUpdate>) -> Reply {
    let user_id = state.authenticate(&headers)?;
    if !valid_username(&req.username) {
        return Err(message(
            StatusCode::BAD_REQUEST,
            "Username must be 3-30 letters, digits or underscores",
        ));
    }
    if state
        .find_account(&req.username)
        .is_some_and(|a| a.user_id != user_id)
    {
        return Err(message(StatusCode::CONFLICT, "Username already taken"));
    }
    let mut account = state
        .accounts
        .get_mut(&user_id)
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Unauthorized"))?;
    account.username = req.username;
    Ok(ok(
        StatusCode::OK,
        json!({ "username": account.username }),
        Some("Username updated successfully"),
    ))
}

async fn captcha_site_key() -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "data": { "siteKey": CAPTCHA_SITE_KEY },
            "count": 1,
            "message": "Captcha site key retrieved successfully",
        })),
    )
        .into_response()
}

async fn logout(State(state): State<Shared>, headers: HeaderMap) -> Reply {
    state.authenticate(&headers)?;
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        state.access_tokens.remove(token);
    }
    Ok(message(StatusCode::OK, "Logged out successfully"))
}

async fn create_tweet(State(state): State<Shared>, headers: HeaderMap, Json(req): Json<NewTweet>) -> Reply {
    let user_id = state.authenticate(&headers)?;
    if req.content.trim().is_empty() {
        return Err(message(StatusCode::BAD_REQUEST, "Content is required"));
    }
    let tweet = state.insert_tweet(&user_id, req.content, None);
    Ok(ok(StatusCode::CREATED, tweet.view(), Some("Tweet created")))
}

async fn list_tweets(State(state): State<Shared>, headers: HeaderMap, Query(query): Query<PageQuery>) -> Reply {
    state.authenticate(&headers)?;
    state.page(&query, |_| true)
}

async fn list_bookmarks(State(state): State<Shared>, headers: HeaderMap, Query(query): Query<PageQuery>) -> Reply {
    let user_id = state.authenticate(&headers)?;
    state.page(&query, |t| {
        state
            .relations
            .contains(&(user_id.clone(), "bookmark".to_string(), t.tweet_id.clone()))
    })
}

async fn get_tweet(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Reply {
    state.authenticate(&headers)?;
    let tweet = state
        .tweets
        .get(&id)
        .map(|t| t.view())
        .ok_or_else(|| message(StatusCode::NOT_FOUND, "Tweet not found"))?;
    Ok(ok(StatusCode::OK, tweet, None))
}

#[derive(Debug, Deserialize)]
struct ContentPatch {
    content: String,
}

async fn edit_tweet(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ContentPatch>,
) -> Reply {
    let user_id = state.authenticate(&headers)?;
    let mut tweet = state
        .tweets
        .get_mut(&id)
        .ok_or_else(|| message(StatusCode::NOT_FOUND, "Tweet not found"))?;
    if tweet.author != user_id {
        return Err(message(StatusCode::FORBIDDEN, "Not the author"));
    }
    tweet.content = req.content;
    Ok(ok(StatusCode::OK, tweet.view(), Some("Tweet updated")))
}

async fn delete_tweet(State(state): State<Shared>, headers: HeaderMap, Path(id): Path<String>) -> Reply {
    let user_id = state.authenticate(&headers)?;
    let author = state
        .tweets
        .get(&id)
        .map(|t| t.author.clone())
        .ok_or_else(|| message(StatusCode::NOT_FOUND, "Tweet not found"))?;
    if author != user_id {
        return Err(message(StatusCode::FORBIDDEN, "Not the author"));
    }
    state.tweets.remove(&id);
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn tweet_action(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((id, action)): Path<(String, String)>,
    payload: Option<Json<NewTweet>>,
) -> Reply {
    let user_id = state.authenticate(&headers)?;
    if !state.tweets.contains_key(&id) {
        return Err(message(StatusCode::NOT_FOUND, "Tweet not found"));
    }

    let toggle = |relation: &str, status: StatusCode, done: &str| -> Reply {
        let inserted = state.relations.insert((user_id.clone(), relation.to_string(), id.clone()));
        if !inserted {
            return Err(message(StatusCode::CONFLICT, &format!("Already {done}")));
        }
        if status == StatusCode::NO_CONTENT {
            Ok(status.into_response())
        } else {
            Ok(message(status, &format!("Tweet {done}")))
        }
    };

    match action.as_str() {
        "like" => toggle("like", StatusCode::NO_CONTENT, "liked"),
        "repost" => toggle("repost", StatusCode::CREATED, "reposted"),
        "bookmark" => toggle("bookmark", StatusCode::CREATED, "bookmarked"),
        "view" => Ok(message(StatusCode::OK, "View recorded")),
        "quote" | "reply" => {
            let Some(Json(body)) = payload else {
                return Err(message(StatusCode::BAD_REQUEST, "Content is required"));
            };
            if body.content.trim().is_empty() {
                return Err(message(StatusCode::BAD_REQUEST, "Content is required"));
            }
            let kind = if action == "quote" { "quote" } else { "reply" };
            let tweet = state.insert_tweet(&user_id, body.content, Some((id.clone(), kind)));
            Ok(ok(StatusCode::CREATED, tweet.view(), Some("Tweet created")))
        }
        _ => Err(message(StatusCode::NOT_FOUND, "Unknown action")),
    }
}

async fn undo_tweet_action(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((id, action)): Path<(String, String)>,
) -> Reply {
    let user_id = state.authenticate(&headers)?;
    match action.as_str() {
        "like" | "repost" | "bookmark" => {
            match state.relations.remove(&(user_id, action.clone(), id)) {
                Some(_) => Ok(StatusCode::NO_CONTENT.into_response()),
                None => Err(message(StatusCode::NOT_FOUND, &format!("Not {action}ed"))),
            }
        }
        _ => Err(message(StatusCode::NOT_FOUND, "Unknown action")),
    }
}

async fn edit_derived(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((id, action)): Path<(String, String)>,
    Json(req): Json<ContentPatch>,
) -> Reply {
    if action != "quote" {
        return Err(message(StatusCode::NOT_FOUND, "Unknown action"));
    }
    edit_tweet(State(state), headers, Path(id), Json(req)).await
}

async fn tweet_listing(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((id, listing)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> Reply {
    state.authenticate(&headers)?;
    if !state.tweets.contains_key(&id) {
        return Err(message(StatusCode::NOT_FOUND, "Tweet not found"));
    }
    match listing.as_str() {
        "quotes" | "replies" => {
            let kind = if listing == "quotes" { "quote" } else { "reply" };
            state.page(&query, |t| {
                t.parent
                    .as_ref()
                    .is_some_and(|(parent, k)| *parent == id && *k == kind)
            })
        }
        "summary" => {
            let content = state.tweets.get(&id).map(|t| t.content.clone()).unwrap_or_default();
            let summary: String = content.chars().take(80).collect();
            Ok(ok(
                StatusCode::OK,
                json!({ "tweet_id": id, "summary": format!("Summary: {summary}") }),
                Some("Summary generated successfully"),
            ))
        }
        "likes" | "reposts" => {
            let relation = listing.trim_end_matches('s');
            let users: Vec<String> = state
                .relations
                .iter()
                .filter(|r| r.1 == relation && r.2 == id)
                .map(|r| r.0.clone())
                .collect();
            Ok(ok(StatusCode::OK, json!({ "users": users }), None))
        }
        _ => Err(message(StatusCode::NOT_FOUND, "Unknown listing")),
    }
}

async fn timeline_for_you(State(state): State<Shared>, headers: HeaderMap, Query(query): Query<PageQuery>) -> Reply {
    state.authenticate(&headers)?;
    state.page(&query, |t| t.parent.is_none())
}

async fn timeline_following(State(state): State<Shared>, headers: HeaderMap, Query(query): Query<PageQuery>) -> Reply {
    let user_id = state.authenticate(&headers)?;
    state.page(&query, |t| {
        state
            .relations
            .contains(&(user_id.clone(), "follow".to_string(), t.author.clone()))
    })
}

async fn current_user(State(state): State<Shared>, headers: HeaderMap) -> Reply {
    let user_id = state.authenticate(&headers)?;
    let view = state
        .accounts
        .get(&user_id)
        .map(|a| a.view())
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Unauthorized"))?;
    Ok(ok(StatusCode::OK, view, None))
}

async fn update_current_user(State(state): State<Shared>, headers: HeaderMap, Json(req): Json<Value>) -> Reply {
    let user_id = state.authenticate(&headers)?;
    let bio = req
        .get("bio")
        .and_then(Value::as_str)
        .ok_or_else(|| message(StatusCode::BAD_REQUEST, "bio must be a string"))?;
    let mut account = state
        .accounts
        .get_mut(&user_id)
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Unauthorized"))?;
    account.bio = Some(bio.to_string());
    Ok(ok(StatusCode::OK, account.view(), Some("Profile updated")))
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Avatar,
    Cover,
}

impl Slot {
    fn noun(self) -> &'static str {
        match self {
            Slot::Avatar => "Avatar",
            Slot::Cover => "Cover",
        }
    }

    fn field(self, account: &mut Account) -> &mut Option<String> {
        match self {
            Slot::Avatar => &mut account.avatar,
            Slot::Cover => &mut account.cover,
        }
    }
}

async fn upload(state: Shared, headers: HeaderMap, mut multipart: Multipart, slot: Slot) -> Reply {
    let user_id = state.authenticate(&headers)?;
    let mut received = 0usize;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| message(StatusCode::BAD_REQUEST, "Malformed multipart body"))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|_| message(StatusCode::BAD_REQUEST, "Malformed file part"))?;
            received = bytes.len();
        }
    }
    if received == 0 {
        return Err(message(StatusCode::BAD_REQUEST, "File is required"));
    }

    let url = format!(
        "https://cdn.loadbeat.test/{}/{}.jpg",
        slot.noun().to_lowercase(),
        Uuid::new_v4().simple()
    );
    let mut account = state
        .accounts
        .get_mut(&user_id)
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Unauthorized"))?;
    *slot.field(&mut account) = Some(url.clone());
    Ok(ok(
        StatusCode::CREATED,
        json!({ "image_url": url }),
        Some(&format!("{} uploaded successfully", slot.noun())),
    ))
}

async fn remove_media(state: Shared, headers: HeaderMap, req: MediaDelete, slot: Slot) -> Reply {
    let user_id = state.authenticate(&headers)?;
    let mut account = state
        .accounts
        .get_mut(&user_id)
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Unauthorized"))?;
    let current = slot.field(&mut account);
    if current.as_deref() != Some(req.file_url.as_str()) {
        return Err(message(StatusCode::NOT_FOUND, "File not found"));
    }
    *current = None;
    Ok(message(StatusCode::OK, &format!("{} deleted successfully", slot.noun())))
}

async fn upload_avatar(State(state): State<Shared>, headers: HeaderMap, multipart: Multipart) -> Reply {
    upload(state, headers, multipart, Slot::Avatar).await
}

async fn upload_cover(State(state): State<Shared>, headers: HeaderMap, multipart: Multipart) -> Reply {
    upload(state, headers, multipart, Slot::Cover).await
}

async fn delete_avatar(State(state): State<Shared>, headers: HeaderMap, Json(req): Json<MediaDelete>) -> Reply {
    remove_media(state, headers, req, Slot::Avatar).await
}

async fn delete_cover(State(state): State<Shared>, headers: HeaderMap, Json(req): Json<MediaDelete>) -> Reply {
    remove_media(state, headers, req, Slot::Cover).await
}

fn relation_message(action: &str) -> Option<&'static str> {
    match action {
        "follow" => Some("Followed user successfully"),
        "block" => Some("Blocked user successfully"),
        "mute" => Some("Muted user successfully"),
        "unfollow" => Some("Unfollowed user successfully"),
        "unblock" => Some("Unblocked user successfully"),
        "unmute" => Some("Unmuted user successfully"),
        _ => None,
    }
}

async fn apply_relation(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((target, action)): Path<(String, String)>,
) -> Reply {
    let user_id = state.authenticate(&headers)?;
    let text = relation_message(&action)
        .filter(|_| matches!(action.as_str(), "follow" | "block" | "mute"))
        .ok_or_else(|| message(StatusCode::NOT_FOUND, "Unknown action"))?;
    if !state.accounts.contains_key(&target) {
        return Err(message(StatusCode::NOT_FOUND, "User not found"));
    }
    if target == user_id {
        return Err(message(StatusCode::FORBIDDEN, &format!("Cannot {action} yourself")));
    }
    let inserted = state.relations.insert((user_id, action.clone(), target));
    if !inserted && action == "follow" {
        return Err(message(StatusCode::CONFLICT, "Already following"));
    }
    Ok(message(StatusCode::CREATED, text))
}

async fn lift_relation(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((target, action)): Path<(String, String)>,
) -> Reply {
    let user_id = state.authenticate(&headers)?;
    let text = relation_message(&action)
        .filter(|_| matches!(action.as_str(), "unfollow" | "unblock" | "unmute"))
        .ok_or_else(|| message(StatusCode::NOT_FOUND, "Unknown action"))?;
    if !state.accounts.contains_key(&target) {
        return Err(message(StatusCode::NOT_FOUND, "User not found"));
    }
    let relation = action.trim_start_matches("un").to_string();
    state.relations.remove(&(user_id, relation, target));
    Ok(message(StatusCode::OK, text))
}

#[derive(Debug, Default, Deserialize)]
struct IdsQuery {
    ids: Option<String>,
    usernames: Option<String>,
}

fn split_list(raw: Option<&str>) -> std::result::Result<Vec<String>, Response> {
    let items: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        return Err(message(StatusCode::BAD_REQUEST, "At least one value is required"));
    }
    Ok(items)
}

/// Batch lookup: one `{success, user}` record per requested key, 200 even
/// when nothing matches
fn lookup_records(keys: Vec<String>, find: impl Fn(&str) -> Option<Account>) -> Response {
    let records: Vec<Value> = keys
        .iter()
        .map(|key| match find(key) {
            Some(account) => json!({ "success": true, "user": account.public_view() }),
            None => json!({ "success": false, "key": key }),
        })
        .collect();
    ok(StatusCode::OK, json!(records), Some("Users retrieved"))
}

async fn users_by_id(State(state): State<Shared>, Query(query): Query<IdsQuery>) -> Reply {
    let ids = split_list(query.ids.as_deref())?;
    Ok(lookup_records(ids, |id| state.accounts.get(id).map(|a| a.value().clone())))
}

async fn users_by_username(State(state): State<Shared>, Query(query): Query<IdsQuery>) -> Reply {
    let names = split_list(query.usernames.as_deref())?;
    Ok(lookup_records(names, |name| {
        state
            .accounts
            .iter()
            .find(|a| a.username == name)
            .map(|a| a.value().clone())
    }))
}

async fn user_by_id(State(state): State<Shared>, Path(id): Path<String>) -> Reply {
    let view = state
        .accounts
        .get(&id)
        .map(|a| a.public_view())
        .ok_or_else(|| message(StatusCode::NOT_FOUND, "User not found"))?;
    Ok(ok(StatusCode::OK, view, Some("User retrieved successfully")))
}

async fn user_listing(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((id, listing_name)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> Reply {
    state.authenticate(&headers)?;
    if !state.accounts.contains_key(&id) {
        return Err(message(StatusCode::NOT_FOUND, "User not found"));
    }
    match listing_name.as_str() {
        "followers" => listing(
            &query,
            state.related_accounts(&id, "follow", true),
            "Followers retrieved successfully",
        ),
        "following" => listing(
            &query,
            state.related_accounts(&id, "follow", false),
            "Following retrieved successfully",
        ),
        "posts" => listing(
            &query,
            state.tweets_where(|t| t.author == id && !matches!(t.parent, Some((_, "reply")))),
            "Retrieved posts successfully",
        ),
        "replies" => listing(
            &query,
            state.tweets_where(|t| t.author == id && matches!(t.parent, Some((_, "reply")))),
            "Retrieved replies successfully",
        ),
        _ => Err(message(StatusCode::NOT_FOUND, "Unknown listing")),
    }
}

async fn relations_count(State(state): State<Shared>, headers: HeaderMap) -> Reply {
    let user_id = state.authenticate(&headers)?;
    Ok(ok(
        StatusCode::OK,
        json!({
            "blocked_count": state.relation_count(&user_id, "block"),
            "muted_count": state.relation_count(&user_id, "mute"),
        }),
        Some("User relations counts retrieved successfully"),
    ))
}

async fn blocked_users(State(state): State<Shared>, headers: HeaderMap, Query(query): Query<PageQuery>) -> Reply {
    let user_id = state.authenticate(&headers)?;
    listing(
        &query,
        state.related_accounts(&user_id, "block", false),
        "Blocked list retrieved successfully",
    )
}

async fn muted_users(State(state): State<Shared>, headers: HeaderMap, Query(query): Query<PageQuery>) -> Reply {
    let user_id = state.authenticate(&headers)?;
    listing(
        &query,
        state.related_accounts(&user_id, "mute", false),
        "Muted list retrieved successfully",
    )
}

async fn liked_posts(State(state): State<Shared>, headers: HeaderMap, Query(query): Query<PageQuery>) -> Reply {
    let user_id = state.authenticate(&headers)?;
    let liked = state.tweets_where(|t| {
        state
            .relations
            .contains(&(user_id.clone(), "like".to_string(), t.tweet_id.clone()))
    });
    listing(&query, liked, "Retrieved like posts successfully")
}

async fn username_recommendations(State(state): State<Shared>, headers: HeaderMap) -> Reply {
    let user_id = state.authenticate(&headers)?;
    let base = state
        .accounts
        .get(&user_id)
        .map(|a| a.username.clone())
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Unauthorized"))?;
    let recommendations: Vec<String> = (1..=5)
        .map(|n| format!("{base}_{n}"))
        .filter(|candidate| state.find_account(candidate).is_none())
        .collect();
    Ok(ok(
        StatusCode::OK,
        json!({ "recommendations": recommendations }),
        Some("Username recommendations retrieved successfully"),
    ))
}

async fn assign_interests(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(req): Json<AssignInterests>,
) -> Reply {
    let user_id = state.authenticate(&headers)?;
    if req.category_ids.is_empty() {
        return Err(message(StatusCode::BAD_REQUEST, "category_ids must not be empty"));
    }
    let mut account = state
        .accounts
        .get_mut(&user_id)
        .ok_or_else(|| message(StatusCode::UNAUTHORIZED, "Unauthorized"))?;
    account.interests = req.category_ids;
    Ok(message(StatusCode::CREATED, "Interests assigned successfully"))
}

async fn chat_messages(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path(chat_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Reply {
    let user_id = state.authenticate(&headers)?;
    let chat = state
        .chats
        .get(&chat_id)
        .map(|c| c.value().clone())
        .ok_or_else(|| message(StatusCode::NOT_FOUND, "Chat not found"))?;
    if !chat.participants.contains(&user_id) {
        return Err(message(StatusCode::FORBIDDEN, "Not a participant of this chat"));
    }
    let (page, next_cursor) = query.slice(chat.messages.into_iter().rev().collect())?;
    Ok(ok(
        StatusCode::OK,
        json!({ "messages": page, "pagination": { "next_cursor": next_cursor } }),
        Some("Messages retrieved successfully"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "a=1; refresh_token=xyz; b=2".parse().unwrap());
        assert_eq!(cookie_value(&headers, "refresh_token").as_deref(), Some("xyz"));
        assert!(cookie_value(&headers, "missing").is_none());
    }

    #[test]
    fn test_page_rejects_oversized_limit() {
        let state = MockState::default();
        let query = PageQuery {
            limit: Some(MAX_PAGE_SIZE + 1),
            cursor: None,
            page_offset: None,
            page_size: None,
        };
        let response = state.page(&query, |_| true).unwrap_err();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_page_cursor() {
        let state = MockState::default();
        for i in 0..5 {
            state.insert_tweet("u", format!("tweet {i}"), None);
        }
        let first = state
            .page(&PageQuery { limit: Some(2), cursor: None, page_offset: None, page_size: None }, |_| true)
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let last = state
            .page(&PageQuery { limit: Some(2), cursor: Some("4".to_string()), page_offset: None, page_size: None }, |_| true)
            .unwrap();
        assert_eq!(last.status(), StatusCode::OK);
    }

    #[test]
    fn test_backend_seeds_two_accounts() {
        let backend = MockBackend::new("load@example.com", "pw");
        assert_eq!(backend.stats().accounts, 2);
        assert!(!backend.target_user_id().is_empty());
        assert!(backend.state.chats.contains_key(backend.target_chat_id()));
    }

    #[test]
    fn test_page_offset_paging() {
        let items: Vec<Value> = (0..10).map(|i| json!(i)).collect();
        let query = PageQuery {
            page_offset: Some(2),
            page_size: Some(4),
            ..PageQuery::default()
        };
        let (page, next) = query.slice(items).unwrap();
        assert_eq!(page, vec![json!(4), json!(5), json!(6), json!(7)]);
        assert_eq!(next.as_deref(), Some("8"));
    }

    #[test]
    fn test_username_rules() {
        assert!(valid_username("user_ab12"));
        assert!(!valid_username("ab"));
        assert!(!valid_username("has space"));
        assert!(!valid_username(&"x".repeat(31)));
    }

    #[test]
    fn test_related_accounts_direction() {
        let backend = MockBackend::new("load@example.com", "pw");
        let state = &backend.state;
        let me = state.find_account("load@example.com").unwrap().user_id;
        let target = backend.target_user_id().to_string();
        state.relations.insert((me.clone(), "follow".to_string(), target.clone()));

        assert_eq!(state.related_accounts(&me, "follow", false).len(), 1);
        assert!(state.related_accounts(&me, "follow", true).is_empty());
        assert_eq!(state.related_accounts(&target, "follow", true).len(), 1);
    }
}
