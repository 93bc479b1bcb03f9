//! Chat history reads against `targets.chat_id`.

use async_trait::async_trait;
use loadbeat_core::{HttpExchange, Journey, RequestSpec, SetupData, Threshold, VuContext};
use tracing::debug;

use crate::api::{paths, ChatPage, Envelope};
use crate::auth;

const STATUSES: [u16; 3] = [200, 403, 404];

fn chat_page(exchange: &HttpExchange) -> Option<ChatPage> {
    exchange.decode::<Envelope<ChatPage>>().ok().map(|e| e.data)
}

/// Message history with default, custom-limit and cursor pagination. A
/// chat the account cannot see (403) or that is gone (404) is expected.
pub struct ChatMessages;

impl ChatMessages {
    async fn read(ctx: &mut VuContext, url: String, label: &str) -> HttpExchange {
        let res = auth::send(ctx, RequestSpec::get(url).expect_codes(&STATUSES).tag(label.to_string())).await;
        let page = chat_page(&res);
        ctx.check(&res)
            .that(&format!("{label}: status 200, 403, or 404"), |r| r.status_in(&STATUSES))
            .that(&format!("{label}: has data when 200"), |r| !r.status_is(200) || page.is_some());
        if let Some(status) = res.status {
            ctx.metrics().add_counter(&format!("status_{status}"), 1);
        }
        res
    }
}

#[async_trait]
impl Journey for ChatMessages {
    type Shared = ();

    fn name(&self) -> &'static str {
        "chat-messages"
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

        let Some(chat_id) = ctx.config().targets.chat_id.clone().filter(|id| !id.is_empty()) else {
            debug!(vu = ctx.id, "No target chat configured, skipping chat messages");
            return Ok(());
        };
        let url = paths::chat_messages(&chat_id);

        let first = Self::read(ctx, url.clone(), "default messages").await;
        ctx.think(1.0, 2.0).await;

        let limit = ctx.rng.int(10, 50)?;
        Self::read(ctx, format!("{url}?limit={limit}"), "custom limit").await;
        ctx.think(1.0, 2.0).await;

        let cursor = chat_page(&first).and_then(|page| page.pagination.next_cursor);
        if let Some(cursor) = cursor {
            Self::read(ctx, format!("{url}?cursor={cursor}&limit=20"), "cursor pagination").await;
            ctx.think(1.0, 2.0).await;
        }
        Ok(())
    }
}
