mod config;
mod segments;
mod stacks;

use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use tracing::{debug, info};

use crate::chat::{normalize_events, Message, RawChatEvent};
use crate::state::Context;

/// Discord caps a single history request at this many messages.
const PAGE_SIZE: u8 = 100;
pub const MAX_HISTORY: usize = 500;

/// Weave - untangle channel history into topics
#[poise::command(
    slash_command,
    subcommands("stacks::stacks", "segments::segments", "config::config")
)]
pub async fn weave(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}

/// Read up to `limit` recent messages of the invoking channel, oldest first.
/// Bot messages are skipped; replies are resolved to their thread roots.
async fn fetch_history(ctx: &Context<'_>, limit: usize) -> Result<Vec<Message>, anyhow::Error> {
    let channel = ctx.channel_id();
    let conversation_name = channel
        .name(ctx.serenity_context())
        .await
        .unwrap_or_else(|_| channel.to_string());

    let mut events = Vec::new();
    let mut before: Option<serenity::MessageId> = None;
    let mut fetched = 0;

    while fetched < limit {
        let page = PAGE_SIZE.min((limit - fetched).min(u8::MAX as usize) as u8);
        let mut request = serenity::GetMessages::new().limit(page);
        if let Some(id) = before {
            request = request.before(id);
        }
        let batch = channel.messages(ctx.serenity_context(), request).await?;
        if batch.is_empty() {
            break;
        }
        fetched += batch.len();
        // Discord returns newest first
        before = batch.last().map(|m| m.id);
        let short_page = batch.len() < page as usize;

        for m in batch.into_iter().filter(|m| !m.author.bot) {
            let Some(timestamp) = message_time(&m.timestamp) else {
                continue;
            };
            events.push(RawChatEvent {
                id: m.id.to_string(),
                timestamp,
                author: m.author.name.clone(),
                content: m.content.clone(),
                conversation_id: channel.to_string(),
                conversation_name: conversation_name.clone(),
                reply_to: m
                    .message_reference
                    .as_ref()
                    .and_then(|r| r.message_id)
                    .map(|id| id.to_string()),
            });
        }
        if short_page {
            break;
        }
    }

    debug!(fetched, kept = events.len(), "channel history read");
    let messages = normalize_events(events);
    info!(channel = %channel, messages = messages.len(), "history normalized");
    Ok(messages)
}

/// Keeps sub-second precision; the unit windows are compared in milliseconds.
fn message_time(timestamp: &serenity::Timestamp) -> Option<DateTime<Utc>> {
    timestamp
        .to_string()
        .parse::<DateTime<Utc>>()
        .ok()
        .or_else(|| DateTime::from_timestamp(timestamp.unix_timestamp(), 0))
}

/// Send text in ≤2000-char chunks via `ctx.say()` so follow-ups go through the
/// interaction webhook.
async fn send_chunked(ctx: &Context<'_>, output: &str) -> Result<(), anyhow::Error> {
    if output.len() <= 2000 {
        ctx.say(output).await?;
        return Ok(());
    }
    let mut remaining = output;
    while !remaining.is_empty() {
        let mut end = remaining.len().min(1990);
        while !remaining.is_char_boundary(end) {
            end -= 1;
        }
        let split_at = if end < remaining.len() {
            remaining[..end]
                .rfind('\n')
                .map(|i| i + 1)
                .unwrap_or(end)
        } else {
            end
        };
        ctx.say(&remaining[..split_at]).await?;
        remaining = &remaining[split_at..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;

    use super::*;

    #[test]
    fn test_message_time_keeps_milliseconds() {
        let timestamp = serenity::Timestamp::parse("2024-03-01T09:00:59.750Z").unwrap();
        let time = message_time(&timestamp).unwrap();
        assert_eq!(time.second(), 59);
        assert_eq!(time.timestamp_subsec_millis(), 750);
    }
}
