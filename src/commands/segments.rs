use std::collections::BTreeMap;

use tracing::info;

use super::{fetch_history, send_chunked, MAX_HISTORY};
use crate::chat::types::truncate_chars;
use crate::config::Strategy;
use crate::export::segment_document;
use crate::segment::segment_messages;
use crate::state::Context;

/// Follow the parallel topics of recent channel history
#[poise::command(slash_command, guild_only)]
pub async fn segments(
    ctx: Context<'_>,
    #[description = "segment-centric | previous-centric | hybrid | single-prompt"]
    strategy: Option<String>,
    #[description = "Messages to read (max 500)"] limit: Option<u32>,
) -> Result<(), anyhow::Error> {
    let mut config = ctx.data().config.read().await.clone();
    if let Some(name) = strategy.as_deref() {
        match name.parse::<Strategy>() {
            Ok(parsed) => config.segments.strategy = parsed,
            Err(e) => {
                ctx.say(format!("{}", e)).await?;
                return Ok(());
            }
        }
    }
    let limit = (limit.unwrap_or(100) as usize).clamp(1, MAX_HISTORY);
    ctx.defer().await?;

    let messages = fetch_history(&ctx, limit).await?;
    if messages.is_empty() {
        ctx.say("No messages to weave in this channel.").await?;
        return Ok(());
    }

    info!(
        user = ctx.author().name,
        messages = messages.len(),
        strategy = %config.segments.strategy,
        "segment run started"
    );
    let report = segment_messages(ctx.data().llm.as_ref(), &messages, &config).await;
    let document = segment_document(
        &report.conversations,
        config.segments.staleness_threshold_minutes,
    );

    let mut output = format!(
        "**{} messages → {} segments** (strategy `{}`, {} oracle calls)\n\n",
        messages.len(),
        document.segments.len(),
        config.segments.strategy,
        report.oracle_calls
    );
    let mut roles: BTreeMap<&str, usize> = BTreeMap::new();
    for annotation in report.conversations.iter().flat_map(|c| c.annotations()) {
        *roles.entry(annotation.role.as_str()).or_default() += 1;
    }
    let counts: Vec<String> = roles.iter().map(|(r, n)| format!("{} {}", r, n)).collect();
    output.push_str(&format!("Roles: {}\n\n", counts.join(", ")));

    for segment in &document.segments {
        output.push_str(&format!(
            "**{}** [{:?}] {} messages, {}\n> {}\n",
            segment.label,
            segment.status,
            segment.messages.len(),
            segment.participants.join(", "),
            truncate_chars(&segment.summary, 200)
        ));
    }
    if !report.failures.is_empty() {
        output.push_str(&format!(
            "\n_{} message(s) could not be classified and opened their own segment._\n",
            report.failures.len()
        ));
    }

    send_chunked(&ctx, &output).await
}
