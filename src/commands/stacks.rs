use tracing::info;

use super::{fetch_history, send_chunked, MAX_HISTORY};
use crate::chat::types::truncate_chars;
use crate::cluster::build_stacks;
use crate::state::Context;

/// Group recent channel history into topic stacks
#[poise::command(slash_command, guild_only)]
pub async fn stacks(
    ctx: Context<'_>,
    #[description = "Messages to read (max 500)"] limit: Option<u32>,
) -> Result<(), anyhow::Error> {
    let limit = (limit.unwrap_or(200) as usize).clamp(1, MAX_HISTORY);
    ctx.defer().await?;

    let messages = fetch_history(&ctx, limit).await?;
    if messages.is_empty() {
        ctx.say("No messages to weave in this channel.").await?;
        return Ok(());
    }

    let config = ctx.data().config.read().await.clone();
    info!(user = ctx.author().name, messages = messages.len(), "stack run started");
    let report = build_stacks(ctx.data().llm.as_ref(), &messages, &config).await;
    info!(
        stacks = report.stacks.len(),
        oracle_calls = report.oracle_calls,
        failures = report.failures.len(),
        "stack run complete"
    );

    let mut output = format!(
        "**{} messages → {} units → {} validated → {} stacks**\n\n",
        messages.len(),
        report.units.len(),
        report.validated.len(),
        report.stacks.len()
    );
    for stack in &report.stacks {
        output.push_str(&format!(
            "**{}** ({} messages, {})\n> {}\n",
            stack.title,
            stack.messages.len(),
            stack.participants().join(", "),
            truncate_chars(&stack.summary, 300)
        ));
    }
    if !report.failures.is_empty() {
        output.push_str(&format!(
            "\n_{} oracle call(s) failed; affected items kept their fallback placement._\n",
            report.failures.len()
        ));
    }

    send_chunked(&ctx, &output).await
}
