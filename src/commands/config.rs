use tracing::info;

use crate::state::Context;

/// Configure weaving parameters (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn config(
    ctx: Context<'_>,
    #[description = "strategy | staleness_minutes | max_segments | prefer_previous | batch_size | batch_overlap | call_delay_ms"]
    param: Option<String>,
    #[description = "New value"] value: Option<String>,
) -> Result<(), anyhow::Error> {
    let user_id = ctx.author().id.get();
    if !ctx.data().is_admin(user_id) {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }

    match (param.as_deref(), value.as_deref()) {
        // Show current config
        (None, _) => {
            let config = ctx.data().config.read().await;
            ctx.say(format!("**Weave Configuration:**\n{}", config.describe()))
                .await?;
        }
        // Set a parameter
        (Some(key), Some(val)) => {
            let mut config = ctx.data().config.write().await;
            match config.set(key, val) {
                Ok(()) => {
                    info!(user = ctx.author().name, key, val, "config updated");
                    ctx.say(format!("`{}` set to {}", key, val)).await?;
                }
                Err(e) => {
                    ctx.say(format!("Could not set `{}`: {}", key, e)).await?;
                }
            }
        }
        (Some(_), None) => {
            ctx.say("Provide both `param` and `value`. Example: `/weave config strategy hybrid`")
                .await?;
        }
    }

    Ok(())
}
