use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
        permissions::Permissions,
    },
    prelude::Context,
};
use tracing::info;

use crate::{
    audio::engine::RequestOutcome,
    bot::BlessingBot,
    error::ConnectError,
    ui::embeds,
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &BlessingBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // Los anuncios del motor van al último canal de texto usado.
    bot.note_command_channel(guild_id, command.channel_id);

    match command.data.name.as_str() {
        "play" => handle_play(ctx, command, bot, guild_id).await?,
        "pause" => {
            let outcome = bot.engine.handle_pause(guild_id).await;
            respond_with_outcome(ctx, &command, bot, guild_id, outcome).await?;
        }
        "resume" => {
            let outcome = bot.engine.handle_resume(guild_id).await;
            respond_with_outcome(ctx, &command, bot, guild_id, outcome).await?;
        }
        "skip" => {
            let outcome = bot.engine.handle_skip(guild_id).await;
            respond_with_outcome(ctx, &command, bot, guild_id, outcome).await?;
        }
        "stop" => {
            let outcome = bot.engine.handle_stop(guild_id).await;
            respond_with_outcome(ctx, &command, bot, guild_id, outcome).await?;
        }
        "leave" => {
            let outcome = bot.engine.handle_leave(guild_id).await;
            respond_with_outcome(ctx, &command, bot, guild_id, outcome).await?;
        }
        "queue" => handle_queue(ctx, command, bot, guild_id).await?,
        "nowplaying" => handle_nowplaying(ctx, command, bot, guild_id).await?,
        _ => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .content("❌ Comando no reconocido")
                            .ephemeral(true),
                    ),
                )
                .await?;
        }
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: CommandInteraction,
    bot: &BlessingBot,
    guild_id: GuildId,
) -> Result<()> {
    let url = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "url")
        .and_then(|opt| opt.value.as_str())
        .ok_or_else(|| anyhow::anyhow!("URL no proporcionada"))?
        .to_string();

    // Defer: resolver y conectar pueden tardar varios segundos.
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let outcome = match prepare_voice_target(ctx, guild_id, command.user.id) {
        Ok(voice_channel) => {
            bot.engine
                .handle_enqueue(guild_id, voice_channel, &url, command.user.id)
                .await
        }
        Err(e) => RequestOutcome::Rejected(e.user_message().to_string()),
    };

    let response = outcome_response(bot, guild_id, outcome);
    command.edit_response(&ctx.http, response).await?;
    Ok(())
}

async fn handle_queue(
    ctx: &Context,
    command: CommandInteraction,
    bot: &BlessingBot,
    guild_id: GuildId,
) -> Result<()> {
    let now_playing = bot.engine.now_playing(guild_id);
    let queued = bot
        .queues
        .get(guild_id)
        .map(|q| q.peek_all())
        .unwrap_or_default();

    let embed = embeds::create_queue_embed(now_playing.as_ref(), &queued);
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().embed(embed),
            ),
        )
        .await?;
    Ok(())
}

async fn handle_nowplaying(
    ctx: &Context,
    command: CommandInteraction,
    bot: &BlessingBot,
    guild_id: GuildId,
) -> Result<()> {
    let message = match bot.engine.now_playing(guild_id) {
        Some(track) => {
            CreateInteractionResponseMessage::new().embed(embeds::create_now_playing_embed(&track))
        }
        None => CreateInteractionResponseMessage::new()
            .embed(embeds::create_error_embed("🤷 No hay nada sonando"))
            .ephemeral(true),
    };

    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await?;
    Ok(())
}

/// Canal de voz del usuario, con los chequeos de cache previos al
/// handshake: permisos del bot y cupo del canal. Fallar acá es barato;
/// fallar en el handshake cuesta reintentos.
fn prepare_voice_target(
    ctx: &Context,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<ChannelId, ConnectError> {
    let guild = match guild_id.to_guild_cached(&ctx.cache) {
        Some(guild) => guild,
        None => return Err(ConnectError::Unknown("guild fuera de caché".to_string())),
    };

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or(ConnectError::NoKnownChannel)?;

    let bot_id = ctx.cache.current_user().id;
    let Some(channel) = guild.channels.get(&channel_id) else {
        return Ok(channel_id);
    };

    if let Some(member) = guild.members.get(&bot_id) {
        let permissions = guild.user_permissions_in(channel, member);
        if !permissions.contains(Permissions::CONNECT | Permissions::SPEAK) {
            return Err(ConnectError::PermissionDenied);
        }

        // El cupo no aplica si el bot puede mover miembros.
        if channel.user_limit.unwrap_or(0) > 0
            && !permissions.contains(Permissions::MOVE_MEMBERS)
        {
            let occupied = channel.members(&ctx.cache).map(|m| m.len()).unwrap_or(0);
            let already_inside = guild
                .voice_states
                .get(&bot_id)
                .and_then(|vs| vs.channel_id)
                == Some(channel_id);
            if !already_inside && occupied as u32 >= channel.user_limit.unwrap_or(0) {
                return Err(ConnectError::ChannelFull);
            }
        }
    }

    Ok(channel_id)
}

fn outcome_response(
    bot: &BlessingBot,
    guild_id: GuildId,
    outcome: RequestOutcome,
) -> EditInteractionResponse {
    match outcome {
        RequestOutcome::Started { .. } => match bot.engine.now_playing(guild_id) {
            Some(track) => {
                EditInteractionResponse::new().embed(embeds::create_now_playing_embed(&track))
            }
            None => EditInteractionResponse::new()
                .embed(embeds::create_notice_embed("▶️ Reproducción iniciada")),
        },
        RequestOutcome::Queued {
            position,
            title,
            eta,
        } => EditInteractionResponse::new()
            .embed(embeds::create_track_queued_embed(&title, position, eta)),
        RequestOutcome::Accepted(message) => {
            EditInteractionResponse::new().embed(embeds::create_notice_embed(&message))
        }
        RequestOutcome::Rejected(message) => {
            EditInteractionResponse::new().embed(embeds::create_error_embed(&message))
        }
    }
}

/// Versión para respuestas directas (sin defer).
async fn respond_with_outcome(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &BlessingBot,
    guild_id: GuildId,
    outcome: RequestOutcome,
) -> Result<()> {
    let message = match outcome {
        RequestOutcome::Started { .. } => match bot.engine.now_playing(guild_id) {
            Some(track) => CreateInteractionResponseMessage::new()
                .embed(embeds::create_now_playing_embed(&track)),
            None => CreateInteractionResponseMessage::new()
                .embed(embeds::create_notice_embed("▶️ Reproducción iniciada")),
        },
        RequestOutcome::Queued {
            position,
            title,
            eta,
        } => CreateInteractionResponseMessage::new()
            .embed(embeds::create_track_queued_embed(&title, position, eta)),
        RequestOutcome::Accepted(message) => CreateInteractionResponseMessage::new()
            .embed(embeds::create_notice_embed(&message)),
        RequestOutcome::Rejected(message) => CreateInteractionResponseMessage::new()
            .embed(embeds::create_error_embed(&message))
            .ephemeral(true),
    };

    command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await?;
    Ok(())
}
