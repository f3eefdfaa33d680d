//! Implementación del bot de Discord: registro de comandos, eventos
//! del gateway y el cableado entre Serenity y el core de voz.

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
    builder::CreateMessage,
    http::Http,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{
        engine::{EngineEvent, PlaybackEngine},
        queue::QueueRegistry,
    },
    config::Config,
    sources::YtDlpResolver,
    ui::embeds,
    voice::{
        gateway::SongbirdGateway,
        handshake::HandshakeRetryPolicy,
        supervisor::ConnectionSupervisor,
        watchdog::{IdleWatchdog, WatchdogConfig},
    },
};

/// Handler principal del bot. Arma el core (gateway, supervisor,
/// motor, watchdog) y lo conecta a los eventos de Serenity.
pub struct BlessingBot {
    config: Arc<Config>,
    gateway: Arc<SongbirdGateway>,
    pub supervisor: Arc<ConnectionSupervisor>,
    pub queues: Arc<QueueRegistry>,
    pub engine: Arc<PlaybackEngine>,
    /// Receptor de eventos del motor, consumido una sola vez en ready.
    engine_events: parking_lot::Mutex<Option<flume::Receiver<EngineEvent>>>,
    /// Último canal de texto por guild, para los anuncios del motor.
    command_channels: Arc<DashMap<GuildId, ChannelId>>,
}

impl BlessingBot {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        let gateway = Arc::new(SongbirdGateway::new(config.default_volume));
        let handshake = HandshakeRetryPolicy::new(config.connect_timeout(), config.self_deaf);
        let supervisor = Arc::new(ConnectionSupervisor::new(gateway.clone(), handshake));
        let queues = Arc::new(QueueRegistry::new(config.max_queue_size));
        let resolver = Arc::new(YtDlpResolver::new(config.ytdlp_socket_timeout_secs));
        let (engine, events_rx) =
            PlaybackEngine::new(supervisor.clone(), queues.clone(), resolver);

        Self {
            config,
            gateway,
            supervisor,
            queues,
            engine,
            engine_events: parking_lot::Mutex::new(Some(events_rx)),
            command_channels: Arc::new(DashMap::new()),
        }
    }

    pub fn note_command_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.command_channels.insert(guild_id, channel_id);
    }

    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::from(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                commands::register_guild_commands(ctx, guild_id).await?;
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await?;
            }
        }

        Ok(())
    }

    /// Consume los eventos del motor y los anuncia en el último canal
    /// de texto que usó cada guild.
    fn spawn_event_announcer(&self, http: Arc<Http>) {
        let Some(events) = self.engine_events.lock().take() else {
            // ready puede dispararse más de una vez tras un resume.
            return;
        };
        let channels = self.command_channels.clone();

        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                let (guild_id, message) = match &event {
                    EngineEvent::Started { guild_id, track } => (
                        *guild_id,
                        CreateMessage::new().embed(embeds::create_now_playing_embed(track)),
                    ),
                    EngineEvent::Skipped {
                        guild_id,
                        track,
                        reason,
                    } => (
                        *guild_id,
                        CreateMessage::new()
                            .embed(embeds::create_skipped_embed(track.title(), reason)),
                    ),
                    EngineEvent::ConnectFailed { guild_id, error } => (
                        *guild_id,
                        CreateMessage::new().embed(embeds::create_error_embed(error.user_message())),
                    ),
                    EngineEvent::QueueFinished { guild_id } => {
                        debug!("🏁 Cola terminada en guild {}", guild_id);
                        continue;
                    }
                };

                let Some(channel) = channels.get(&guild_id).map(|c| *c) else {
                    continue;
                };
                if let Err(e) = channel.send_message(&http, message).await {
                    warn!("No se pudo anunciar el evento en guild {}: {}", guild_id, e);
                }
            }
        });
    }

    fn spawn_watchdog(&self) {
        let watchdog = Arc::new(IdleWatchdog::new(
            self.supervisor.clone(),
            self.queues.clone(),
            self.engine.clone(),
            WatchdogConfig {
                period: self.config.watchdog_period(),
                reconnect_throttle: self.config.reconnect_throttle(),
                idle_grace: self.config.idle_grace(),
            },
        ));
        watchdog.spawn();
    }
}

#[async_trait]
impl EventHandler for BlessingBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        match songbird::get(&ctx).await {
            Some(manager) => self.gateway.set_manager(manager),
            None => {
                error!("❌ Songbird no inicializado, el bot no puede reproducir audio");
                return;
            }
        }

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        self.spawn_event_announcer(ctx.http.clone());
        self.spawn_watchdog();
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Si a nosotros nos echan del canal (kick, ban del canal, etc.) la
    /// sesión guardada queda zombi: hay que olvidarla para que el
    /// siguiente comando o el watchdog reconecten limpio.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        if old.is_some() && new.channel_id.is_none() {
            if let Some(guild_id) = new.guild_id {
                info!("🔌 Bot desconectado externamente en guild {}", guild_id);
                self.supervisor.forget_session(guild_id).await;
                self.engine.forget_playback(guild_id);
            }
        }
    }
}
