//! Vigilante periódico de las sesiones de voz.
//!
//! Cada barrido aplica dos reglas por guild:
//! - con trabajo pendiente y sin conexión, reconecta (con throttle
//!   para no martillear al gateway);
//! - sin trabajo y con conexión, corta la sesión cuando el periodo
//!   ocioso supera la gracia configurada.

use serenity::model::id::GuildId;
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::{
    audio::{engine::PlaybackEngine, queue::QueueRegistry},
    voice::supervisor::ConnectionSupervisor,
};

#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    pub period: Duration,
    /// Mínimo entre intentos de reconexión automática por guild.
    pub reconnect_throttle: Duration,
    /// Ocio tolerado antes de abandonar el canal.
    pub idle_grace: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(30),
            reconnect_throttle: Duration::from_secs(90),
            idle_grace: Duration::from_secs(120),
        }
    }
}

pub struct IdleWatchdog {
    supervisor: Arc<ConnectionSupervisor>,
    queues: Arc<QueueRegistry>,
    engine: Arc<PlaybackEngine>,
    config: WatchdogConfig,
}

impl IdleWatchdog {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        queues: Arc<QueueRegistry>,
        engine: Arc<PlaybackEngine>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            supervisor,
            queues,
            engine,
            config,
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        info!(
            "🐕 Watchdog de voz activo (cada {}, gracia de {})",
            humantime::format_duration(self.config.period),
            humantime::format_duration(self.config.idle_grace)
        );
        tokio::spawn(async move {
            let mut ticker = interval(self.config.period);
            // El primer tick es inmediato y no aporta nada.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// Un barrido completo sobre todos los guilds conocidos.
    pub async fn sweep(&self) {
        let mut guilds: BTreeSet<GuildId> = self.supervisor.guild_ids().into_iter().collect();
        guilds.extend(self.queues.guild_ids());

        for guild_id in guilds {
            let has_work = self.engine.now_playing(guild_id).is_some()
                || self
                    .queues
                    .get(guild_id)
                    .is_some_and(|q| !q.is_empty());

            if has_work {
                self.revive_if_needed(guild_id).await;
            } else {
                self.reap_if_idle(guild_id).await;
            }
        }
    }

    /// Regla A: hay trabajo pendiente pero la sesión se cayó.
    async fn revive_if_needed(&self, guild_id: GuildId) {
        if self.supervisor.is_connected(guild_id).await {
            return;
        }
        if self
            .supervisor
            .reconnect_throttled(guild_id, self.config.reconnect_throttle)
        {
            debug!("⏳ Reconexión en guild {} aplazada por throttle", guild_id);
            return;
        }

        warn!("🔌 Sesión caída con cola pendiente en guild {}, reconectando", guild_id);
        match self.supervisor.ensure_connected(guild_id, None).await {
            Ok(_) => {
                // Si nada suena, el avance quedó huérfano: se lo empuja.
                if self.engine.now_playing(guild_id).is_none() {
                    if let Err(e) = self.engine.advance(guild_id).await {
                        warn!("⚠️ El avance tras reconectar falló en guild {}: {}", guild_id, e);
                    }
                }
            }
            Err(e) => {
                warn!("❌ Reconexión automática fallida en guild {}: {}", guild_id, e);
            }
        }
    }

    /// Regla B: sin trabajo, desconecta al agotar la gracia de ocio.
    async fn reap_if_idle(&self, guild_id: GuildId) {
        if !self.supervisor.is_connected(guild_id).await {
            return;
        }
        match self.supervisor.idle_for(guild_id) {
            Some(idle) if idle > self.config.idle_grace => {
                info!(
                    "😴 Guild {} ocioso durante {}, abandonando el canal",
                    guild_id,
                    humantime::format_duration(Duration::from_secs(idle.as_secs()))
                );
                self.supervisor.disconnect(guild_id).await;
            }
            Some(_) => {}
            None => {
                // Nadie marcó el ocio (p. ej. bot de un stop externo):
                // se empieza a contar desde ahora.
                self.supervisor.mark_idle(guild_id);
            }
        }
    }
}
