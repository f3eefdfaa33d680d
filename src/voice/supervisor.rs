//! Supervisor de conexiones de voz por guild.
//!
//! Mantiene una sola sesión viva por guild y serializa todos los
//! cambios de conexión bajo un lock por guild, para que dos comandos
//! simultáneos nunca disparen dos handshakes en paralelo.

use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::{
    error::ConnectError,
    voice::{
        gateway::{VoiceGateway, VoiceSession},
        handshake::HandshakeRetryPolicy,
    },
};

/// Presupuesto para mover la sesión a otro canal antes de rendirse
/// y reconectar desde cero.
const MOVE_TIMEOUT: Duration = Duration::from_secs(8);
/// Desconexiones best-effort durante la limpieza.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(3);
/// Sondeo de estabilización tras el handshake, calcado del arranque
/// lento de la Raspberry: espera progresiva hasta que el socket queda
/// realmente utilizable.
const STABILIZE_TRIES: u32 = 15;
const STABILIZE_DELAY: Duration = Duration::from_millis(300);

#[derive(Default)]
struct GuildVoiceState {
    /// Slot de sesión. El lock se retiene durante TODO ensure_connected.
    slot: tokio::sync::Mutex<Option<Arc<dyn VoiceSession>>>,
    last_channel: Mutex<Option<ChannelId>>,
    last_reconnect_attempt: Mutex<Option<Instant>>,
    idle_since: Mutex<Option<Instant>>,
}

pub struct ConnectionSupervisor {
    gateway: Arc<dyn VoiceGateway>,
    handshake: HandshakeRetryPolicy,
    guilds: DashMap<GuildId, Arc<GuildVoiceState>>,
}

impl ConnectionSupervisor {
    pub fn new(gateway: Arc<dyn VoiceGateway>, handshake: HandshakeRetryPolicy) -> Self {
        Self {
            gateway,
            handshake,
            guilds: DashMap::new(),
        }
    }

    fn guild(&self, guild_id: GuildId) -> Arc<GuildVoiceState> {
        self.guilds.entry(guild_id).or_default().clone()
    }

    /// Garantiza una sesión de voz sana en `target` (o en el último
    /// canal conocido si no se pide ninguno). Idempotente: si ya hay
    /// sesión viva en el canal correcto la devuelve sin tocar nada.
    pub async fn ensure_connected(
        &self,
        guild_id: GuildId,
        target: Option<ChannelId>,
    ) -> Result<Arc<dyn VoiceSession>, ConnectError> {
        let state = self.guild(guild_id);
        let mut slot = state.slot.lock().await;

        if let Some(session) = slot.clone() {
            if session.is_connected().await {
                match target {
                    None => return Ok(session),
                    Some(channel) if session.channel_id().await == Some(channel) => {
                        return Ok(session);
                    }
                    Some(channel) => {
                        debug!("🚚 Moviendo sesión de voz en guild {} al canal {}", guild_id, channel);
                        match timeout(MOVE_TIMEOUT, self.gateway.move_to(guild_id, channel)).await {
                            Ok(Ok(moved)) => {
                                if self.wait_until_stable(moved.as_ref()).await {
                                    *slot = Some(moved.clone());
                                    *state.last_channel.lock() = Some(channel);
                                    return Ok(moved);
                                }
                                warn!("⚠️ El move en guild {} no estabilizó, reconectando", guild_id);
                            }
                            Ok(Err(e)) => {
                                warn!("⚠️ Move fallido en guild {}: {}", guild_id, e);
                            }
                            Err(_) => {
                                warn!("⚠️ Move agotó sus {:?} en guild {}", MOVE_TIMEOUT, guild_id);
                            }
                        }
                        let _ = timeout(CLEANUP_TIMEOUT, self.gateway.disconnect(guild_id)).await;
                        *slot = None;
                    }
                }
            } else {
                debug!("🧟 Sesión muerta en guild {}, limpiando antes de reconectar", guild_id);
                let _ = timeout(CLEANUP_TIMEOUT, self.gateway.disconnect(guild_id)).await;
                *slot = None;
            }
        }

        let channel = match target.or(*state.last_channel.lock()) {
            Some(channel) => channel,
            None => return Err(ConnectError::NoKnownChannel),
        };

        // Se anota el intento ANTES de conectar: un fallo también debe
        // contar para el throttle del watchdog.
        *state.last_reconnect_attempt.lock() = Some(Instant::now());

        let session = self
            .handshake
            .connect(self.gateway.as_ref(), guild_id, channel)
            .await?;

        if !self.wait_until_stable(session.as_ref()).await {
            warn!("⚠️ La sesión en guild {} nunca estabilizó tras el handshake", guild_id);
            let _ = timeout(CLEANUP_TIMEOUT, self.gateway.disconnect(guild_id)).await;
            return Err(ConnectError::Unstable);
        }

        info!("✅ Sesión de voz lista en guild {} (canal {})", guild_id, channel);
        *slot = Some(session.clone());
        *state.last_channel.lock() = Some(channel);
        Ok(session)
    }

    /// Espera progresiva a que la sesión reporte conectada. Las tres
    /// primeras vueltas crecen linealmente y después se fija en 3x.
    async fn wait_until_stable(&self, session: &dyn VoiceSession) -> bool {
        for round in 0..STABILIZE_TRIES {
            if session.is_connected().await {
                // Margen corto para que el socket UDP termine de abrirse.
                sleep(Duration::from_millis(100)).await;
                return true;
            }
            let wait = if round < 3 {
                STABILIZE_DELAY * (round + 1)
            } else {
                STABILIZE_DELAY * 3
            };
            sleep(wait).await;
        }
        false
    }

    pub async fn current_session(&self, guild_id: GuildId) -> Option<Arc<dyn VoiceSession>> {
        let state = self.guilds.get(&guild_id)?.clone();
        let slot = state.slot.lock().await;
        slot.clone()
    }

    pub async fn is_connected(&self, guild_id: GuildId) -> bool {
        match self.current_session(guild_id).await {
            Some(session) => session.is_connected().await,
            None => false,
        }
    }

    /// Corta la sesión y olvida el estado de reproducción asociado.
    pub async fn disconnect(&self, guild_id: GuildId) {
        let state = self.guild(guild_id);
        let mut slot = state.slot.lock().await;
        if let Some(session) = slot.take() {
            session.stop().await;
        }
        *state.idle_since.lock() = None;
        let _ = timeout(CLEANUP_TIMEOUT, self.gateway.disconnect(guild_id)).await;
        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
    }

    /// Olvida la sesión sin tocar el gateway. Para cuando Discord ya
    /// nos echó del canal y el socket no existe.
    pub async fn forget_session(&self, guild_id: GuildId) {
        let state = self.guild(guild_id);
        let mut slot = state.slot.lock().await;
        if slot.take().is_some() {
            debug!("🗑️ Sesión olvidada en guild {} tras desconexión externa", guild_id);
        }
        *state.idle_since.lock() = None;
    }

    /// Recuerda el canal del autor del último comando, usado como
    /// destino por defecto en reconexiones automáticas.
    pub fn remember_channel(&self, guild_id: GuildId, channel_id: ChannelId) {
        *self.guild(guild_id).last_channel.lock() = Some(channel_id);
    }

    pub fn last_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.guilds.get(&guild_id).and_then(|s| *s.last_channel.lock())
    }

    /// Marca el inicio del periodo ocioso, si no estaba marcado ya.
    pub fn mark_idle(&self, guild_id: GuildId) {
        let state = self.guild(guild_id);
        let mut idle = state.idle_since.lock();
        if idle.is_none() {
            *idle = Some(Instant::now());
        }
    }

    pub fn mark_streaming(&self, guild_id: GuildId) {
        *self.guild(guild_id).idle_since.lock() = None;
    }

    pub fn idle_for(&self, guild_id: GuildId) -> Option<Duration> {
        let state = self.guilds.get(&guild_id)?.clone();
        let since = (*state.idle_since.lock())?;
        Some(since.elapsed())
    }

    /// true si el último intento de reconexión es demasiado reciente.
    pub fn reconnect_throttled(&self, guild_id: GuildId, throttle: Duration) -> bool {
        let Some(state) = self.guilds.get(&guild_id).map(|s| s.clone()) else {
            return false;
        };
        let last = *state.last_reconnect_attempt.lock();
        matches!(last, Some(at) if at.elapsed() < throttle)
    }

    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.guilds.iter().map(|entry| *entry.key()).collect()
    }
}
