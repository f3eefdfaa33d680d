use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{HttpRequest, Input},
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    error::{ConnectError, PlaybackError},
    sources::ResolvedStream,
};

/// Señal de fin de reproducción: un único mensaje por sesión de stream,
/// `None` para fin normal (o stop explícito) y `Some(err)` para fallo.
pub type PlaybackDone = flume::Receiver<Option<String>>;

/// Sesión de voz viva para un guild. El handle pertenece en exclusiva
/// al supervisor; el motor de reproducción solo lo toma prestado
/// durante una llamada a `play`.
#[async_trait]
pub trait VoiceSession: Send + Sync + std::fmt::Debug {
    async fn is_connected(&self) -> bool;

    async fn channel_id(&self) -> Option<ChannelId>;

    /// Arranca el proceso de transcodificación con el stream resuelto y
    /// devuelve el receptor de la señal de fin.
    async fn play(&self, stream: &ResolvedStream) -> Result<PlaybackDone, PlaybackError>;

    /// Dispara el mismo camino de fin que un final natural.
    async fn stop(&self);

    async fn pause(&self);

    async fn resume(&self);
}

/// Capa de protocolo de voz en tiempo real, especificada solo en su
/// frontera. La política de reintentos envuelve exactamente estas
/// llamadas; nada más del crate toca songbird directamente.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        self_deaf: bool,
    ) -> Result<Arc<dyn VoiceSession>, ConnectError>;

    /// Mueve la sesión existente del guild a otro canal.
    async fn move_to(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSession>, ConnectError>;

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), ConnectError>;
}

// ---------------------------------------------------------------------------
// Implementación songbird
// ---------------------------------------------------------------------------

/// Gateway de producción sobre el manager de Songbird. El manager solo
/// existe a partir del evento `ready`, de ahí el `OnceLock`.
pub struct SongbirdGateway {
    manager: OnceLock<Arc<Songbird>>,
    default_volume: f32,
}

impl SongbirdGateway {
    pub fn new(default_volume: f32) -> Self {
        Self {
            manager: OnceLock::new(),
            default_volume,
        }
    }

    pub fn set_manager(&self, manager: Arc<Songbird>) {
        if self.manager.set(manager).is_err() {
            debug!("Manager de Songbird ya estaba inicializado");
        }
    }

    fn manager(&self) -> Result<&Arc<Songbird>, ConnectError> {
        self.manager
            .get()
            .ok_or_else(|| ConnectError::Unknown("Songbird no inicializado".into()))
    }

    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        self_deaf: bool,
    ) -> Result<Arc<dyn VoiceSession>, ConnectError> {
        let manager = self.manager()?;

        let call = manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| classify_join_error(&e.to_string()))?;

        if self_deaf {
            // Best-effort: un deafen fallido no invalida la sesión.
            let mut handler = call.lock().await;
            if let Err(e) = handler.deafen(true).await {
                warn!("No se pudo activar self-deaf: {:?}", e);
            }
        }

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
        Ok(Arc::new(SongbirdSession {
            call,
            current: Mutex::new(None),
            default_volume: self.default_volume,
        }))
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        self_deaf: bool,
    ) -> Result<Arc<dyn VoiceSession>, ConnectError> {
        self.join(guild_id, channel_id, self_deaf).await
    }

    async fn move_to(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSession>, ConnectError> {
        // Songbird mueve el Call existente al volver a hacer join sobre
        // el mismo guild.
        self.join(guild_id, channel_id, false).await
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), ConnectError> {
        let manager = self.manager()?;
        manager
            .remove(guild_id)
            .await
            .map_err(|e| ConnectError::Unknown(e.to_string()))?;
        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }
}

/// Clasifica el error de join por su mensaje. El cierre 4006 (sesión
/// de voz inválida) es el único que merece reintento de sesión.
fn classify_join_error(msg: &str) -> ConnectError {
    let lower = msg.to_lowercase();
    if lower.contains("4006") || (lower.contains("session") && lower.contains("invalid")) {
        ConnectError::HandshakeTransient
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ConnectError::Timeout
    } else if lower.contains("permission") || lower.contains("forbidden") {
        ConnectError::PermissionDenied
    } else {
        ConnectError::HandshakeFatal(msg.to_string())
    }
}

struct SongbirdSession {
    call: Arc<Mutex<Call>>,
    /// Track sonando ahora mismo; como mucho uno por sesión.
    current: Mutex<Option<TrackHandle>>,
    default_volume: f32,
}

impl std::fmt::Debug for SongbirdSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SongbirdSession")
            .field("default_volume", &self.default_volume)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl VoiceSession for SongbirdSession {
    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_channel().is_some()
    }

    async fn channel_id(&self) -> Option<ChannelId> {
        self.call
            .lock()
            .await
            .current_channel()
            .map(|ch| ChannelId::from(ch.0))
    }

    async fn play(&self, stream: &ResolvedStream) -> Result<PlaybackDone, PlaybackError> {
        // Las cabeceras del resolver viajan en el cliente HTTP; sin
        // ellas YouTube y similares devuelven 403.
        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in &stream.headers {
            let parsed = name
                .parse::<reqwest::header::HeaderName>()
                .ok()
                .zip(value.parse::<reqwest::header::HeaderValue>().ok());
            if let Some((name, value)) = parsed {
                headers.insert(name, value);
            }
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| PlaybackError::SubprocessFailed(e.to_string()))?;

        let input = Input::from(HttpRequest::new(client, stream.stream_url.clone()));

        let handle = {
            let mut handler = self.call.lock().await;
            handler.play_input(input)
        };
        let _ = handle.set_volume(self.default_volume);

        let (tx, rx) = flume::bounded(1);
        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackDoneNotifier {
                    tx: tx.clone(),
                    failed: false,
                },
            )
            .map_err(|e| PlaybackError::SubprocessFailed(format!("event handler: {e}")))?;
        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackDoneNotifier { tx, failed: true },
            )
            .map_err(|e| PlaybackError::SubprocessFailed(format!("event handler: {e}")))?;

        *self.current.lock().await = Some(handle);
        Ok(rx)
    }

    async fn stop(&self) {
        if let Some(handle) = self.current.lock().await.take() {
            let _ = handle.stop();
        }
    }

    async fn pause(&self) {
        if let Some(handle) = self.current.lock().await.as_ref() {
            let _ = handle.pause();
        }
    }

    async fn resume(&self) {
        if let Some(handle) = self.current.lock().await.as_ref() {
            let _ = handle.play();
        }
    }
}

/// Notifica el fin del track por el canal de completado. El canal tiene
/// capacidad 1: si End y Error disparan ambos, solo cuenta el primero.
struct TrackDoneNotifier {
    tx: flume::Sender<Option<String>>,
    failed: bool,
}

#[async_trait]
impl VoiceEventHandler for TrackDoneNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if self.failed {
            if let EventContext::Track(track_list) = ctx {
                for (state, _handle) in *track_list {
                    error!("❌ Track terminó con error: {:?}", state.playing);
                }
            }
        }
        let payload = self
            .failed
            .then(|| "el proceso de audio terminó con error".to_string());
        let _ = self.tx.try_send(payload);
        None
    }
}
