use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::{
    error::ConnectError,
    voice::gateway::{VoiceGateway, VoiceSession},
};

/// Intentos de la fase de negociación de sesión, con sus esperas fijas.
/// La negociación es barata de reintentar rápido; de ahí la tabla corta.
const SESSION_ATTEMPTS: usize = 5;
const SESSION_DELAYS: [Duration; SESSION_ATTEMPTS - 1] = [
    Duration::from_millis(500),
    Duration::from_millis(1000),
    Duration::from_millis(2000),
    Duration::from_millis(3000),
];

/// Intentos del handshake del plano de datos. Cada intento quema una
/// ventana completa de timeout, así que el backoff crece geométrico
/// para no acumular latencias patológicas.
const DATA_PLANE_ATTEMPTS: u32 = 4;
const DATA_PLANE_BASE_DELAY: Duration = Duration::from_millis(500);
const DATA_PLANE_BACKOFF_FACTOR: f64 = 1.5;

/// Política de reintentos del handshake de voz, en dos fases anidadas.
///
/// Envuelve al [`VoiceGateway`] por composición para sobrevivir al
/// cierre 4006 que aparece sobre todo en hosts ARM, y por tanto se
/// puede testear con un gateway falso.
///
/// - Fase interna (negociación de sesión): hasta 5 intentos, esperas
///   fijas `[0.5, 1, 2, 3]`s, solo ante la clase transitoria 4006.
/// - Fase externa (plano de datos): hasta 4 intentos, backoff
///   `0.5 * 1.5^n`, ante timeout o transitorios que agotaron la fase
///   interna.
pub struct HandshakeRetryPolicy {
    connect_timeout: Duration,
    self_deaf: bool,
}

impl HandshakeRetryPolicy {
    pub fn new(connect_timeout: Duration, self_deaf: bool) -> Self {
        Self {
            connect_timeout,
            self_deaf,
        }
    }

    /// Establece una sesión de voz nueva. O la conexión completa con
    /// éxito o toda la llamada falla con el error final clasificado;
    /// no hay éxitos parciales.
    pub async fn connect(
        &self,
        gateway: &dyn VoiceGateway,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSession>, ConnectError> {
        let mut last_error = ConnectError::Timeout;

        for attempt in 0..DATA_PLANE_ATTEMPTS {
            match self.negotiate_session(gateway, guild_id, channel_id).await {
                Ok(session) => {
                    if attempt > 0 {
                        info!(
                            "✅ Handshake de voz recuperado en el intento {} (guild {})",
                            attempt + 1,
                            guild_id
                        );
                    }
                    return Ok(session);
                }
                Err(e @ (ConnectError::Timeout | ConnectError::HandshakeTransient)) => {
                    last_error = e;
                    if attempt + 1 < DATA_PLANE_ATTEMPTS {
                        let delay = DATA_PLANE_BASE_DELAY
                            .mul_f64(DATA_PLANE_BACKOFF_FACTOR.powi(attempt as i32));
                        warn!(
                            "⏰ Handshake del plano de datos falló ({}), reintento {}/{} en {:?}",
                            last_error,
                            attempt + 2,
                            DATA_PLANE_ATTEMPTS,
                            delay
                        );
                        sleep(delay).await;
                    }
                }
                // Permisos, canal lleno y fallos fatales no se reintentan.
                Err(e) => return Err(e),
            }
        }

        warn!(
            "❌ Handshake de voz agotó {} intentos en guild {}: {}",
            DATA_PLANE_ATTEMPTS, guild_id, last_error
        );
        // La clase transitoria vive solo dentro de la política; hacia
        // fuera un presupuesto agotado es un timeout.
        Err(match last_error {
            ConnectError::HandshakeTransient => ConnectError::Timeout,
            other => other,
        })
    }

    /// Fase interna: negociación de sesión. Solo el fallo de clase
    /// 4006 se reintenta aquí; el timeout sube a la fase externa, que
    /// tiene su propio presupuesto.
    async fn negotiate_session(
        &self,
        gateway: &dyn VoiceGateway,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSession>, ConnectError> {
        for attempt in 0..SESSION_ATTEMPTS {
            debug!(
                "Negociación de sesión de voz, intento {}/{} (timeout {:?})",
                attempt + 1,
                SESSION_ATTEMPTS,
                self.connect_timeout
            );

            let result = timeout(
                self.connect_timeout,
                gateway.connect(guild_id, channel_id, self.self_deaf),
            )
            .await;

            match result {
                Err(_) => return Err(ConnectError::Timeout),
                Ok(Ok(session)) => return Ok(session),
                Ok(Err(ConnectError::HandshakeTransient)) => {
                    if attempt + 1 < SESSION_ATTEMPTS {
                        let delay = SESSION_DELAYS[attempt];
                        warn!(
                            "🔁 Negociación rechazada (4006), reintento {}/{} en {:?}",
                            attempt + 2,
                            SESSION_ATTEMPTS,
                            delay
                        );
                        sleep(delay).await;
                    }
                }
                Ok(Err(e)) => return Err(e),
            }
        }

        Err(ConnectError::HandshakeTransient)
    }
}
