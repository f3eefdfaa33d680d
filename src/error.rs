use thiserror::Error;

/// Errores clasificados del ciclo de conexión de voz.
///
/// La clasificación decide la política de reintentos: solo la clase
/// `HandshakeTransient` (el fallo de negociación 4006 que reaparece en
/// hosts ARM) se reintenta dentro de [`crate::voice::handshake`]; el
/// resto se propaga tal cual al supervisor y de ahí a los comandos.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("faltan permisos de Connect/Speak en el canal de voz")]
    PermissionDenied,

    #[error("el canal de voz está lleno")]
    ChannelFull,

    #[error("negociación de sesión de voz rechazada (clase 4006)")]
    HandshakeTransient,

    #[error("fallo de conexión de voz: {0}")]
    HandshakeFatal(String),

    #[error("el handshake de voz nunca completó (timeout)")]
    Timeout,

    #[error("la sesión conectó pero nunca se estabilizó")]
    Unstable,

    #[error("no hay canal de voz conocido para este servidor")]
    NoKnownChannel,

    #[error("error de voz: {0}")]
    Unknown(String),
}

impl ConnectError {
    /// Errores que nunca se reintentan: reportarlos al usuario de inmediato.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::ChannelFull)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::HandshakeTransient)
    }

    /// Mensaje legible para el canal de texto, sin detalles internos.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "❗ No puedo conectarme: faltan permisos de **Connect**/**Speak**.",
            Self::ChannelFull => "❗ No puedo conectarme: el canal está lleno (límite de usuarios).",
            Self::Timeout | Self::HandshakeTransient => {
                "⚠️ La conexión de voz expiró (problema de handshake). Inténtalo de nuevo en un momento."
            }
            Self::Unstable => "⚠️ La conexión de voz no se estabilizó. Inténtalo de nuevo.",
            Self::NoKnownChannel => {
                "❗ No conozco el canal de voz destino (usa `/play` estando en un canal primero)."
            }
            Self::HandshakeFatal(_) | Self::Unknown(_) => {
                "❗ No pude conectarme al canal de voz. Inténtalo de nuevo."
            }
        }
    }
}

/// Errores a nivel de track: se reintentan un presupuesto pequeño y
/// luego la canción se salta sin tirar la cola ni la conexión.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("no se pudo resolver el stream: {0}")]
    ResolutionFailed(String),

    #[error("el proceso de audio falló: {0}")]
    SubprocessFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classes_are_not_retryable() {
        assert!(ConnectError::PermissionDenied.is_fatal());
        assert!(ConnectError::ChannelFull.is_fatal());
        assert!(!ConnectError::HandshakeTransient.is_fatal());
        assert!(!ConnectError::Timeout.is_fatal());
    }

    #[test]
    fn only_negotiation_mismatch_is_transient() {
        assert!(ConnectError::HandshakeTransient.is_transient());
        assert!(!ConnectError::Timeout.is_transient());
        assert!(!ConnectError::HandshakeFatal("x".into()).is_transient());
    }
}
