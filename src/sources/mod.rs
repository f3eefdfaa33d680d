pub mod ytdlp;

use async_trait::async_trait;
use std::time::Duration;

pub use ytdlp::YtDlpResolver;

use crate::error::PlaybackError;

/// Descriptor de stream reproducible: URL directa más las cabeceras de
/// transporte que exige el CDN (sin ellas el proceso de audio recibe 403).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub title: String,
    pub stream_url: String,
    pub duration: Option<Duration>,
    pub headers: Vec<(String, String)>,
}

/// Resolutor de metadatos/URLs de medios. Colaborador externo: el core
/// lo trata como caja negra `resolve(url) -> stream reproducible`.
///
/// Se llama en el dequeue, no en el enqueue, para que los enlaces
/// caducados se resuelvan frescos justo antes de reproducir.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<ResolvedStream, PlaybackError>;
}
