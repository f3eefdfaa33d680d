use async_trait::async_trait;
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};
use tracing::{error, info, warn};

use super::{MediaResolver, ResolvedStream};
use crate::error::PlaybackError;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Salida de `yt-dlp -j` (solo los campos que nos interesan).
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    http_headers: HashMap<String, String>,
}

/// Resolutor basado en el subproceso yt-dlp, con salida JSON.
pub struct YtDlpResolver {
    socket_timeout_secs: u64,
}

impl YtDlpResolver {
    pub fn new(socket_timeout_secs: u64) -> Self {
        Self {
            socket_timeout_secs,
        }
    }

    /// Verifica que yt-dlp esté instalado y pueda ejecutarse.
    pub async fn verify_dependencies() -> anyhow::Result<()> {
        let output = tokio::process::Command::new("yt-dlp")
            .arg("--version")
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                let version = String::from_utf8_lossy(&out.stdout);
                info!("✅ yt-dlp versión: {}", version.trim());
                Ok(())
            }
            _ => {
                error!("❌ yt-dlp no encontrado. Instala con: pip install -U yt-dlp");
                anyhow::bail!("yt-dlp no disponible")
            }
        }
    }

    async fn extract(&self, url: &str) -> Result<ResolvedStream, PlaybackError> {
        let output = tokio::process::Command::new("yt-dlp")
            .args([
                "-j",
                "--no-playlist",
                "--quiet",
                "--no-warnings",
                "--format",
                "bestaudio/best",
                "--socket-timeout",
                &self.socket_timeout_secs.to_string(),
                "--user-agent",
                USER_AGENT,
            ])
            .arg(url)
            .output()
            .await
            .map_err(|e| PlaybackError::ResolutionFailed(format!("no pude lanzar yt-dlp: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlaybackError::ResolutionFailed(format!(
                "yt-dlp terminó con error: {}",
                stderr.trim()
            )));
        }

        let info: YtDlpInfo = serde_json::from_slice(&output.stdout)
            .map_err(|e| PlaybackError::ResolutionFailed(format!("JSON inválido de yt-dlp: {e}")))?;

        let stream_url = info
            .url
            .ok_or_else(|| PlaybackError::ResolutionFailed("sin URL de audio en la respuesta".into()))?;

        Ok(ResolvedStream {
            title: info.title.unwrap_or_else(|| "Unknown".to_string()),
            stream_url,
            duration: info.duration.map(|s| Duration::from_secs_f64(s.max(0.0))),
            headers: info.http_headers.into_iter().collect(),
        })
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new(30)
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, url: &str) -> Result<ResolvedStream, PlaybackError> {
        info!("🔍 Resolviendo stream para: {}", url);
        match self.extract(url).await {
            Ok(stream) => {
                info!("✅ Resuelto: {}", stream.title);
                Ok(stream)
            }
            Err(e) => {
                warn!("❌ Resolución falló para {}: {}", url, e);
                Err(e)
            }
        }
    }
}
