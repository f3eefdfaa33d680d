use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Audio
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub self_deaf: bool,

    // Conexión de voz
    pub connect_timeout_secs: u64,
    pub extended_connect_timeout_secs: u64,

    // Watchdog
    pub watchdog_period_secs: u64,
    pub reconnect_throttle_secs: u64,
    pub idle_grace_secs: u64,

    // yt-dlp
    pub ytdlp_socket_timeout_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Audio
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()?,
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            self_deaf: std::env::var("SELF_DEAF")
                .unwrap_or_else(|_| "true".to_string())
                .parse()?,

            // Conexión de voz
            connect_timeout_secs: std::env::var("CONNECT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            extended_connect_timeout_secs: std::env::var("EXTENDED_CONNECT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,

            // Watchdog
            watchdog_period_secs: std::env::var("WATCHDOG_PERIOD_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            reconnect_throttle_secs: std::env::var("RECONNECT_THROTTLE_SECS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()?,
            idle_grace_secs: std::env::var("IDLE_GRACE_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()?,

            // yt-dlp
            ytdlp_socket_timeout_secs: std::env::var("YTDLP_SOCKET_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_volume < 0.0 || self.default_volume > 2.0 {
            anyhow::bail!(
                "Default volume must be between 0.0 and 2.0, got: {}",
                self.default_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.connect_timeout_secs == 0 {
            anyhow::bail!("Connect timeout must be greater than 0");
        }

        if self.watchdog_period_secs == 0 {
            anyhow::bail!("Watchdog period must be greater than 0");
        }

        if self.idle_grace_secs < self.watchdog_period_secs {
            anyhow::bail!(
                "Idle grace ({}s) shorter than a watchdog sweep ({}s): the bot would never idle out cleanly",
                self.idle_grace_secs,
                self.watchdog_period_secs
            );
        }

        Ok(())
    }

    /// Timeout efectivo de handshake. En ARM (Raspberry y similares)
    /// el negociado de voz tarda bastante más, así que se usa el
    /// timeout extendido.
    pub fn connect_timeout(&self) -> Duration {
        if cfg!(any(target_arch = "arm", target_arch = "aarch64")) {
            Duration::from_secs(self.extended_connect_timeout_secs)
        } else {
            Duration::from_secs(self.connect_timeout_secs)
        }
    }

    pub fn watchdog_period(&self) -> Duration {
        Duration::from_secs(self.watchdog_period_secs)
    }

    pub fn reconnect_throttle(&self) -> Duration {
        Duration::from_secs(self.reconnect_throttle_secs)
    }

    pub fn idle_grace(&self) -> Duration {
        Duration::from_secs(self.idle_grace_secs)
    }

    /// Resumen sin secretos, para el log de arranque.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Audio: {}% vol, cola de {} tracks\n  \
            Voz: handshake {:?}, watchdog cada {}s, gracia de {}s\n  \
            Throttle de reconexión: {}s",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0) as u32,
            self.max_queue_size,
            self.connect_timeout(),
            self.watchdog_period_secs,
            self.idle_grace_secs,
            self.reconnect_throttle_secs,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin defaults, siempre vienen del entorno)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            default_volume: 0.5,
            max_queue_size: 100,
            self_deaf: true,

            connect_timeout_secs: 10,
            extended_connect_timeout_secs: 30,

            watchdog_period_secs: 30,
            reconnect_throttle_secs: 90,
            idle_grace_secs: 120,

            ytdlp_socket_timeout_secs: 30,
        }
    }
}
