use serenity::{
    builder::{CreateEmbed, CreateEmbedFooter},
    model::Timestamp,
};
use std::time::Duration;

use crate::audio::queue::Track;

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
}

const STANDARD_FOOTER: &str = "🎵 Blessing Bot";

/// Embed de la canción que está sonando ahora mismo.
pub fn create_now_playing_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.title()))
        .color(colors::SUCCESS_GREEN);

    if let Some(duration) = track.estimated_duration {
        embed = embed.field("⏱️ Duración", format_duration(duration), true);
    } else {
        embed = embed.field("⏱️ Duración", "🔴 En vivo", true);
    }

    embed
        .field("👤 Solicitado por", format!("<@{}>", track.requested_by), true)
        .url(&track.source_url)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Embed de confirmación cuando un track queda en cola.
pub fn create_track_queued_embed(title: &str, position: usize, eta: Duration) -> CreateEmbed {
    CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(format!("**{title}** se ha agregado a la cola"))
        .color(colors::SUCCESS_GREEN)
        .field("📋 Posición", position.to_string(), true)
        .field("⏳ Espera estimada", format_duration(eta), true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(
            "🎵 Se reproducirá automáticamente cuando llegue su turno",
        ))
}

/// Embed con el contenido de la cola, el track actual arriba.
pub fn create_queue_embed(now_playing: Option<&Track>, queue: &[Track]) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::MUSIC_PURPLE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER));

    match now_playing {
        Some(track) => {
            embed = embed.field(
                "🎵 Sonando ahora",
                format!("**{}** (<@{}>)", track.title(), track.requested_by),
                false,
            );
        }
        None => {
            embed = embed.field("🎵 Sonando ahora", "Nada por el momento", false);
        }
    }

    if queue.is_empty() {
        return embed.description("La cola está vacía. Usa `/play` para agregar algo.");
    }

    // Solo los primeros 10 para no desbordar el embed.
    let lines: Vec<String> = queue
        .iter()
        .take(10)
        .enumerate()
        .map(|(i, track)| {
            let duration = track
                .estimated_duration
                .map(format_duration)
                .unwrap_or_else(|| "~".to_string());
            format!("`{}.` **{}** · {}", i + 1, track.title(), duration)
        })
        .collect();

    let mut description = lines.join("\n");
    if queue.len() > 10 {
        description.push_str(&format!("\n... y {} más", queue.len() - 10));
    }

    embed
        .description(description)
        .field("📊 Total", format!("{} tracks", queue.len()), true)
}

/// Embed rojo para errores de cara al usuario.
pub fn create_error_embed(message: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(message)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Embed informativo genérico (skip, stop, pause...).
pub fn create_notice_embed(message: &str) -> CreateEmbed {
    CreateEmbed::default()
        .description(message)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
}

/// Embed de aviso cuando un track se salta por irreproducible.
pub fn create_skipped_embed(title: &str, reason: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("⏭️ Track Saltado")
        .description(format!("**{title}** no se pudo reproducir: {reason}"))
        .color(colors::WARNING_ORANGE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Formatea duraciones como mm:ss o hh:mm:ss.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
