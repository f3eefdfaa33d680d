//! Embeds y formato de cara al usuario.

pub mod embeds;
