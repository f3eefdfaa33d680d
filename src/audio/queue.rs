use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{GuildId, UserId};
use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info};

use crate::sources::ResolvedStream;

/// Duración asumida para tracks cuyo stream todavía no se resolvió.
const DEFAULT_TRACK_DURATION: Duration = Duration::from_secs(180);

/// Un track encolado. Inmutable una vez creado: al resolver el stream
/// se construye una copia enriquecida con [`Track::with_resolved`], el
/// original nunca se muta en sitio.
#[derive(Debug, Clone)]
pub struct Track {
    pub source_url: String,
    /// None hasta que el resolver entrega el título real.
    pub display_title: Option<String>,
    /// Descriptor de stream, rellenado en el dequeue (no en el enqueue)
    /// para que los enlaces caducados se re-resuelvan frescos.
    pub resolved: Option<ResolvedStream>,
    pub estimated_duration: Option<Duration>,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(source_url: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            source_url: source_url.into(),
            display_title: None,
            resolved: None,
            estimated_duration: None,
            requested_by,
            added_at: Utc::now(),
        }
    }

    /// Copia del track con el descriptor de stream y metadatos definitivos.
    pub fn with_resolved(&self, stream: ResolvedStream) -> Self {
        Self {
            source_url: self.source_url.clone(),
            display_title: Some(stream.title.clone()),
            estimated_duration: stream.duration.or(self.estimated_duration),
            resolved: Some(stream),
            requested_by: self.requested_by,
            added_at: self.added_at,
        }
    }

    /// Título para mostrar: el resuelto, o la URL mientras tanto.
    pub fn title(&self) -> &str {
        self.display_title.as_deref().unwrap_or(&self.source_url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Added,
    /// La URL ya está en la cola: no se agregó.
    Duplicate,
    /// La cola llegó a su tamaño máximo.
    Full,
}

#[derive(Debug, Default)]
struct QueueInner {
    items: VecDeque<Track>,
    /// Espejo de `items` por URL para detectar duplicados en O(1).
    /// Invariante: siempre igual al conjunto de URLs presentes en
    /// `items`; ambos se mutan bajo el mismo lock, nunca por separado.
    urls: HashSet<String>,
}

/// Cola de tracks por servidor: secuencia FIFO más set de URLs para
/// rechazo de duplicados. Lock propio, separado del lock de voz del
/// guild — mutar la cola no requiere conexión viva.
#[derive(Debug)]
pub struct TrackQueue {
    inner: Mutex<QueueInner>,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            max_size,
        }
    }

    pub fn enqueue(&self, track: Track) -> EnqueueOutcome {
        let mut q = self.inner.lock();
        if q.urls.contains(&track.source_url) {
            debug!("🔁 Duplicado rechazado: {}", track.source_url);
            return EnqueueOutcome::Duplicate;
        }
        if q.items.len() >= self.max_size {
            return EnqueueOutcome::Full;
        }
        info!("➕ Agregado a la cola: {}", track.title());
        q.urls.insert(track.source_url.clone());
        q.items.push_back(track);
        EnqueueOutcome::Added
    }

    /// Saca el primer track. La URL sale del set en la misma sección
    /// crítica: el track nunca es visible como "encolado" y "sonando"
    /// a la vez.
    pub fn dequeue_front(&self) -> Option<Track> {
        let mut q = self.inner.lock();
        let track = q.items.pop_front()?;
        q.urls.remove(&track.source_url);
        Some(track)
    }

    /// Devuelve un track al frente (p. ej. cuando la conexión falló y
    /// no queremos perderlo).
    pub fn requeue_front(&self, track: Track) {
        let mut q = self.inner.lock();
        q.urls.insert(track.source_url.clone());
        q.items.push_front(track);
    }

    pub fn peek_all(&self) -> Vec<Track> {
        self.inner.lock().items.iter().cloned().collect()
    }

    pub fn clear(&self) -> usize {
        let mut q = self.inner.lock();
        let cleared = q.items.len();
        q.items.clear();
        q.urls.clear();
        if cleared > 0 {
            info!("🗑️ Cola limpiada: {} tracks removidos", cleared);
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Suma de duraciones estimadas, con 180s por defecto para tracks
    /// aún sin resolver.
    pub fn estimated_remaining(&self) -> Duration {
        self.inner
            .lock()
            .items
            .iter()
            .map(|t| t.estimated_duration.unwrap_or(DEFAULT_TRACK_DURATION))
            .sum()
    }
}

/// Registro de colas por guild, creado perezosamente.
pub struct QueueRegistry {
    queues: DashMap<GuildId, Arc<TrackQueue>>,
    max_size: usize,
}

impl QueueRegistry {
    pub fn new(max_size: usize) -> Self {
        Self {
            queues: DashMap::new(),
            max_size,
        }
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<TrackQueue> {
        self.queues
            .entry(guild_id)
            .or_insert_with(|| Arc::new(TrackQueue::new(self.max_size)))
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<TrackQueue>> {
        self.queues.get(&guild_id).map(|q| q.clone())
    }

    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.queues.iter().map(|e| *e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(url: &str) -> Track {
        Track::new(url.to_string(), UserId::new(1))
    }

    #[test]
    fn rejects_duplicate_urls_while_queued() {
        let queue = TrackQueue::new(100);
        assert_eq!(queue.enqueue(track("https://yt.example/a")), EnqueueOutcome::Added);
        // la segunda llegada de la misma URL no se agrega
        assert_eq!(
            queue.enqueue(track("https://yt.example/a")),
            EnqueueOutcome::Duplicate
        );
        assert_eq!(queue.len(), 1);

        // tras el dequeue la URL vuelve a ser aceptable
        let popped = queue.dequeue_front().unwrap();
        assert_eq!(popped.source_url, "https://yt.example/a");
        assert_eq!(queue.enqueue(track("https://yt.example/a")), EnqueueOutcome::Added);
    }

    #[test]
    fn url_set_tracks_queue_contents_through_clear_and_requeue() {
        let queue = TrackQueue::new(100);
        queue.enqueue(track("https://yt.example/a"));
        queue.enqueue(track("https://yt.example/b"));

        let a = queue.dequeue_front().unwrap();
        queue.requeue_front(a);
        // de vuelta al frente, y de vuelta en el set de duplicados
        assert_eq!(
            queue.enqueue(track("https://yt.example/a")),
            EnqueueOutcome::Duplicate
        );
        assert_eq!(queue.peek_all()[0].source_url, "https://yt.example/a");

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.enqueue(track("https://yt.example/b")), EnqueueOutcome::Added);
    }

    #[test]
    fn respects_max_size() {
        let queue = TrackQueue::new(2);
        queue.enqueue(track("https://yt.example/a"));
        queue.enqueue(track("https://yt.example/b"));
        assert_eq!(queue.enqueue(track("https://yt.example/c")), EnqueueOutcome::Full);
    }

    #[test]
    fn estimates_remaining_duration_with_default() {
        let queue = TrackQueue::new(100);
        let mut known = track("https://yt.example/a");
        known.estimated_duration = Some(Duration::from_secs(200));
        queue.enqueue(known);
        queue.enqueue(track("https://yt.example/b")); // sin duración -> 180s

        assert_eq!(queue.estimated_remaining(), Duration::from_secs(380));
    }

    #[test]
    fn resolved_copy_keeps_original_immutable() {
        let original = track("https://yt.example/a");
        let stream = ResolvedStream {
            title: "Canción".into(),
            stream_url: "https://cdn.example/a.webm".into(),
            duration: Some(Duration::from_secs(90)),
            headers: vec![],
        };
        let played = original.with_resolved(stream);

        assert_eq!(original.display_title, None);
        assert_eq!(played.title(), "Canción");
        assert_eq!(played.estimated_duration, Some(Duration::from_secs(90)));
        assert_eq!(played.source_url, original.source_url);
    }
}
