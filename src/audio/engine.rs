//! Motor de reproducción por guild.
//!
//! Consume la cola en orden, resuelve cada enlace justo antes de
//! sonar y encadena el siguiente track cuando el actual termina.
//! Todo el avance de un guild pasa por un lock propio, así dos
//! señales de fin simultáneas no pueden robarse tracks entre sí.

use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    audio::queue::{EnqueueOutcome, QueueRegistry, Track},
    error::{ConnectError, PlaybackError},
    sources::MediaResolver,
    voice::{gateway::PlaybackDone, supervisor::ConnectionSupervisor},
};

/// Intentos de resolver y de arrancar un mismo track antes de saltarlo.
const TRACK_ATTEMPTS: u32 = 2;
const TRACK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Estado observable del motor para un guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Connecting,
    Streaming,
    Advancing,
}

/// Eventos que el motor publica hacia la capa de UI.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started { guild_id: GuildId, track: Track },
    Skipped { guild_id: GuildId, track: Track, reason: String },
    QueueFinished { guild_id: GuildId },
    ConnectFailed { guild_id: GuildId, error: ConnectError },
}

/// Respuesta de los handlers de comandos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// El track empezó a sonar de inmediato.
    Started { title: String },
    /// Quedó en cola, con su posición y la espera estimada.
    Queued {
        position: usize,
        title: String,
        eta: Duration,
    },
    /// La orden se ejecutó (skip, stop, pause...).
    Accepted(String),
    Rejected(String),
}

#[derive(Debug)]
pub enum AdvanceOutcome {
    Started(Track),
    QueueEmpty,
    /// Otro avance ganó la carrera y ya hay un track sonando.
    AlreadyStreaming,
}

pub struct PlaybackEngine {
    supervisor: Arc<ConnectionSupervisor>,
    queues: Arc<QueueRegistry>,
    resolver: Arc<dyn MediaResolver>,
    now_playing: DashMap<GuildId, Track>,
    states: DashMap<GuildId, EngineState>,
    advance_locks: DashMap<GuildId, Arc<tokio::sync::Mutex<()>>>,
    events_tx: flume::Sender<EngineEvent>,
}

impl PlaybackEngine {
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        queues: Arc<QueueRegistry>,
        resolver: Arc<dyn MediaResolver>,
    ) -> (Arc<Self>, flume::Receiver<EngineEvent>) {
        let (events_tx, events_rx) = flume::unbounded();
        let engine = Arc::new(Self {
            supervisor,
            queues,
            resolver,
            now_playing: DashMap::new(),
            states: DashMap::new(),
            advance_locks: DashMap::new(),
            events_tx,
        });
        (engine, events_rx)
    }

    pub fn state(&self, guild_id: GuildId) -> EngineState {
        self.states
            .get(&guild_id)
            .map(|s| *s)
            .unwrap_or(EngineState::Idle)
    }

    pub fn now_playing(&self, guild_id: GuildId) -> Option<Track> {
        self.now_playing.get(&guild_id).map(|t| t.clone())
    }

    fn set_state(&self, guild_id: GuildId, state: EngineState) {
        self.states.insert(guild_id, state);
    }

    fn advance_lock(&self, guild_id: GuildId) -> Arc<tokio::sync::Mutex<()>> {
        self.advance_locks
            .entry(guild_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Pedido de reproducción. Si el motor estaba ocioso arranca la
    /// cola en el acto; si no, el track espera su turno.
    pub async fn handle_enqueue(
        self: &Arc<Self>,
        guild_id: GuildId,
        author_channel: ChannelId,
        url: &str,
        requested_by: UserId,
    ) -> RequestOutcome {
        if !is_playable_url(url) {
            return RequestOutcome::Rejected(
                "❌ Ese enlace no parece una URL reproducible".to_string(),
            );
        }

        // Un track que ya está sonando también cuenta como duplicado.
        if let Some(current) = self.now_playing(guild_id) {
            if current.source_url == url {
                return RequestOutcome::Rejected(
                    "⚠️ Esa canción ya está sonando".to_string(),
                );
            }
        }

        self.supervisor.remember_channel(guild_id, author_channel);
        let queue = self.queues.get_or_create(guild_id);
        let track = Track::new(url, requested_by);
        let title = track.title().to_string();
        // Espera estimada ANTES de añadir el track: lo que queda del
        // actual más todo lo que ya espera en la cola.
        let eta = queue.estimated_remaining()
            + self
                .now_playing(guild_id)
                .and_then(|t| t.estimated_duration)
                .unwrap_or_default();

        match queue.enqueue(track) {
            EnqueueOutcome::Duplicate => {
                RequestOutcome::Rejected("⚠️ Esa canción ya está en la cola".to_string())
            }
            EnqueueOutcome::Full => {
                RequestOutcome::Rejected("🚫 La cola está llena, espera a que avance".to_string())
            }
            EnqueueOutcome::Added => {
                if self.state(guild_id) == EngineState::Idle && self.now_playing(guild_id).is_none()
                {
                    // Si este track cae irreproducible, la respuesta al
                    // comando ya lo cuenta; sin evento Skipped aparte.
                    match self.advance_inner(guild_id, Some(url)).await {
                        Ok(AdvanceOutcome::Started(track)) => RequestOutcome::Started {
                            title: track.title().to_string(),
                        },
                        Ok(AdvanceOutcome::QueueEmpty) => RequestOutcome::Rejected(
                            "❌ No se pudo reproducir ese enlace".to_string(),
                        ),
                        Ok(AdvanceOutcome::AlreadyStreaming) => RequestOutcome::Queued {
                            position: queue.len(),
                            title,
                            eta,
                        },
                        Err(e) => RequestOutcome::Rejected(e.user_message().to_string()),
                    }
                } else {
                    RequestOutcome::Queued {
                        position: queue.len(),
                        title,
                        eta,
                    }
                }
            }
        }
    }

    /// Corta el track actual. El avance llega solo, por la señal de
    /// fin de reproducción.
    pub async fn handle_skip(&self, guild_id: GuildId) -> RequestOutcome {
        let Some(current) = self.now_playing(guild_id) else {
            return RequestOutcome::Rejected("🤷 No hay nada sonando que saltar".to_string());
        };
        if let Some(session) = self.supervisor.current_session(guild_id).await {
            session.stop().await;
        }
        RequestOutcome::Accepted(format!("⏭️ Saltando **{}**", current.title()))
    }

    /// Vacía la cola y corta la sesión de audio actual.
    pub async fn handle_stop(&self, guild_id: GuildId) -> RequestOutcome {
        if let Some(queue) = self.queues.get(guild_id) {
            queue.clear();
        }
        self.now_playing.remove(&guild_id);
        self.set_state(guild_id, EngineState::Idle);
        if let Some(session) = self.supervisor.current_session(guild_id).await {
            session.stop().await;
        }
        self.supervisor.mark_idle(guild_id);
        RequestOutcome::Accepted("⏹️ Reproducción detenida y cola vaciada".to_string())
    }

    pub async fn handle_pause(&self, guild_id: GuildId) -> RequestOutcome {
        if self.now_playing(guild_id).is_none() {
            return RequestOutcome::Rejected("🤷 No hay nada sonando que pausar".to_string());
        }
        if let Some(session) = self.supervisor.current_session(guild_id).await {
            session.pause().await;
            return RequestOutcome::Accepted("⏸️ Pausado".to_string());
        }
        RequestOutcome::Rejected("❌ No hay sesión de voz activa".to_string())
    }

    pub async fn handle_resume(&self, guild_id: GuildId) -> RequestOutcome {
        if self.now_playing(guild_id).is_none() {
            return RequestOutcome::Rejected("🤷 No hay nada pausado".to_string());
        }
        if let Some(session) = self.supervisor.current_session(guild_id).await {
            session.resume().await;
            return RequestOutcome::Accepted("▶️ Reanudado".to_string());
        }
        RequestOutcome::Rejected("❌ No hay sesión de voz activa".to_string())
    }

    /// Descarta el estado de reproducción sin tocar la cola. Para
    /// desconexiones externas: la cola sobrevive y el watchdog la
    /// retoma al reconectar.
    pub fn forget_playback(&self, guild_id: GuildId) {
        self.now_playing.remove(&guild_id);
        self.set_state(guild_id, EngineState::Idle);
    }

    /// Abandona el canal de voz descartando todo el estado del guild.
    pub async fn handle_leave(&self, guild_id: GuildId) -> RequestOutcome {
        if let Some(queue) = self.queues.get(guild_id) {
            queue.clear();
        }
        self.now_playing.remove(&guild_id);
        self.set_state(guild_id, EngineState::Idle);
        self.supervisor.disconnect(guild_id).await;
        RequestOutcome::Accepted("👋 Hasta luego".to_string())
    }

    /// Avanza la cola: toma el siguiente track, asegura la conexión y
    /// lo pone a sonar. Los tracks irreproducibles se saltan una sola
    /// vez y la cola sigue; un fallo de conexión devuelve el track al
    /// frente para no perderlo.
    pub async fn advance(self: &Arc<Self>, guild_id: GuildId) -> Result<AdvanceOutcome, ConnectError> {
        self.advance_inner(guild_id, None).await
    }

    async fn advance_inner(
        self: &Arc<Self>,
        guild_id: GuildId,
        skip_reported_for: Option<&str>,
    ) -> Result<AdvanceOutcome, ConnectError> {
        let lock = self.advance_lock(guild_id);
        let _guard = lock.lock().await;

        // El chequeo de ocioso del enqueue corre fuera de este lock:
        // dos avances pueden llegar aquí a la vez y solo el primero
        // debe arrancar un stream. Como mucho un track vivo por guild.
        if self.now_playing.contains_key(&guild_id) {
            return Ok(AdvanceOutcome::AlreadyStreaming);
        }

        let queue = self.queues.get_or_create(guild_id);

        loop {
            self.set_state(guild_id, EngineState::Advancing);
            let Some(track) = queue.dequeue_front() else {
                self.set_state(guild_id, EngineState::Idle);
                self.supervisor.mark_idle(guild_id);
                self.emit(EngineEvent::QueueFinished { guild_id });
                debug!("🏁 Cola agotada en guild {}", guild_id);
                return Ok(AdvanceOutcome::QueueEmpty);
            };

            self.set_state(guild_id, EngineState::Connecting);
            let session = match self.supervisor.ensure_connected(guild_id, None).await {
                Ok(session) => session,
                Err(e) => {
                    // El track no se pierde: vuelve al frente y se
                    // reintentará cuando haya conexión.
                    warn!("⚠️ Sin conexión de voz en guild {}: {}", guild_id, e);
                    queue.requeue_front(track);
                    self.set_state(guild_id, EngineState::Idle);
                    self.emit(EngineEvent::ConnectFailed {
                        guild_id,
                        error: e.clone(),
                    });
                    return Err(e);
                }
            };

            match self.start_streaming(&track, session.as_ref()).await {
                Ok((started, done)) => {
                    self.supervisor.mark_streaming(guild_id);
                    self.now_playing.insert(guild_id, started.clone());
                    self.set_state(guild_id, EngineState::Streaming);
                    info!("▶️ Reproduciendo **{}** en guild {}", started.title(), guild_id);
                    self.emit(EngineEvent::Started {
                        guild_id,
                        track: started.clone(),
                    });
                    self.spawn_completion_watcher(guild_id, done);
                    return Ok(AdvanceOutcome::Started(started));
                }
                Err(e) => {
                    // Salto único: se anuncia y se sigue con la cola.
                    warn!("⏭️ Saltando track irreproducible en guild {}: {}", guild_id, e);
                    if skip_reported_for != Some(track.source_url.as_str()) {
                        self.emit(EngineEvent::Skipped {
                            guild_id,
                            track,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Resuelve el enlace y arranca el stream, con un reintento corto
    /// para cada fase.
    async fn start_streaming(
        &self,
        track: &Track,
        session: &dyn crate::voice::gateway::VoiceSession,
    ) -> Result<(Track, PlaybackDone), PlaybackError> {
        let mut last_error = PlaybackError::ResolutionFailed("sin intentos".to_string());

        let mut resolved = None;
        for attempt in 1..=TRACK_ATTEMPTS {
            match self.resolver.resolve(&track.source_url).await {
                Ok(stream) => {
                    resolved = Some(stream);
                    break;
                }
                Err(e) => {
                    debug!("Resolución fallida (intento {}/{}): {}", attempt, TRACK_ATTEMPTS, e);
                    last_error = e;
                    if attempt < TRACK_ATTEMPTS {
                        sleep(TRACK_RETRY_DELAY).await;
                    }
                }
            }
        }
        let Some(stream) = resolved else {
            return Err(last_error);
        };

        let started = track.with_resolved(stream.clone());
        for attempt in 1..=TRACK_ATTEMPTS {
            match session.play(&stream).await {
                Ok(done) => return Ok((started, done)),
                Err(e) => {
                    debug!("Arranque fallido (intento {}/{}): {}", attempt, TRACK_ATTEMPTS, e);
                    last_error = e;
                    if attempt < TRACK_ATTEMPTS {
                        sleep(TRACK_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Espera el fin del track en segundo plano y encadena el avance.
    fn spawn_completion_watcher(self: &Arc<Self>, guild_id: GuildId, done: PlaybackDone) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            match done.recv_async().await {
                Ok(Some(error)) => {
                    warn!("⚠️ El track en guild {} terminó con error: {}", guild_id, error);
                }
                Ok(None) => {
                    debug!("✅ Track terminado en guild {}", guild_id);
                }
                Err(_) => {
                    // La sesión soltó el emisor sin avisar; se trata
                    // como fin normal.
                }
            }
            engine.now_playing.remove(&guild_id);
            if let Err(e) = engine.advance(guild_id).await {
                warn!("⚠️ No se pudo encadenar el siguiente track en guild {}: {}", guild_id, e);
            }
        });
    }
}

fn is_playable_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        voice::handshake::HandshakeRetryPolicy,
        voice::test_support::{FakeGateway, GatewayScript},
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    const GOOD: &str = "https://example.com/good";
    const BAD: &str = "https://example.com/bad";

    struct FakeResolver {
        /// URLs que deben fallar al resolver, con contador de intentos.
        failing: Mutex<HashMap<String, usize>>,
    }

    impl FakeResolver {
        fn new() -> Self {
            Self {
                failing: Mutex::new(HashMap::new()),
            }
        }

        fn fail_url(&self, url: &str) {
            self.failing.lock().insert(url.to_string(), 0);
        }

        fn attempts_for(&self, url: &str) -> usize {
            self.failing.lock().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl crate::sources::MediaResolver for FakeResolver {
        async fn resolve(
            &self,
            url: &str,
        ) -> Result<crate::sources::ResolvedStream, PlaybackError> {
            if let Some(count) = self.failing.lock().get_mut(url) {
                *count += 1;
                return Err(PlaybackError::ResolutionFailed("404".to_string()));
            }
            Ok(crate::sources::ResolvedStream {
                title: format!("título de {url}"),
                stream_url: format!("{url}/stream"),
                duration: Some(Duration::from_secs(200)),
                headers: Vec::new(),
            })
        }
    }

    struct Harness {
        engine: Arc<PlaybackEngine>,
        events: flume::Receiver<EngineEvent>,
        gateway: Arc<FakeGateway>,
        resolver: Arc<FakeResolver>,
        supervisor: Arc<ConnectionSupervisor>,
        queues: Arc<QueueRegistry>,
    }

    fn harness(script: GatewayScript) -> Harness {
        let gateway = Arc::new(FakeGateway::new(script));
        let supervisor = Arc::new(ConnectionSupervisor::new(
            gateway.clone(),
            HandshakeRetryPolicy::new(Duration::from_secs(2), true),
        ));
        let queues = Arc::new(QueueRegistry::new(100));
        let resolver = Arc::new(FakeResolver::new());
        let (engine, events) =
            PlaybackEngine::new(supervisor.clone(), queues.clone(), resolver.clone());
        Harness {
            engine,
            events,
            gateway,
            resolver,
            supervisor,
            queues,
        }
    }

    fn ids() -> (GuildId, ChannelId, UserId) {
        (GuildId::new(9), ChannelId::new(90), UserId::new(900))
    }

    async fn wait_for_idle(engine: &Arc<PlaybackEngine>, guild: GuildId) {
        for _ in 0..200 {
            if engine.state(guild) == EngineState::Idle && engine.now_playing(guild).is_none() {
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
        panic!("el motor nunca volvió a Idle");
    }

    #[tokio::test(start_paused = true)]
    async fn an_enqueue_while_idle_starts_streaming_immediately() {
        let h = harness(GatewayScript::always_ok());
        h.gateway.manual_completion();
        let (guild, channel, user) = ids();

        let outcome = h.engine.handle_enqueue(guild, channel, GOOD, user).await;

        assert_eq!(
            outcome,
            RequestOutcome::Started {
                title: format!("título de {GOOD}")
            }
        );
        assert_eq!(h.engine.state(guild), EngineState::Streaming);
        let playing = h.engine.now_playing(guild).unwrap();
        assert_eq!(playing.source_url, GOOD);
        // El track ya no figura en la cola mientras suena.
        assert!(h.queues.get_or_create(guild).is_empty());

        // Al terminar, el motor vuelve a Idle y limpia el track actual.
        h.gateway.last_session().finish_playback(None);
        wait_for_idle(&h.engine, guild).await;
        assert!(h.supervisor.idle_for(guild).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn the_streaming_track_still_counts_as_a_duplicate() {
        let h = harness(GatewayScript::always_ok());
        h.gateway.manual_completion();
        let (guild, channel, user) = ids();

        h.engine.handle_enqueue(guild, channel, GOOD, user).await;
        let outcome = h.engine.handle_enqueue(guild, channel, GOOD, user).await;

        assert_eq!(
            outcome,
            RequestOutcome::Rejected("⚠️ Esa canción ya está sonando".to_string())
        );
        assert!(h.queues.get_or_create(guild).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn a_concurrent_advance_never_doubles_the_stream() {
        let h = harness(GatewayScript::always_ok());
        h.gateway.manual_completion();
        let (guild, channel, user) = ids();

        h.engine.handle_enqueue(guild, channel, GOOD, user).await;
        h.engine
            .handle_enqueue(guild, channel, "https://example.com/next", user)
            .await;

        // Un segundo avance (otro comando, o el watchdog) llega con un
        // track todavía sonando: no debe pisarlo ni vaciar la cola.
        let outcome = h.engine.advance(guild).await.unwrap();
        assert!(matches!(outcome, AdvanceOutcome::AlreadyStreaming));
        assert_eq!(
            h.gateway.last_session().played_urls(),
            vec![format!("{GOOD}/stream")]
        );
        assert_eq!(h.engine.now_playing(guild).unwrap().source_url, GOOD);
        assert_eq!(h.queues.get_or_create(guild).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn an_unplayable_enqueue_is_reported_only_in_the_reply() {
        let h = harness(GatewayScript::always_ok());
        let (guild, channel, user) = ids();
        h.resolver.fail_url(BAD);

        let outcome = h.engine.handle_enqueue(guild, channel, BAD, user).await;

        assert_eq!(
            outcome,
            RequestOutcome::Rejected("❌ No se pudo reproducir ese enlace".to_string())
        );
        // La respuesta al comando ya avisó; un embed Skipped sería un
        // segundo reporte del mismo track.
        let events: Vec<EngineEvent> = h.events.drain().collect();
        assert!(!events
            .iter()
            .any(|e| matches!(e, EngineEvent::Skipped { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn a_failing_track_is_skipped_once_and_the_queue_continues() {
        let h = harness(GatewayScript::always_ok());
        let (guild, channel, user) = ids();
        h.resolver.fail_url(BAD);

        let queue = h.queues.get_or_create(guild);
        queue.enqueue(Track::new(BAD, user));
        queue.enqueue(Track::new(GOOD, user));
        h.supervisor.remember_channel(guild, channel);

        h.engine.advance(guild).await.unwrap();
        wait_for_idle(&h.engine, guild).await;

        // Dos intentos de resolución para el malo, ni uno más.
        assert_eq!(h.resolver.attempts_for(BAD), TRACK_ATTEMPTS as usize);
        assert_eq!(
            h.gateway.last_session().played_urls(),
            vec![format!("{GOOD}/stream")]
        );

        let events: Vec<EngineEvent> = h.events.drain().collect();
        let skips = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::Skipped { track, .. } if track.source_url == BAD))
            .count();
        assert_eq!(skips, 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::Started { track, .. } if track.source_url == GOOD)));
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::QueueFinished { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn a_connect_failure_returns_the_track_to_the_front() {
        let h = harness(GatewayScript::always_fail(ConnectError::Timeout));
        let (guild, channel, user) = ids();

        let queue = h.queues.get_or_create(guild);
        queue.enqueue(Track::new(GOOD, user));
        h.supervisor.remember_channel(guild, channel);

        let err = h.engine.advance(guild).await.unwrap_err();
        assert_eq!(err, ConnectError::Timeout);
        assert_eq!(h.engine.state(guild), EngineState::Idle);
        // El track sobrevive al fallo, al frente de la cola.
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_all()[0].source_url, GOOD);
        assert!(h
            .events
            .drain()
            .any(|e| matches!(e, EngineEvent::ConnectFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_while_streaming_reports_position_and_eta() {
        let h = harness(GatewayScript::always_ok());
        h.gateway.manual_completion();
        let (guild, channel, user) = ids();

        h.engine.handle_enqueue(guild, channel, GOOD, user).await;
        let outcome = h
            .engine
            .handle_enqueue(guild, channel, "https://example.com/next", user)
            .await;

        match outcome {
            RequestOutcome::Queued { position, eta, .. } => {
                assert_eq!(position, 1);
                // Lo que queda del actual (200 s resueltos).
                assert_eq!(eta, Duration::from_secs(200));
            }
            other => panic!("se esperaba Queued, llegó {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn skip_stops_the_current_track_and_chains_the_next() {
        let h = harness(GatewayScript::always_ok());
        h.gateway.manual_completion();
        let (guild, channel, user) = ids();

        h.engine.handle_enqueue(guild, channel, GOOD, user).await;
        h.engine
            .handle_enqueue(guild, channel, "https://example.com/next", user)
            .await;

        let outcome = h.engine.handle_skip(guild).await;
        assert!(matches!(outcome, RequestOutcome::Accepted(_)));

        // stop() dispara la señal de fin y el watcher encadena el siguiente.
        for _ in 0..200 {
            if h.engine
                .now_playing(guild)
                .is_some_and(|t| t.source_url == "https://example.com/next")
            {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
        let playing = h.engine.now_playing(guild).unwrap();
        assert_eq!(playing.source_url, "https://example.com/next");
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_things_that_are_not_urls() {
        let h = harness(GatewayScript::always_ok());
        let (guild, channel, user) = ids();

        let outcome = h
            .engine
            .handle_enqueue(guild, channel, "no soy un enlace", user)
            .await;
        assert!(matches!(outcome, RequestOutcome::Rejected(_)));
        assert_eq!(h.gateway.connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_clears_the_queue_and_marks_the_guild_idle() {
        let h = harness(GatewayScript::always_ok());
        h.gateway.manual_completion();
        let (guild, channel, user) = ids();

        h.engine.handle_enqueue(guild, channel, GOOD, user).await;
        h.engine
            .handle_enqueue(guild, channel, "https://example.com/next", user)
            .await;

        let outcome = h.engine.handle_stop(guild).await;
        assert!(matches!(outcome, RequestOutcome::Accepted(_)));
        assert!(h.queues.get_or_create(guild).is_empty());
        assert!(h.engine.now_playing(guild).is_none());
        assert!(h.supervisor.idle_for(guild).is_some());
    }
}
