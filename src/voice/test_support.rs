//! Fakes del gateway y la sesión de voz para los tests del core.
//! Registran instantes con el reloj de tokio, así que con
//! `start_paused = true` las esperas de backoff se pueden afirmar
//! de forma exacta.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::time::Instant;

use crate::{
    error::{ConnectError, PlaybackError},
    sources::ResolvedStream,
    voice::gateway::{PlaybackDone, VoiceGateway, VoiceSession},
};

/// Guion de respuestas para `connect`.
pub enum GatewayScript {
    /// Consume la lista de fallos y después conecta siempre.
    FailuresThenOk(Mutex<VecDeque<ConnectError>>),
    /// Falla siempre con el mismo error.
    AlwaysFail(ConnectError),
    /// Nunca responde; el intento debe morir por timeout.
    Hang,
}

impl GatewayScript {
    pub fn failures_then_ok(failures: Vec<ConnectError>) -> Self {
        Self::FailuresThenOk(Mutex::new(failures.into()))
    }

    pub fn always_ok() -> Self {
        Self::failures_then_ok(Vec::new())
    }

    pub fn always_fail(error: ConnectError) -> Self {
        Self::AlwaysFail(error)
    }

    pub fn hang() -> Self {
        Self::Hang
    }
}

pub struct FakeGateway {
    script: GatewayScript,
    connect_instants: Mutex<Vec<Instant>>,
    move_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    fail_moves: AtomicBool,
    /// Las sesiones nuevas nacen sin estabilizarse nunca.
    unstable_sessions: AtomicBool,
    /// `play` completa solo; en false el test debe llamar `finish_playback`.
    auto_complete: AtomicBool,
    pub sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeGateway {
    pub fn new(script: GatewayScript) -> Self {
        Self {
            script,
            connect_instants: Mutex::new(Vec::new()),
            move_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            fail_moves: AtomicBool::new(false),
            unstable_sessions: AtomicBool::new(false),
            auto_complete: AtomicBool::new(true),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_moves(&self) {
        self.fail_moves.store(true, Ordering::SeqCst);
    }

    pub fn make_unstable_sessions(&self) {
        self.unstable_sessions.store(true, Ordering::SeqCst);
    }

    pub fn manual_completion(&self) {
        self.auto_complete.store(false, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_instants.lock().len()
    }

    pub fn connect_instants(&self) -> Vec<Instant> {
        self.connect_instants.lock().clone()
    }

    pub fn move_calls(&self) -> usize {
        self.move_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn last_session(&self) -> Arc<FakeSession> {
        self.sessions.lock().last().expect("sin sesiones creadas").clone()
    }

    fn new_session(&self, channel_id: ChannelId) -> Arc<FakeSession> {
        let session = Arc::new(FakeSession::new(
            channel_id,
            !self.unstable_sessions.load(Ordering::SeqCst),
            self.auto_complete.load(Ordering::SeqCst),
        ));
        self.sessions.lock().push(session.clone());
        session
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn connect(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
        _self_deaf: bool,
    ) -> Result<Arc<dyn VoiceSession>, ConnectError> {
        self.connect_instants.lock().push(Instant::now());

        match &self.script {
            GatewayScript::FailuresThenOk(failures) => {
                if let Some(err) = failures.lock().pop_front() {
                    return Err(err);
                }
            }
            GatewayScript::AlwaysFail(err) => return Err(err.clone()),
            GatewayScript::Hang => futures::future::pending::<()>().await,
        }

        Ok(self.new_session(channel_id))
    }

    async fn move_to(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceSession>, ConnectError> {
        self.move_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_moves.load(Ordering::SeqCst) {
            return Err(ConnectError::Unknown("move rechazado".into()));
        }
        Ok(self.new_session(channel_id))
    }

    async fn disconnect(&self, _guild_id: GuildId) -> Result<(), ConnectError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        for session in self.sessions.lock().iter() {
            session.set_connected(false);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeSession {
    connected: AtomicBool,
    channel_id: ChannelId,
    auto_complete: bool,
    /// Fallos de `play` que quedan por inyectar.
    play_failures: AtomicUsize,
    pending: Mutex<Option<flume::Sender<Option<String>>>>,
    pub played: Mutex<Vec<ResolvedStream>>,
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeSession {
    fn new(channel_id: ChannelId, connected: bool, auto_complete: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            channel_id,
            auto_complete,
            play_failures: AtomicUsize::new(0),
            pending: Mutex::new(None),
            played: Mutex::new(Vec::new()),
            pauses: AtomicUsize::new(0),
            resumes: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn fail_next_plays(&self, count: usize) {
        self.play_failures.store(count, Ordering::SeqCst);
    }

    /// Dispara la señal de fin del stream en curso, como si el proceso
    /// de audio hubiese terminado.
    pub fn finish_playback(&self, error: Option<String>) {
        if let Some(tx) = self.pending.lock().take() {
            let _ = tx.try_send(error);
        }
    }

    pub fn played_urls(&self) -> Vec<String> {
        self.played.lock().iter().map(|s| s.stream_url.clone()).collect()
    }
}

#[async_trait]
impl VoiceSession for FakeSession {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn channel_id(&self) -> Option<ChannelId> {
        self.connected
            .load(Ordering::SeqCst)
            .then_some(self.channel_id)
    }

    async fn play(&self, stream: &ResolvedStream) -> Result<PlaybackDone, PlaybackError> {
        let remaining = self.play_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.play_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PlaybackError::SubprocessFailed("fallo inyectado".into()));
        }

        self.played.lock().push(stream.clone());
        let (tx, rx) = flume::bounded(1);
        if self.auto_complete {
            let _ = tx.try_send(None);
        } else {
            *self.pending.lock() = Some(tx);
        }
        Ok(rx)
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.finish_playback(None);
    }

    async fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    async fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}
