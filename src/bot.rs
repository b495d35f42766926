use std::{sync::Arc, time::Duration};

use futures::{pin_mut, Stream, StreamExt};
use reqwest::Client;
use tokio::{
    sync::{oneshot, Mutex},
    task::JoinHandle,
    time,
};
use tracing::{error, info, warn};

use crate::{
    catalog::{CatalogError, EmoteCatalog},
    config::Config,
    engine::{ChatMessage, Engine, ResponseIntent},
    gate::ResponseGate,
    irc::{ChatSink, IrcConnection, TWITCH_IRC_HOST, TWITCH_IRC_TLS_PORT},
    sevengg::get_channel_emotes,
    twitch::Helix,
};

const STREAM_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const EMOTE_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const CHAT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub type SharedEngine = Arc<Mutex<Engine>>;

struct Session {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<color_eyre::Result<()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Running,
    Finished,
}

impl SessionState {
    fn of(session: Option<&Session>) -> Self {
        match session {
            None => Self::Idle,
            Some(s) if s.handle.is_finished() => Self::Finished,
            Some(_) => Self::Running,
        }
    }
}

/// What the supervisor does on a liveness tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Connect,
    Reconnect,
    Disconnect,
    Reap,
    Keep,
}

fn transition(live: bool, state: SessionState) -> Transition {
    match (live, state) {
        (true, SessionState::Idle) => Transition::Connect,
        (true, SessionState::Finished) => Transition::Reconnect,
        (false, SessionState::Running) => Transition::Disconnect,
        (false, SessionState::Finished) => Transition::Reap,
        (true, SessionState::Running) | (false, SessionState::Idle) => Transition::Keep,
    }
}

/// Reloads the catalog from 7TV; a failed or empty load keeps what we had.
async fn refresh_catalog(http: &Client, helix: &Helix, channel: &str, catalog: &EmoteCatalog) {
    let twitch_id = helix.user_id(channel).await;
    match get_channel_emotes(http, channel, twitch_id.as_deref()).await {
        Ok(emotes) => match catalog.refresh(emotes) {
            Ok(loaded) => info!(channel, loaded, "loaded 7TV emotes"),
            Err(CatalogError::NoEmotesFound) if catalog.is_empty() => warn!(
                channel,
                "no 7TV emotes found, make sure the channel has 7TV enabled with emotes set up"
            ),
            Err(CatalogError::NoEmotesFound) => warn!(
                channel,
                kept = catalog.len(),
                "no 7TV emotes found, keeping previous set"
            ),
        },
        Err(e) => error!(channel, error = %e, kept = catalog.len(), "error fetching 7TV emotes"),
    }
}

async fn refresh_loop(http: Client, helix: Helix, channel: String, catalog: Arc<EmoteCatalog>) {
    let mut ticker = time::interval(EMOTE_REFRESH_INTERVAL);
    loop {
        ticker.tick().await;
        refresh_catalog(&http, &helix, &channel, &catalog).await;
    }
}

/// Waits out the intent's delay and sends it. The cooldown was already
/// taken when the gate fired; a failed send hands it back.
pub async fn deliver(sink: impl ChatSink, engine: SharedEngine, intent: ResponseIntent) {
    time::sleep(intent.delay).await;
    match sink.say(&intent.channel, &intent.text).await {
        Ok(()) => info!(
            user = %intent.trigger_user,
            message = %intent.trigger_message,
            sent = %intent.text,
            "bot sent emote"
        ),
        Err(e) => {
            error!(error = %e, sent = %intent.text, "error sending message");
            engine.lock().await.send_failed();
        }
    }
}

/// Feeds chat into the engine until told to stop or the stream ends.
/// Deliveries are detached, so one still pending when this returns keeps
/// its own handle on the engine.
async fn chat_loop<M, S>(
    messages: M,
    sink: S,
    engine: &SharedEngine,
    stop: &mut oneshot::Receiver<()>,
) -> color_eyre::Result<()>
where
    M: Stream<Item = color_eyre::Result<ChatMessage>>,
    S: ChatSink + Clone + 'static,
{
    pin_mut!(messages);
    loop {
        tokio::select! {
            _ = &mut *stop => return Ok(()),
            next = messages.next() => match next {
                Some(Ok(message)) => {
                    let intent = engine.lock().await.handle_message(&message);
                    if let Some(intent) = intent {
                        tokio::spawn(deliver(sink.clone(), engine.clone(), intent));
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    warn!("disconnected from chat");
                    return Ok(());
                }
            },
        }
    }
}

async fn run_session(
    config: Config,
    http: Client,
    helix: Helix,
    engine: SharedEngine,
    mut stop: oneshot::Receiver<()>,
) -> color_eyre::Result<()> {
    let channel = config.channel().to_owned();
    let connection = time::timeout(
        CHAT_CONNECT_TIMEOUT,
        IrcConnection::connect(
            TWITCH_IRC_HOST,
            TWITCH_IRC_TLS_PORT,
            &config.username,
            &config.oauth,
            &channel,
        ),
    )
    .await??;
    let sender = connection.sender();
    info!(channel = %channel, "monitoring channel");

    let catalog = engine.lock().await.catalog().clone();
    let refresher = tokio::spawn(refresh_loop(http, helix, channel.clone(), catalog));

    let result = chat_loop(connection.messages(), sender.clone(), &engine, &mut stop).await;

    refresher.abort();
    if let Err(e) = sender.quit().await {
        warn!(error = %e, "error while leaving chat");
    }
    info!(channel = %channel, "chat session ended");
    result
}

fn start_session(config: &Config, http: &Client, helix: &Helix, engine: &SharedEngine) -> Session {
    let (stop, stop_rx) = oneshot::channel();
    let handle = tokio::spawn(run_session(
        config.clone(),
        http.clone(),
        helix.clone(),
        engine.clone(),
        stop_rx,
    ));
    Session { stop, handle }
}

async fn stop_session(session: Session) {
    let _ = session.stop.send(());
    match session.handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "chat session failed"),
        Err(e) => error!(error = %e, "chat session panicked"),
    }
}

/// Joins chat while the channel is live and leaves when it goes offline.
///
/// The engine outlives individual sessions, so the catalog and usage state
/// carry over between streams.
pub async fn run(config: Config) -> color_eyre::Result<()> {
    let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let helix = Helix::new(http.clone(), &config.client_id, &config.oauth);
    let channel = config.channel().to_owned();

    let gate = ResponseGate::new(config.gate_config());
    info!(
        channel = %channel,
        response_chance = gate.config().response_chance,
        cooldown_secs = gate.config().cooldown.as_secs(),
        "starting bot, will only run while the channel is live"
    );
    let engine: SharedEngine = Arc::new(Mutex::new(Engine::new(
        &channel,
        &config.username,
        Arc::new(EmoteCatalog::new()),
        config.usage_tracker(),
        gate,
    )));

    let mut session: Option<Session> = None;
    let mut ticker = time::interval(STREAM_CHECK_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    pin_mut!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                info!("shutting down bot");
                break;
            }
            _ = ticker.tick() => {
                let live = helix.is_live(&channel).await;
                match transition(live, SessionState::of(session.as_ref())) {
                    Transition::Connect => {
                        info!(channel = %channel, "channel is live, connecting bot");
                        session = Some(start_session(&config, &http, &helix, &engine));
                    }
                    Transition::Reconnect => {
                        if let Some(finished) = session.take() {
                            stop_session(finished).await;
                        }
                        info!(channel = %channel, "chat session ended while live, reconnecting");
                        session = Some(start_session(&config, &http, &helix, &engine));
                    }
                    Transition::Disconnect => {
                        info!(channel = %channel, "channel went offline, disconnecting bot");
                        if let Some(active) = session.take() {
                            stop_session(active).await;
                        }
                    }
                    Transition::Reap => {
                        if let Some(finished) = session.take() {
                            stop_session(finished).await;
                        }
                    }
                    Transition::Keep => {}
                }
            }
        }
    }

    if let Some(active) = session {
        stop_session(active).await;
    }
    Ok(())
}
