//! Session handlers.
//!
//! This module handles the session lifecycle and stanza processing.

use crate::config::Config;
use crate::metrics::{self, SessionMetricsGuard};
use crate::session::SessionRouter;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use presence_hub_core::{MemoryCapabilitiesStore, PresenceHub, StanzaSender};
use presence_protocol::frames::error_code;
use presence_protocol::{
    codec, Element, Frame, FrameReader, Iq, IqType, Jid, Presence, Stanza, PROTOCOL_VERSION,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const NS_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

/// Shared server state.
pub struct AppState {
    /// The presence hub.
    pub hub: Arc<PresenceHub>,
    /// Bound sessions.
    pub sessions: Arc<SessionRouter>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured domain is invalid.
    pub fn new(config: Config) -> Result<Self> {
        let sessions = Arc::new(SessionRouter::new(config.domain.clone()));
        let hub = PresenceHub::with_config(
            sessions.clone(),
            Arc::new(MemoryCapabilitiesStore::new()),
            config.capabilities.hub_config(),
        )
        .with_context(|| format!("Invalid domain: {}", config.domain))?;

        Ok(Self {
            hub: Arc::new(hub),
            sessions,
            config,
        })
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let period = config.capabilities.sweep_interval();
    let _sweeper = state.hub.spawn_sweeper(period, metrics::record_discovery_expired);
    let _stats = spawn_stats_publisher(state.clone());

    let app = Router::new()
        .route(&config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Presence hub for {} listening on {}", config.domain, addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.websocket_path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Publish hub gauges once per sweep interval.
fn spawn_stats_publisher(state: Arc<AppState>) -> JoinHandle<()> {
    let period = state.config.capabilities.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            metrics::set_hub_stats(state.hub.stats());
        }
    })
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "domain": state.hub.domain().to_string(),
        "sessions": state.sessions.session_count(),
        "resources": stats.resources,
        "addresses": stats.addresses,
        "pending_requests": stats.pending_requests,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket session.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    if state.sessions.session_count() >= state.config.limits.max_sessions {
        warn!("Session limit reached, rejecting connection");
        let _ = send_frame(&mut sender, &Frame::error(error_code::NOT_CONNECTED, "session limit reached")).await;
        return;
    }

    let mut reader = FrameReader::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Stanza>();

    // Handshake: the first frame must bind the session.
    let jid = loop {
        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => reader.push(&data),
            Some(Ok(Message::Text(text))) => reader.push(text.as_bytes()),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            _ => return,
        }

        let frame = match reader.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                let _ = send_frame(&mut sender, &Frame::error(error_code::MALFORMED_FRAME, e.to_string())).await;
                return;
            }
        };

        match accept_connect(frame, &state) {
            Ok(jid) if state.sessions.bind(jid.clone(), tx.clone()) => break jid,
            Ok(jid) => {
                let reply = Frame::error(error_code::INVALID_JID, format!("{jid} is already bound"));
                let _ = send_frame(&mut sender, &reply).await;
                return;
            }
            Err(reply) => {
                let _ = send_frame(&mut sender, &reply).await;
                return;
            }
        }
    };
    drop(tx);

    let _metrics_guard = SessionMetricsGuard::new();
    debug!(jid = %jid, "Session connected");

    let connected = Frame::connected(jid.clone(), state.config.heartbeat.interval_ms as u32);
    if send_frame(&mut sender, &connected).await.is_err() {
        error!(jid = %jid, "Failed to send Connected frame");
        close_session(&jid, &state);
        return;
    }

    // Frames left over from the handshake read are processed first.
    let mut pending_input = true;

    loop {
        if pending_input {
            pending_input = false;
            if !drain_frames(&mut reader, &jid, &state, &mut sender).await {
                break;
            }
        }

        tokio::select! {
            biased;

            // Stanzas routed to this session
            Some(stanza) = rx.recv() => {
                if send_frame(&mut sender, &Frame::stanza(stanza)).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > state.config.limits.max_message_size {
                            warn!(jid = %jid, size = data.len(), "Message too large");
                            metrics::record_error("message_too_large");
                            break;
                        }
                        reader.push(&data);
                        pending_input = true;
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        reader.push(text.as_bytes());
                        pending_input = true;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(jid = %jid, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(jid = %jid, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(jid = %jid, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    close_session(&jid, &state);
    debug!(jid = %jid, "Session disconnected");
}

/// Process every complete frame buffered in `reader`.
///
/// Returns `false` if the session must be closed.
async fn drain_frames(
    reader: &mut FrameReader,
    jid: &Jid,
    state: &AppState,
    sender: &mut SplitSink<WebSocket, Message>,
) -> bool {
    loop {
        let frame = match reader.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return true,
            Err(e) => {
                warn!(jid = %jid, error = %e, "Malformed frame");
                metrics::record_error("decode");
                let reply = Frame::error(error_code::MALFORMED_FRAME, e.to_string());
                let _ = send_frame(sender, &reply).await;
                return false;
            }
        };

        let start = Instant::now();
        let reply = handle_frame(frame, jid, state).await;
        metrics::record_latency(start.elapsed().as_secs_f64());

        if let Some(reply) = reply {
            if send_frame(sender, &reply).await.is_err() {
                return false;
            }
        }
    }
}

/// Unbind the session and drop its presence.
fn close_session(jid: &Jid, state: &AppState) {
    state.sessions.unbind(jid);
    let gone = Presence::unavailable(jid.clone(), state.hub.domain().clone());
    state.hub.unregister_presence(&gone);
    metrics::set_hub_stats(state.hub.stats());
}

/// Validate the handshake frame.
///
/// Returns the JID to bind, or the error frame to send back.
fn accept_connect(frame: Frame, state: &AppState) -> Result<Jid, Frame> {
    let Frame::Connect { version, jid } = frame else {
        return Err(Frame::error(error_code::NOT_CONNECTED, "expected connect frame"));
    };

    if !PROTOCOL_VERSION.accepts_major(version) {
        return Err(Frame::error(
            error_code::VERSION_MISMATCH,
            format!("unsupported protocol version {version}, server speaks {PROTOCOL_VERSION}"),
        ));
    }
    if !jid.is_full() || jid.domain() != state.hub.domain().domain() {
        return Err(Frame::error(
            error_code::INVALID_JID,
            format!("{jid} is not a full JID of {}", state.hub.domain()),
        ));
    }

    Ok(jid)
}

/// Handle a frame from the session bound to `jid`.
///
/// Returns the frame to send back, if any.
async fn handle_frame(frame: Frame, jid: &Jid, state: &AppState) -> Option<Frame> {
    match frame {
        Frame::Stanza { stanza } => {
            metrics::record_stanza(metrics::stanza_kind(&stanza), "inbound");
            match stanza {
                Stanza::Presence(presence) => handle_presence(presence, jid, state).await,
                Stanza::Iq(iq) => handle_iq(iq, jid, state).await,
            }
        }

        Frame::Ping { timestamp } => Some(Frame::pong(timestamp)),

        Frame::Pong { .. } => None,

        Frame::Connect { version, .. } => {
            debug!(jid = %jid, version, "Connect frame (already connected)");
            None
        }

        other => {
            warn!(jid = %jid, frame_type = ?other.frame_type(), "Unexpected frame type");
            None
        }
    }
}

async fn handle_presence(mut presence: Presence, jid: &Jid, state: &AppState) -> Option<Frame> {
    // The session JID is authoritative for the sender.
    presence.from = jid.clone();

    if !presence.is_available() {
        state.hub.unregister_presence(&presence);
        return None;
    }

    match state.hub.register_presence(presence).await {
        Ok(entries) => {
            debug!(jid = %jid, available = entries.len(), "Presence registered");
            None
        }
        Err(e) => {
            warn!(jid = %jid, error = %e, "Presence rejected");
            Some(Frame::error(error_code::PRESENCE_REJECTED, e.to_string()))
        }
    }
}

async fn handle_iq(mut iq: Iq, jid: &Jid, state: &AppState) -> Option<Frame> {
    iq.from = Some(jid.clone());

    let to_hub = iq.to.as_ref().map_or(true, |to| to == state.hub.domain());
    if !to_hub {
        state.sessions.send(Stanza::Iq(iq));
        return None;
    }

    if iq.is_response() {
        let outcome = state.hub.process_response(&iq).await;
        metrics::record_discovery_response(outcome);
        return None;
    }

    debug!(jid = %jid, id = %iq.id, "Unsupported IQ addressed to the hub");
    Some(Frame::stanza(service_unavailable(&iq, state.hub.domain())))
}

/// Error reply for a request the hub does not serve.
fn service_unavailable(request: &Iq, domain: &Jid) -> Iq {
    let mut reply = Iq::new(request.id.clone(), IqType::Error)
        .with_from(domain.clone())
        .with_element(
            Element::new("error")
                .with_attr("type", "cancel")
                .with_child(Element::new("service-unavailable").with_namespace(NS_STANZAS)),
        );
    reply.to = request.from.clone();
    reply
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<()> {
    let data = codec::encode(frame)?;
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use presence_hub_core::ResponseOutcome;
    use presence_protocol::caps::disco_info_result;
    use presence_protocol::{CapsAdvertisement, NS_DISCO_INFO};

    const NODE: &str = "http://code.google.com/p/exodus";
    const VER: &str = "QgayPKawpkPSDYmwT/WM94uAlu0=";

    fn jid(s: &str) -> Jid {
        Jid::parse(s).unwrap()
    }

    fn state() -> AppState {
        let config = Config {
            domain: "jackal.im".to_string(),
            ..Config::default()
        };
        AppState::new(config).unwrap()
    }

    fn bind(state: &AppState, address: &str) -> (Jid, mpsc::UnboundedReceiver<Stanza>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let j = jid(address);
        assert!(state.sessions.bind(j.clone(), tx));
        (j, rx)
    }

    #[test]
    fn test_invalid_domain() {
        let config = Config {
            domain: String::new(),
            ..Config::default()
        };
        assert!(AppState::new(config).is_err());
    }

    #[test]
    fn test_accept_connect() {
        let state = state();

        let ok = accept_connect(Frame::connect(1, jid("ortuman@jackal.im/balcony")), &state);
        assert_eq!(ok.unwrap(), jid("ortuman@jackal.im/balcony"));

        let cases = [
            (Frame::connect(2, jid("ortuman@jackal.im/balcony")), error_code::VERSION_MISMATCH),
            (Frame::connect(1, jid("ortuman@jackal.im")), error_code::INVALID_JID),
            (Frame::connect(1, jid("ortuman@example.org/balcony")), error_code::INVALID_JID),
            (Frame::ping(), error_code::NOT_CONNECTED),
        ];
        for (frame, expected) in cases {
            match accept_connect(frame, &state) {
                Err(Frame::Error { code, .. }) => assert_eq!(code, expected),
                other => panic!("Expected error {expected}, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_presence_triggers_discovery() {
        let state = state();
        let (me, mut rx) = bind(&state, "ortuman@jackal.im/balcony");

        // The claimed sender is replaced by the session JID.
        let presence = Presence::available(jid("mallory@jackal.im/evil"), jid("jackal.im"))
            .with_element(CapsAdvertisement::new("sha-1", NODE, VER).caps_element());
        assert!(handle_frame(Frame::stanza(presence), &me, &state).await.is_none());

        let Stanza::Iq(query) = rx.try_recv().unwrap() else {
            panic!("expected disco#info query");
        };
        assert_eq!(query.to, Some(me.clone()));
        assert_eq!(
            query.element("query", NS_DISCO_INFO).and_then(|q| q.attr("node")),
            Some(format!("{NODE}#{VER}").as_str())
        );
        assert!(state.hub.available_presences_matching(&jid("mallory@jackal.im")).is_empty());

        let result = disco_info_result(query.id.clone(), me.clone(), jid("jackal.im"), &format!("{NODE}#{VER}"), ["cool+feature"]);
        assert!(handle_frame(Frame::stanza(result), &me, &state).await.is_none());

        let entries = state.hub.refresh_capabilities(&me.to_bare()).await;
        assert_eq!(entries[0].capabilities.as_ref().unwrap().features, vec!["cool+feature"]);
    }

    #[tokio::test]
    async fn test_other_session_cannot_answer_discovery() {
        let state = state();
        let (me, mut rx) = bind(&state, "ortuman@jackal.im/balcony");
        let (mallory, _mallory_rx) = bind(&state, "mallory@jackal.im/x");

        let presence = Presence::available(me.clone(), jid("jackal.im"))
            .with_element(CapsAdvertisement::new("sha-1", NODE, VER).caps_element());
        handle_frame(Frame::stanza(presence), &me, &state).await;
        let Stanza::Iq(query) = rx.try_recv().unwrap() else {
            panic!("expected disco#info query");
        };

        // A response claiming to come from the queried resource is stamped
        // with the sending session's JID.
        let forged = disco_info_result(query.id.clone(), me.clone(), jid("jackal.im"), &format!("{NODE}#{VER}"), ["forged+feature"]);
        handle_frame(Frame::stanza(forged), &mallory, &state).await;
        assert_eq!(state.hub.stats().pending_requests, 1);

        let genuine = disco_info_result(query.id.clone(), me.clone(), jid("jackal.im"), &format!("{NODE}#{VER}"), ["cool+feature"]);
        handle_frame(Frame::stanza(genuine), &me, &state).await;

        let entries = state.hub.refresh_capabilities(&me.to_bare()).await;
        assert_eq!(entries[0].capabilities.as_ref().unwrap().features, vec!["cool+feature"]);
    }

    #[tokio::test]
    async fn test_unavailable_presence_unregisters() {
        let state = state();
        let (me, _rx) = bind(&state, "ortuman@jackal.im/balcony");

        handle_frame(Frame::stanza(Presence::available(me.clone(), jid("jackal.im"))), &me, &state).await;
        assert_eq!(state.hub.stats().resources, 1);

        handle_frame(Frame::stanza(Presence::unavailable(me.clone(), jid("jackal.im"))), &me, &state).await;
        assert_eq!(state.hub.stats().resources, 0);
    }

    #[tokio::test]
    async fn test_close_session() {
        let state = state();
        let (me, _rx) = bind(&state, "ortuman@jackal.im/balcony");
        handle_frame(Frame::stanza(Presence::available(me.clone(), jid("jackal.im"))), &me, &state).await;

        close_session(&me, &state);
        assert_eq!(state.sessions.session_count(), 0);
        assert!(state.hub.available_presences_matching(&me.to_bare()).is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_iq_to_hub() {
        let state = state();
        let (me, _rx) = bind(&state, "ortuman@jackal.im/balcony");

        let request = Iq::new("v1", IqType::Get).with_to(jid("jackal.im"));
        let Some(Frame::Stanza { stanza: Stanza::Iq(reply) }) = handle_frame(Frame::stanza(request), &me, &state).await else {
            panic!("expected IQ error reply");
        };
        assert_eq!(reply.iq_type, IqType::Error);
        assert_eq!(reply.to, Some(me));
        assert_eq!(reply.payload[0].attr("type"), Some("cancel"));
        assert!(reply.payload[0].child_ns("service-unavailable", NS_STANZAS).is_some());
    }

    #[tokio::test]
    async fn test_iq_routed_between_sessions() {
        let state = state();
        let (me, _rx) = bind(&state, "ortuman@jackal.im/balcony");
        let (peer, mut peer_rx) = bind(&state, "noelia@jackal.im/yard");

        let request = Iq::new("p1", IqType::Get).with_to(peer);
        assert!(handle_frame(Frame::stanza(request), &me, &state).await.is_none());

        let delivered = peer_rx.try_recv().unwrap();
        assert_eq!(delivered.from(), Some(&me));
    }

    #[tokio::test]
    async fn test_unknown_response_is_ignored() {
        let state = state();
        let (me, _rx) = bind(&state, "ortuman@jackal.im/balcony");

        let stray = Iq::new("stray", IqType::Result).with_to(jid("jackal.im"));
        assert!(handle_frame(Frame::stanza(stray.clone()), &me, &state).await.is_none());
        assert_eq!(state.hub.process_response(&stray).await, ResponseOutcome::Unknown);
    }

    #[tokio::test]
    async fn test_ping() {
        let state = state();
        let me = jid("ortuman@jackal.im/balcony");
        let reply = handle_frame(Frame::Ping { timestamp: Some(7) }, &me, &state).await;
        assert_eq!(reply, Some(Frame::pong(Some(7))));
    }
}
