//! # WebSocket Streaming Handler
//!
//! The actor shell around the stream ingest session. Clients connect to
//! `/ws/stream`, send an `init` control frame for their round, then alternate
//! `chunk` control frames with binary payloads until `complete`.
//!
//! ## Actor Model:
//! Each connection is one Actix actor owning one `StreamSession`; the session
//! holds all per-connection protocol state, so dropping the connection drops
//! everything except what the chunk store already persisted. Completion work
//! (assembly + job admission) runs in a spawned task and posts its result
//! back through the actor's address, keeping the actor loop non-blocking.

use crate::error::AppError;
use crate::ingest::protocol::{ClientMessage, ServerMessage};
use crate::ingest::session::{complete_round, CompleteAction, StreamSession};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::Duration;
use tracing::{debug, info, warn};

/// WebSocket actor for one streaming connection.
pub struct IngestWebSocket {
    session: StreamSession,
    state: web::Data<AppState>,
    heartbeat: Duration,
    /// A completion is already in flight; duplicates are dropped until it
    /// reports back.
    completing: bool,
}

impl IngestWebSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        let heartbeat = Duration::from_secs(state.config.ingest.heartbeat_secs);
        Self {
            session: StreamSession::new(),
            state,
            heartbeat,
            completing: false,
        }
    }

    fn send(ctx: &mut ws::WebsocketContext<Self>, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => ctx.text(json),
            Err(e) => warn!(error = %e, "failed to serialize server frame"),
        }
    }

    fn send_all(&self, ctx: &mut ws::WebsocketContext<Self>, messages: &[ServerMessage]) {
        let acked = messages
            .iter()
            .filter(|m| matches!(m, ServerMessage::Ack { .. }))
            .count();
        if acked > 0 {
            self.state.record_chunks(acked as u64);
        }
        for message in messages {
            Self::send(ctx, message);
        }
    }

    fn handle_control(&mut self, raw: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let message: ClientMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                // Malformed frames are reported, never fatal.
                Self::send(
                    ctx,
                    &ServerMessage::Error {
                        code: "INVALID_MESSAGE".to_string(),
                        message: format!("unparseable control frame: {}", e),
                    },
                );
                return;
            }
        };

        match message {
            ClientMessage::Init {
                round_id,
                mime_type,
            } => match self.session.on_init(
                &round_id,
                &mime_type,
                &self.state.rounds,
                &self.state.chunks,
            ) {
                Ok(ready) => Self::send(ctx, &ready),
                Err(err) => {
                    let fatal = err.ws_code() == "ROUND_NOT_FOUND";
                    Self::send(
                        ctx,
                        &ServerMessage::Error {
                            code: err.ws_code(),
                            message: err.to_string(),
                        },
                    );
                    if fatal {
                        // The one unrecoverable protocol error: there is no
                        // round to stream into.
                        ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Policy)));
                        ctx.stop();
                    }
                }
            },
            ClientMessage::Chunk { sequence, .. } => {
                let replies = self.session.on_chunk_meta(sequence, &self.state.chunks);
                self.send_all(ctx, &replies);
            }
            ClientMessage::Complete { total_chunks, .. } => {
                match self.session.on_complete(total_chunks, &self.state.chunks) {
                    CompleteAction::Reply(replies) => self.send_all(ctx, &replies),
                    CompleteAction::Finish {
                        round_id,
                        mime_type,
                        total_chunks,
                    } => {
                        if self.completing {
                            debug!(round_id = %round_id, "completion already in flight, dropping duplicate");
                            return;
                        }
                        self.completing = true;

                        let state = self.state.clone();
                        let addr = ctx.address();
                        tokio::spawn(async move {
                            let outcome = complete_round(
                                &round_id,
                                &mime_type,
                                total_chunks,
                                &state.chunks,
                                &state.rounds,
                                &state.queue,
                            )
                            .await;
                            addr.do_send(CompleteOutcome(outcome));
                        });
                    }
                }
            }
            ClientMessage::Ping => Self::send(ctx, &ServerMessage::Pong),
        }
    }
}

/// Result of the spawned completion task, posted back to the actor.
#[derive(Message)]
#[rtype(result = "()")]
struct CompleteOutcome(Result<ServerMessage, AppError>);

impl Actor for IngestWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session.session_id, "stream connection opened");
        self.state.increment_active_streams();

        // Liveness pings only; no protocol timeout is enforced here. A dead
        // peer is eventually surfaced by the transport.
        ctx.run_interval(self.heartbeat, |_act, ctx| {
            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.session.close();
        self.state.decrement_active_streams();
        info!(
            session_id = %self.session.session_id,
            round_id = self.session.round_id().unwrap_or("-"),
            chunks = self.session.total_received(),
            "stream connection closed"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for IngestWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => self.handle_control(&text, ctx),
            Ok(ws::Message::Binary(payload)) => {
                let replies = self.session.on_binary(&payload, &self.state.chunks);
                self.send_all(ctx, &replies);
            }
            Ok(ws::Message::Ping(payload)) => ctx.pong(&payload),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                debug!(session_id = %self.session.session_id, ?reason, "client closed stream");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                Self::send(
                    ctx,
                    &ServerMessage::Error {
                        code: "INVALID_MESSAGE".to_string(),
                        message: "fragmented frames are not supported".to_string(),
                    },
                );
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!(session_id = %self.session.session_id, error = %e, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<CompleteOutcome> for IngestWebSocket {
    type Result = ();

    fn handle(&mut self, msg: CompleteOutcome, ctx: &mut Self::Context) {
        self.completing = false;
        match msg.0 {
            Ok(reply) => Self::send(ctx, &reply),
            Err(err) => {
                // Round stayed `streaming`; the client may back off and retry
                // the complete.
                warn!(
                    session_id = %self.session.session_id,
                    error = %err,
                    "round completion failed"
                );
                Self::send(
                    ctx,
                    &ServerMessage::Error {
                        code: err.ws_code(),
                        message: err.to_string(),
                    },
                );
            }
        }
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to a fresh actor.
pub async fn stream_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    debug!(peer = ?req.connection_info().peer_addr(), "stream connection request");
    ws::start(IngestWebSocket::new(state), &req, stream)
}
