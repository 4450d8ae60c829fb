//! Wire protocol server.
//!
//! Accepts TCP connections carrying newline-delimited JSON frames. A
//! connection binds to at most one session: the first accepted frame must
//! be `join-room`, after which negotiation, connectivity, and billing
//! control frames are dispatched to that session's actor. Frames a client
//! has no business sending (server-originated broadcasts) are dropped.
//!
//! The sender identity of every frame must match the joined participant;
//! a frame claiming another sender is rejected without touching session
//! state.

use crate::actors::{SessionActorHandle, SessionSupervisorHandle};
use crate::errors::ScError;

use chrono::Utc;
use common::{ParticipantId, SessionId};
use futures::{SinkExt, StreamExt};
use signal_protocol::{codec, WireMessage, MAX_FRAME_BYTES};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outbound frame buffer per connection.
const OUTBOUND_BUFFER: usize = 64;

/// Accept loop. Runs until cancelled.
pub async fn run_wire_server(
    listener: TcpListener,
    supervisor: SessionSupervisorHandle,
    cancel_token: CancellationToken,
) {
    info!(target: "sc.server", "Wire server accepting connections");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(target: "sc.server", "Wire server shutting down");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!(target: "sc.server", %peer_addr, "Connection accepted");
                        let supervisor = supervisor.clone();
                        let conn_token = cancel_token.child_token();
                        tokio::spawn(async move {
                            handle_connection(stream, supervisor, conn_token).await;
                        });
                    }
                    Err(e) => {
                        warn!(target: "sc.server", error = %e, "Accept failed");
                    }
                }
            }
        }
    }
}

/// Per-connection session binding.
struct Binding {
    handle: SessionActorHandle,
    participant_id: ParticipantId,
}

/// Drive one connection until it closes or the server shuts down.
async fn handle_connection(
    stream: TcpStream,
    supervisor: SessionSupervisorHandle,
    cancel_token: CancellationToken,
) {
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
    let (mut sink, mut frames) = framed.split();

    let (out_tx, mut out_rx) = mpsc::channel::<WireMessage>(OUTBOUND_BUFFER);

    // Writer half: drain outbound frames onto the socket.
    let writer_token = cancel_token.child_token();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_token.cancelled() => break,
                frame = out_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let line = match codec::encode(&frame) {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(target: "sc.server", error = %e, "Failed to encode frame");
                            continue;
                        }
                    };
                    if sink.send(line).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut binding: Option<Binding> = None;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,

            next = frames.next() => {
                let Some(next) = next else { break };
                let line = match next {
                    Ok(line) => line,
                    Err(e) => {
                        debug!(target: "sc.server", error = %e, "Read failed, closing connection");
                        break;
                    }
                };

                let frame = match codec::decode(&line) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(target: "sc.server", error = %e, "Undecodable frame dropped");
                        continue;
                    }
                };

                if dispatch_frame(frame, &supervisor, &out_tx, &mut binding).await {
                    break;
                }
            }
        }
    }

    // The transport is gone: release relay bookkeeping for this peer.
    if let Some(binding) = binding {
        let _ = binding.handle.peer_closed(binding.participant_id).await;
    }

    cancel_token.cancel();
    let _ = writer.await;
}

/// Dispatch one inbound frame. Returns `true` when the connection should
/// close.
async fn dispatch_frame(
    frame: WireMessage,
    supervisor: &SessionSupervisorHandle,
    out_tx: &mpsc::Sender<WireMessage>,
    binding: &mut Option<Binding>,
) -> bool {
    let session_id = frame.session_id();

    match frame {
        WireMessage::JoinRoom {
            session_id,
            sender_id,
            role,
        } => {
            if let Some(bound) = binding {
                // Idempotent rejoin of the same session is fine; switching
                // sessions on a live connection is not.
                if bound.handle.session_id() != session_id
                    || bound.participant_id != sender_id
                {
                    send_error(
                        out_tx,
                        session_id,
                        &ScError::Conflict("Connection is already bound to a session".to_string()),
                    )
                    .await;
                    return false;
                }
            }

            let handle = match supervisor.open_session(session_id).await {
                Ok(handle) => handle,
                Err(e) => {
                    send_error(out_tx, session_id, &e).await;
                    return false;
                }
            };

            match handle.join(sender_id, role, out_tx.clone()).await {
                Ok(_result) => {
                    *binding = Some(Binding {
                        handle,
                        participant_id: sender_id,
                    });
                }
                Err(e) => {
                    send_error(out_tx, session_id, &e).await;
                }
            }
            false
        }

        WireMessage::LeaveRoom {
            session_id,
            sender_id,
        } => {
            let Some(bound) = authorized(binding, session_id, sender_id, out_tx).await else {
                return false;
            };
            if let Err(e) = bound.handle.leave(sender_id).await {
                send_error(out_tx, session_id, &e).await;
            }
            *binding = None;
            false
        }

        frame @ (WireMessage::Offer { .. }
        | WireMessage::Answer { .. }
        | WireMessage::Candidate { .. }) => {
            let sender_id = match &frame {
                WireMessage::Offer { sender_id, .. }
                | WireMessage::Answer { sender_id, .. }
                | WireMessage::Candidate { sender_id, .. } => *sender_id,
                _ => return false,
            };
            let Some(bound) = authorized(binding, session_id, sender_id, out_tx).await else {
                return false;
            };

            let Some(message) = frame.into_signaling(Utc::now()) else {
                return false;
            };
            if let Err(e) = bound.handle.signal(message).await {
                send_error(out_tx, session_id, &e).await;
            }
            false
        }

        WireMessage::ConnectionState {
            session_id,
            sender_id,
            state,
        } => {
            let Some(bound) = authorized(binding, session_id, sender_id, out_tx).await else {
                return false;
            };
            let _ = bound.handle.raw_signal(sender_id, state).await;
            false
        }

        WireMessage::PauseBilling {
            session_id,
            sender_id,
        } => {
            let Some(bound) = authorized(binding, session_id, sender_id, out_tx).await else {
                return false;
            };
            if let Err(e) = bound.handle.pause_billing(sender_id).await {
                send_error(out_tx, session_id, &e).await;
            }
            false
        }

        WireMessage::ResumeBilling {
            session_id,
            sender_id,
        } => {
            let Some(bound) = authorized(binding, session_id, sender_id, out_tx).await else {
                return false;
            };
            if let Err(e) = bound.handle.resume_billing(sender_id).await {
                send_error(out_tx, session_id, &e).await;
            }
            false
        }

        // Server-originated frames have no business arriving from clients.
        WireMessage::SessionStarted { .. }
        | WireMessage::SessionEnded { .. }
        | WireMessage::BillingUpdate { .. }
        | WireMessage::Renegotiate { .. }
        | WireMessage::Error { .. } => {
            debug!(
                target: "sc.server",
                session_id = %session_id,
                "Client sent a server-only frame, dropped"
            );
            false
        }
    }
}

/// Check that the connection is bound to this session as this sender.
async fn authorized<'a>(
    binding: &'a Option<Binding>,
    session_id: SessionId,
    sender_id: ParticipantId,
    out_tx: &mpsc::Sender<WireMessage>,
) -> Option<&'a Binding> {
    match binding {
        Some(bound)
            if bound.handle.session_id() == session_id
                && bound.participant_id == sender_id =>
        {
            Some(bound)
        }
        _ => {
            send_error(
                out_tx,
                session_id,
                &ScError::Authorization("Connection is not joined as this sender".to_string()),
            )
            .await;
            None
        }
    }
}

/// Surface an error to the connection as an `error` frame.
async fn send_error(out_tx: &mpsc::Sender<WireMessage>, session_id: SessionId, error: &ScError) {
    let frame = WireMessage::Error {
        session_id,
        code: error.error_code(),
        message: error.client_message(),
    };
    if out_tx.send(frame).await.is_err() {
        debug!(target: "sc.server", "Connection gone before error could be sent");
    }
}
