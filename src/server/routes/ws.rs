//! WebSocket progress subscription.
//!
//! On connect the current job state is emitted immediately, then frames
//! flow as the job writer produces them, with a periodic re-emit so idle
//! watchers still see liveness. `ping` elicits `pong`, `status` re-emits
//! the current state. When the job reaches a terminal state the final
//! frame is followed by a normal close carrying the state as reason.

use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;

use crate::progress::ProgressFrame;
use crate::server::state::AppState;

pub async fn watch_job(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, job_id, state))
}

async fn handle_socket(mut socket: WebSocket, job_id: String, state: AppState) {
    let Some(job) = state.jobs.get_job(&job_id).await else {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "unknown job".into(),
            })))
            .await;
        return;
    };

    let mut subscription = state
        .progress
        .subscribe(&job_id, ProgressFrame::from_job(&job));
    let mut ticker = tokio::time::interval(Duration::from_secs(
        state.config.jobs.progress_interval_secs.max(1),
    ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = subscription.receiver.recv() => {
                match frame {
                    Some(frame) => {
                        if forward_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                        if frame.state.is_terminal() {
                            let _ = socket
                                .send(Message::Close(Some(CloseFrame {
                                    code: close_code::NORMAL,
                                    reason: format!("job {}", frame.state.tag()).into(),
                                })))
                                .await;
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                let Some(job) = state.jobs.get_job(&job_id).await else {
                    break;
                };
                let frame = ProgressFrame::from_job(&job);
                let terminal = frame.state.is_terminal();
                if forward_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
                if terminal {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: format!("job {}", frame.state.tag()).into(),
                        })))
                        .await;
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match text.as_str() {
                        "ping" => {
                            if socket.send(Message::Text("pong".into())).await.is_err() {
                                break;
                            }
                        }
                        "status" => {
                            if let Some(job) = state.jobs.get_job(&job_id).await {
                                let frame = ProgressFrame::from_job(&job);
                                if forward_frame(&mut socket, &frame).await.is_err() {
                                    break;
                                }
                            }
                        }
                        _ => {}
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(job_id, error = %err, "websocket receive error");
                        let _ = socket
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::ERROR,
                                reason: "internal error".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        }
    }

    state.progress.unsubscribe(subscription.id);
}

async fn forward_frame(socket: &mut WebSocket, frame: &ProgressFrame) -> Result<(), ()> {
    let payload = serde_json::to_string(frame).map_err(|_| ())?;
    socket
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}
