/// Support ticket and chat endpoints
use super::{ApiJson, ApiQuery};
use crate::{
    auth::Session,
    context::AppContext,
    error::RentalResult,
    support::{CreateTicketRequest, Message, Ticket, TicketFilter, TicketStatus},
};
use axum::{
    extract::{
        ws::{self, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::extract::WithRejection;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/support", get(support_chat))
        .route("/api/tickets/:id", get(get_ticket))
        .route("/api/tickets/:id/status", patch(update_status))
        .route("/api/tickets/:id/messages", post(post_message))
        .route("/api/tickets/:id/watch", get(watch_ticket))
}

#[derive(Debug, Serialize)]
pub(super) struct TicketListResponse {
    pub tickets: Vec<Ticket>,
}

async fn list_tickets(
    State(ctx): State<AppContext>,
    session: Session,
    WithRejection(Query(filter), _): ApiQuery<TicketFilter>,
) -> RentalResult<Json<TicketListResponse>> {
    let tickets = ctx.ticket_manager.list_for_user(&session, &filter).await?;
    Ok(Json(TicketListResponse { tickets }))
}

async fn create_ticket(
    State(ctx): State<AppContext>,
    session: Session,
    WithRejection(Json(request), _): ApiJson<CreateTicketRequest>,
) -> RentalResult<(StatusCode, Json<Ticket>)> {
    let ticket = ctx.ticket_manager.create_ticket(&session, request).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// The caller's support chat, opened on first visit
async fn support_chat(
    State(ctx): State<AppContext>,
    session: Session,
) -> RentalResult<Json<Ticket>> {
    let ticket = ctx
        .ticket_manager
        .find_or_create_support_ticket(&session)
        .await?;
    Ok(Json(ticket))
}

async fn get_ticket(
    State(ctx): State<AppContext>,
    session: Session,
    Path(id): Path<String>,
) -> RentalResult<Json<Ticket>> {
    let ticket = ctx
        .ticket_manager
        .get_ticket_with_messages(&session, &id)
        .await?;
    Ok(Json(ticket))
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: TicketStatus,
}

async fn update_status(
    State(ctx): State<AppContext>,
    session: Session,
    Path(id): Path<String>,
    WithRejection(Json(request), _): ApiJson<StatusRequest>,
) -> RentalResult<Json<Ticket>> {
    let ticket = ctx
        .ticket_manager
        .update_status(&session, &id, request.status)
        .await?;
    Ok(Json(ticket))
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    text: String,
}

async fn post_message(
    State(ctx): State<AppContext>,
    session: Session,
    Path(id): Path<String>,
    WithRejection(Json(request), _): ApiJson<MessageRequest>,
) -> RentalResult<(StatusCode, Json<Message>)> {
    let message = ctx
        .ticket_manager
        .append_message(&session, &id, &request.text)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Push ticket snapshots over a WebSocket while the view is open
///
/// Access is checked before the upgrade so unauthorized callers get a plain
/// JSON error instead of a socket.
async fn watch_ticket(
    ws: WebSocketUpgrade,
    State(ctx): State<AppContext>,
    session: Session,
    Path(id): Path<String>,
) -> RentalResult<Response> {
    let cancel = CancellationToken::new();
    let updates = ctx
        .ticket_poller
        .watch(session, id.clone(), cancel.clone())
        .await?;

    Ok(ws.on_upgrade(move |socket| stream_ticket(socket, id, updates, cancel)))
}

async fn stream_ticket(
    socket: WebSocket,
    ticket_id: String,
    mut updates: mpsc::Receiver<Ticket>,
    cancel: CancellationToken,
) {
    // Polling stops when this view goes away, however the loop exits
    let _guard = cancel.drop_guard();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(ticket) = update else { break };
                let json = match serde_json::to_string(&ticket) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to encode ticket {}: {}", ticket_id, e);
                        break;
                    }
                };
                if sender.send(ws::Message::Text(json)).await.is_err() {
                    tracing::debug!("Watcher of ticket {} disconnected during send", ticket_id);
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(ws::Message::Close(_))) | None => {
                        tracing::debug!("Watcher of ticket {} closed the connection", ticket_id);
                        break;
                    }
                    Some(Ok(ws::Message::Ping(data))) => {
                        if sender.send(ws::Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error on ticket {}: {}", ticket_id, e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    let _ = sender.send(ws::Message::Close(None)).await;
}
