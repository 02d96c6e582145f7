use std::convert::Infallible;

use actix_web::web::Bytes;
use actix_web::{web, HttpResponse, Responder};
use futures::Stream;
use log::{error, info};
use serde_json::json;
use tera::Context;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::chat::{Publisher, TurnEvent};
use crate::model::catalog;
use crate::model::settings::{MAX_TOKENS_RANGE, TEMPERATURE_RANGE, TOP_P_RANGE};
use crate::web::models::{ChatRequest, ErrorResponse, HistoryResponse};
use crate::web::AppState;

// Index page handler
pub async fn index(data: web::Data<AppState>) -> impl Responder {
    let transcript = data.session.lock().await.history().transcript().to_vec();

    let mut context = Context::new();
    context.insert("models", catalog::MODELS);
    context.insert("defaults", &data.defaults);
    context.insert("messages", &transcript);
    context.insert("temperature_range", &TEMPERATURE_RANGE);
    context.insert("top_p_range", &TOP_P_RANGE);
    context.insert("max_tokens_range", &MAX_TOKENS_RANGE);

    match data.tera.render("index.html", &context) {
        Ok(html) => HttpResponse::Ok().content_type("text/html").body(html),
        Err(e) => {
            error!("Template error: {}", e);
            HttpResponse::InternalServerError().body("Template error")
        }
    }
}

// Health check endpoint
pub async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

pub async fn models() -> impl Responder {
    HttpResponse::Ok().json(catalog::MODELS)
}

pub async fn history(data: web::Data<AppState>) -> impl Responder {
    let session = data.session.lock().await;
    HttpResponse::Ok().json(HistoryResponse {
        session_id: session.id(),
        state: session.state(),
        messages: session.history().transcript().to_vec(),
    })
}

// Chat API endpoint: streams turn events as server-sent events
pub async fn chat(data: web::Data<AppState>, req: web::Json<ChatRequest>) -> impl Responder {
    let req = req.into_inner();

    if req.message.trim().is_empty() {
        return bad_request("prompt is empty");
    }
    let config = match req.generation_config(&data.defaults) {
        Ok(config) => config,
        Err(e) => return bad_request(e.to_string()),
    };

    let (turn_key, cancel) = data.begin_turn();
    let (tx, rx) = mpsc::unbounded_channel();
    let state = data.clone();

    actix_web::rt::spawn(async move {
        let mut publisher = ChannelPublisher {
            tx,
            cancel: cancel.clone(),
        };
        let mut session = state.session.lock().await;
        match session.submit(&req.message, &config, &cancel, &mut publisher).await {
            Ok(outcome) => info!("Turn {} streamed to client", outcome.turn_id),
            Err(e) => info!("Turn ended without a reply: {}", e),
        }
        drop(session);
        state.finish_turn(turn_key);
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(event_stream(rx))
}

pub async fn cancel(data: web::Data<AppState>) -> impl Responder {
    let cancelled = data.cancel_in_flight();
    HttpResponse::Ok().json(json!({ "cancelled": cancelled }))
}

// Starts a fresh conversation
pub async fn reset(data: web::Data<AppState>) -> impl Responder {
    data.cancel_in_flight();
    let mut session = data.session.lock().await;
    session.restart();
    HttpResponse::Ok().json(json!({ "session_id": session.id() }))
}

fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        error: message.into(),
    })
}

/// Forwards turn events to the response body. A closed body means the
/// client went away, so the turn is cancelled.
struct ChannelPublisher {
    tx: UnboundedSender<TurnEvent>,
    cancel: CancellationToken,
}

impl Publisher for ChannelPublisher {
    fn publish(&mut self, event: TurnEvent) {
        if self.tx.send(event).is_err() && !self.cancel.is_cancelled() {
            info!("Client disconnected, cancelling turn");
            self.cancel.cancel();
        }
    }
}

fn event_stream(
    rx: UnboundedReceiver<TurnEvent>,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok(sse_frame(&event)), rx))
    })
}

pub fn sse_frame(event: &TurnEvent) -> Bytes {
    match serde_json::to_string(event) {
        Ok(json) => Bytes::from(format!("data: {}\n\n", json)),
        Err(e) => {
            error!("Failed to encode turn event: {}", e);
            Bytes::new()
        }
    }
}
