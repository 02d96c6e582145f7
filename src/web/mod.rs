pub mod handlers;
pub mod models;
pub mod routes;

use std::sync::Mutex as StdMutex;

use log::info;
use tera::Tera;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chat::ChatSession;
use crate::model::{ChatTransport, GenerationConfig};

pub type SharedSession = ChatSession<Box<dyn ChatTransport>>;

// App state shared by every worker
pub struct AppState {
    pub tera: Tera,
    pub defaults: GenerationConfig,
    pub session: Mutex<SharedSession>,
    in_flight: StdMutex<Option<(Uuid, CancellationToken)>>,
}

impl AppState {
    pub fn new(tera: Tera, defaults: GenerationConfig, session: SharedSession) -> Self {
        Self {
            tera,
            defaults,
            session: Mutex::new(session),
            in_flight: StdMutex::new(None),
        }
    }

    /// Registers a new turn, cancelling whichever turn is still streaming.
    pub fn begin_turn(&self) -> (Uuid, CancellationToken) {
        let key = Uuid::new_v4();
        let token = CancellationToken::new();
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((previous, old)) = in_flight.replace((key, token.clone())) {
            info!("Cancelling in-flight turn {} for a new prompt", previous);
            old.cancel();
        }
        (key, token)
    }

    pub fn finish_turn(&self, key: Uuid) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(in_flight.as_ref(), Some((current, _)) if *current == key) {
            *in_flight = None;
        }
    }

    /// Returns whether there was a turn to cancel.
    pub fn cancel_in_flight(&self) -> bool {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        match in_flight.take() {
            Some((key, token)) => {
                info!("Cancelling turn {} on request", key);
                token.cancel();
                true
            }
            None => false,
        }
    }
}
