use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::pipeline::TriageService;

/// Estado compartido entre los handlers de la API.
#[derive(Clone)]
pub struct AppState {
    pub servicio: Arc<TriageService>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
