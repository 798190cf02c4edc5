use std::sync::Arc;

use crate::Sentinel;

#[derive(Clone)]
pub struct AppState {
    pub sentinel: Arc<Sentinel>,
}
