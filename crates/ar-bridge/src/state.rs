//! Shared state for all HTTP handlers.

use ar_engine::Engine;

/// Handler state: just the engine handle. Kept as a struct so the surface
/// can grow process-local concerns without touching every handler.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Engine,
}

impl ApiState {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}
