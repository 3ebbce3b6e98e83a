//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the read-only configuration, the identity provider used for code
//! exchange, and the session store. Nothing else is shared between browser
//! sessions.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::auth::FlowOptions;
use crate::services::google::IdentityProvider;
use crate::services::session::SessionStore;

/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub provider: Arc<dyn IdentityProvider>,
    pub sessions: SessionStore,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, provider: Arc<dyn IdentityProvider>) -> Self {
        let sessions = SessionStore::new(config.session_idle, config.session_max);
        Self { config: Arc::new(config), provider, sessions }
    }

    #[must_use]
    pub fn flow_options(&self) -> FlowOptions {
        FlowOptions { verify_state: self.config.verify_state }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
