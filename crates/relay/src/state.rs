//! Shared state for the relay routes

use std::sync::Arc;

use agora_config::{AuthConfig, RelayConfig};

use crate::claims::TokenVerifier;
use crate::coordinator::CoordinatorHandle;
use crate::store::RelayStore;

#[derive(Clone)]
pub struct RelayState {
    pub coordinator: CoordinatorHandle,
    pub store: Arc<dyn RelayStore>,
    pub verifier: Arc<TokenVerifier>,
    pub config: Arc<RelayConfig>,
}

impl RelayState {
    pub fn new(
        coordinator: CoordinatorHandle,
        store: Arc<dyn RelayStore>,
        auth: &AuthConfig,
        config: RelayConfig,
    ) -> Self {
        Self {
            coordinator,
            store,
            verifier: Arc::new(TokenVerifier::new(auth)),
            config: Arc::new(config),
        }
    }
}
