//! Signed-in user session.

use parking_lot::RwLock;
use std::sync::Arc;

/// Session token shared by a client and its clones.
#[derive(Debug, Clone, Default)]
pub struct Session {
    token: Arc<RwLock<Option<String>>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
        tracing::info!("Session signed in");
    }

    pub fn sign_out(&self) {
        if self.token.write().take().is_some() {
            tracing::info!("Session signed out");
        }
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.token.read().is_some()
    }
}
