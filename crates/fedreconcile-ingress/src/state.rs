//! Shared handler state

use fedreconcile_core::{IdentityStore, TokenCodec};
use fedreconcile_egress::ValidationService;
use fedreconcile_observability::Metrics;
use fedreconcile_storage::LeaseRegistry;
use std::sync::Arc;

/// Default cap on a relay request body (both files together)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub codec: Arc<TokenCodec>,
    pub identities: Arc<dyn IdentityStore>,
    pub validator: Arc<dyn ValidationService>,
    pub leases: Arc<LeaseRegistry>,
    pub metrics: Arc<Metrics>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        codec: Arc<TokenCodec>,
        identities: Arc<dyn IdentityStore>,
        validator: Arc<dyn ValidationService>,
        leases: Arc<LeaseRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            codec,
            identities,
            validator,
            leases,
            metrics,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}
