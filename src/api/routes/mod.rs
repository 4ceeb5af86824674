//! API route modules.

pub mod sessions;
pub mod webhook;

use crate::approval::ApprovalPoller;
use crate::ingress::IngressGuard;
use crate::session::SessionManager;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub ingress: IngressGuard,
    pub sessions: SessionManager,
    pub poller: ApprovalPoller,
}
