//! State shared by every installed route.

use crate::auth::AuthService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    /// Answered on `GET /`.
    pub service_name: Arc<str>,
}

impl AppState {
    pub fn new(auth: AuthService, service_name: impl Into<Arc<str>>) -> Self {
        AppState {
            auth,
            service_name: service_name.into(),
        }
    }
}
