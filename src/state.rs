use std::sync::Arc;

use crate::{auth::jwt::JwtService, config::AppConfig, service::DocumentService};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub documents: DocumentService,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(config: AppConfig, documents: DocumentService, jwt: JwtService) -> Self {
        Self {
            config: Arc::new(config),
            documents,
            jwt,
        }
    }
}
