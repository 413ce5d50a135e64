use std::sync::Arc;

use config::Config;
use profile::ProfileLookup;
use store::DocumentStore;

pub mod config;
pub mod error;
pub mod geocell;
pub mod location;
pub mod middleware;
pub mod models;
pub mod presence;
pub mod profile;
pub mod request;
pub mod result;
pub mod router;
pub mod routes;
pub mod store;
pub mod tracker;
pub mod utils;
pub mod watch;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub profiles: Arc<dyn ProfileLookup>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        profiles: Arc<dyn ProfileLookup>,
        config: Config,
    ) -> Self {
        Self {
            store,
            profiles,
            config: Arc::new(config),
        }
    }
}
