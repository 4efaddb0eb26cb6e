pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod refine;
pub mod routes;
pub mod telemetry;
pub mod waitlist;

use std::sync::Arc;

use config::Config;
use llm::TextGenerationService;
use pipeline::Reasoner;
use refine::TextRefiner;
use waitlist::WaitlistStore;

#[derive(Clone)]
pub struct AppState {
    pub reasoner: Arc<Reasoner>,
    pub refiner: Arc<TextRefiner>,
    pub waitlist: Arc<WaitlistStore>,
}

impl AppState {
    pub fn new(service: Arc<dyn TextGenerationService>, config: &Config) -> Self {
        Self::with_services(service.clone(), service, config)
    }

    /// Refinement shares the utility service with decomposition.
    pub fn with_services(
        utility: Arc<dyn TextGenerationService>,
        reasoner: Arc<dyn TextGenerationService>,
        config: &Config,
    ) -> Self {
        Self {
            reasoner: Arc::new(Reasoner::with_services(utility.clone(), reasoner, config)),
            refiner: Arc::new(TextRefiner::new(utility, config.refiner.clone())),
            waitlist: Arc::new(WaitlistStore::new(&config.waitlist_path)),
        }
    }
}
