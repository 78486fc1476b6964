use std::sync::Arc;

use pulse_mcp_runtime::HealthService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<HealthService>,
}

impl AppState {
    pub fn new(service: HealthService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

#[cfg(test)]
pub fn test_state() -> AppState {
    use pulse_mcp_runtime::RuntimeConfig;

    AppState::new(
        HealthService::from_config(&RuntimeConfig::default())
            .expect("built-in scaffolds should load"),
    )
}
