use super::{CatwatchOrchestrator, ComponentState};
use std::collections::HashMap;
use tracing::debug;

impl CatwatchOrchestrator {
    pub async fn set_component_state(&self, component: &str, state: ComponentState) {
        let previous = self
            .component_states
            .lock()
            .await
            .insert(component.to_string(), state.clone());
        if previous.as_ref() != Some(&state) {
            debug!(component, from = ?previous, to = ?state, "Component state changed");
        }
    }

    pub async fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().await.get(component).cloned()
    }

    pub async fn get_all_component_states(&self) -> HashMap<String, ComponentState> {
        self.component_states.lock().await.clone()
    }

    /// Names of components in [`ComponentState::Failed`], sorted
    pub async fn failed_components(&self) -> Vec<String> {
        let mut failed: Vec<String> = self
            .component_states
            .lock()
            .await
            .iter()
            .filter(|(_, state)| **state == ComponentState::Failed)
            .map(|(name, _)| name.clone())
            .collect();
        failed.sort();
        failed
    }
}
