//! Provider registry and per-node selector (§4.5 "Selector").
//!
//! Write-once at startup, read-only afterward (§5), mirroring
//! `operator::registry::OperatorRegistry`.

use super::ExecutionProvider;
use crate::errors::{GPError, GPResult};
use std::collections::HashMap;
use std::sync::Arc;

pub struct ExecutionProviderRegistry {
    providers: HashMap<String, Arc<dyn ExecutionProvider>>,
}

impl ExecutionProviderRegistry {
    pub fn new() -> Self {
        Self { providers: HashMap::new() }
    }

    pub fn register(&mut self, provider: Arc<dyn ExecutionProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExecutionProvider>> {
        self.providers.get(name).cloned()
    }

    /// Picks the first provider in `preference_order` that supports
    /// `op_type` and reports itself available, falling back to `"cpu"`.
    /// `NotFound` if neither the preference list nor CPU can serve it.
    pub fn select(&self, op_type: &str, preference_order: &[String]) -> GPResult<Arc<dyn ExecutionProvider>> {
        for name in preference_order {
            if let Some(p) = self.providers.get(name) {
                if p.is_available() && p.supports(op_type) {
                    return Ok(p.clone());
                }
            }
        }
        if let Some(cpu) = self.providers.get("cpu") {
            if cpu.supports(op_type) {
                return Ok(cpu.clone());
            }
        }
        Err(GPError::NotFound(format!(
            "no execution provider (from {:?} or cpu fallback) supports op-type '{op_type}'",
            preference_order
        )))
    }
}

impl Default for ExecutionProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuProvider;
    use crate::operator::registry::OperatorRegistry;

    #[test]
    fn selector_falls_back_to_cpu() {
        let mut reg = ExecutionProviderRegistry::new();
        reg.register(Arc::new(CpuProvider::new(Arc::new(OperatorRegistry::with_builtins()))));
        let chosen = reg.select("Relu", &["gpu".to_string()]).unwrap();
        assert_eq!(chosen.name(), "cpu");
    }

    #[test]
    fn selector_reports_not_found_for_unsupported_op() {
        let mut reg = ExecutionProviderRegistry::new();
        reg.register(Arc::new(CpuProvider::new(Arc::new(OperatorRegistry::with_builtins()))));
        assert!(reg.select("Xyzzy", &[]).is_err());
    }
}
