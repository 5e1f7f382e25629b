//! Session configuration (§6 configuration key table).
//!
//! **[SUPPLEMENT]** Entirely new relative to the teacher, which exposes no
//! config surface at all — a `Graph` is built and executed directly.
//! Grounded on the `ort`-style builder pattern from the broader example pack
//! (`IntelligentRoboticsLab-yggdrasil` `crates/ml-ort/src/backend.rs`:
//! `Session::builder().with_optimization_level(...)`), adapted into a plain
//! `Config` value plus a fluent builder rather than a session-owned builder
//! type, since this runtime's `Session::create` takes a `Config` up front.

use crate::errors::{GPError, GPResult};
use crate::graph::optimizer::OptimizationLevel;
use crate::types::DataType;
use serde::{Deserialize, Serialize};

/// Which scheduler a session drives `run`/`run_async` through. Not itself a
/// key in §6's table — the spec leaves scheduler choice as an
/// implementation-level decision distinct from the optimization-level key —
/// but `Session` needs some way to pick among the three scheduler variants
/// of §4.7, so it is exposed here as an ordinary config field, recorded as
/// an open-question resolution in `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerKind {
    Topological,
    Pipeline { stages: usize },
    Parallel,
}

impl Default for SchedulerKind {
    fn default() -> Self {
        SchedulerKind::Topological
    }
}

/// Recognized configuration keys of §6, reshaped into a typed struct rather
/// than a string-keyed map — the teacher has no analogous config type to
/// generalize, so the field set follows the spec's table directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub execution_providers: Vec<String>,
    pub device_id: u32,
    pub graph_optimization_level: OptimizationLevel,
    pub enable_operator_fusion: bool,
    pub scheduler: SchedulerKind,
    pub num_threads: usize,
    pub enable_profiling: bool,
    pub memory_pool_size: usize,
    pub quantization_dtype: Option<DataType>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            execution_providers: vec!["cpu".to_string()],
            device_id: 0,
            graph_optimization_level: OptimizationLevel::default(),
            enable_operator_fusion: true,
            scheduler: SchedulerKind::default(),
            num_threads: 0,
            enable_profiling: false,
            memory_pool_size: 0,
            quantization_dtype: None,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Worker count the parallel scheduler should use; 0 means hardware
    /// parallelism (§6).
    pub fn resolved_thread_count(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            self.num_threads
        }
    }

    /// Serializes this configuration to pretty-printed JSON (§6 external
    /// interfaces), the same `serde_json` round trip the teacher uses to
    /// persist a `Graph`.
    pub fn to_json(&self) -> GPResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GPError::SerializationError(format!("failed to serialize config: {e}")))
    }

    /// Loads a configuration previously written by [`Config::to_json`].
    pub fn from_json(json: &str) -> GPResult<Config> {
        serde_json::from_str(json)
            .map_err(|e| GPError::SerializationError(format!("failed to deserialize config: {e}")))
    }
}

/// Fluent builder mirroring `ort::session::builder::SessionBuilder`'s
/// `with_*` chaining, adapted to build a plain `Config` value instead of
/// committing a session in place.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn with_execution_providers(mut self, providers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.execution_providers = providers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_device_id(mut self, device_id: u32) -> Self {
        self.config.device_id = device_id;
        self
    }

    pub fn with_optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.config.graph_optimization_level = level;
        self
    }

    pub fn with_operator_fusion(mut self, enabled: bool) -> Self {
        self.config.enable_operator_fusion = enabled;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerKind) -> Self {
        self.config.scheduler = scheduler;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.config.num_threads = num_threads;
        self
    }

    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.config.enable_profiling = enabled;
        self
    }

    pub fn with_memory_pool_size(mut self, bytes: usize) -> Self {
        self.config.memory_pool_size = bytes;
        self
    }

    pub fn with_quantization_dtype(mut self, dtype: Option<DataType>) -> Self {
        self.config.quantization_dtype = dtype;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let cfg = Config::builder()
            .with_execution_providers(["cuda", "cpu"])
            .with_optimization_level(OptimizationLevel::Basic)
            .with_num_threads(4)
            .build();
        assert_eq!(cfg.execution_providers, vec!["cuda".to_string(), "cpu".to_string()]);
        assert_eq!(cfg.graph_optimization_level, OptimizationLevel::Basic);
        assert_eq!(cfg.resolved_thread_count(), 4);
    }

    #[test]
    fn zero_threads_resolves_to_hardware_parallelism() {
        let cfg = Config::default();
        assert!(cfg.resolved_thread_count() >= 1);
    }

    #[test]
    fn json_round_trip_preserves_every_field() {
        let cfg = Config::builder()
            .with_execution_providers(["cuda", "cpu"])
            .with_optimization_level(OptimizationLevel::All)
            .with_scheduler(SchedulerKind::Pipeline { stages: 3 })
            .with_quantization_dtype(Some(DataType::F32))
            .build();

        let json = cfg.to_json().unwrap();
        let back = Config::from_json(&json).unwrap();
        assert_eq!(back.execution_providers, cfg.execution_providers);
        assert_eq!(back.graph_optimization_level, cfg.graph_optimization_level);
        assert_eq!(back.scheduler, cfg.scheduler);
        assert_eq!(back.quantization_dtype, cfg.quantization_dtype);
    }
}
