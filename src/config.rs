//! Schedule configuration and schedule scripts.
//!
//! A script lists primitive invocations that address blocks by name:
//!
//! ```json
//! {
//!   "steps": [
//!     { "primitive": "cache_read", "block": "C", "read_index": 0, "memory": "shared" },
//!     { "primitive": "sync_threads", "block": "C", "loop_depth": 0, "after": false },
//!     { "primitive": "set_buffer", "block": "D", "memory": "local", "fixed": true }
//!   ]
//! }
//! ```

use crate::ir::tensor::{DeviceApi, MemoryScope};
use crate::schedule::{ErrorMessageLevel, Primitive};
use crate::utils::errors::TenschedResult;
use serde::{Serialize, Deserialize};

/// Configuration of a schedule session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Device stamped on synthesized loops and buffers
    pub device: DeviceApi,
    /// Verbosity of diagnostics
    pub error_level: ErrorMessageLevel,
    /// Abort on the first violation instead of reporting it
    pub strict: bool,
}

impl ScheduleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: DeviceApi) -> Self {
        self.device = device;
        self
    }

    pub fn with_error_level(mut self, level: ErrorMessageLevel) -> Self {
        self.error_level = level;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// One primitive invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "primitive", rename_all = "snake_case")]
pub enum ScheduleStep {
    CacheRead {
        block: String,
        read_index: usize,
        memory: MemoryScope,
    },
    CacheWrite {
        block: String,
        write_index: usize,
        memory: MemoryScope,
    },
    /// Barrier next to the block, or next to its `loop_depth`-th enclosing
    /// loop (outermost is 0)
    SyncThreads {
        block: String,
        #[serde(default)]
        loop_depth: Option<usize>,
        #[serde(default)]
        after: bool,
    },
    SetBuffer {
        block: String,
        memory: MemoryScope,
        #[serde(default)]
        fixed: bool,
    },
}

impl ScheduleStep {
    /// Name of the block the step addresses.
    pub fn block(&self) -> &str {
        match self {
            ScheduleStep::CacheRead { block, .. }
            | ScheduleStep::CacheWrite { block, .. }
            | ScheduleStep::SyncThreads { block, .. }
            | ScheduleStep::SetBuffer { block, .. } => block,
        }
    }

    pub fn primitive(&self) -> Primitive {
        match self {
            ScheduleStep::CacheRead { .. } => Primitive::CacheRead,
            ScheduleStep::CacheWrite { .. } => Primitive::CacheWrite,
            ScheduleStep::SyncThreads { .. } => Primitive::SyncThreads,
            ScheduleStep::SetBuffer { .. } => Primitive::SetBuffer,
        }
    }
}

/// An ordered list of primitive invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleScript {
    pub steps: Vec<ScheduleStep>,
}

impl ScheduleScript {
    pub fn from_json(source: &str) -> TenschedResult<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn to_json(&self) -> TenschedResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ScheduleConfig::new()
            .with_device(DeviceApi::Gpu)
            .with_error_level(ErrorMessageLevel::Detailed);
        assert_eq!(config.device, DeviceApi::Gpu);
        assert_eq!(config.error_level, ErrorMessageLevel::Detailed);
        assert!(!config.strict);
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: ScheduleConfig = serde_json::from_str(r#"{ "strict": true }"#).unwrap();
        assert_eq!(config.device, DeviceApi::Host);
        assert!(config.strict);
    }

    #[test]
    fn test_parse_script() {
        let script = ScheduleScript::from_json(
            r#"{ "steps": [
                { "primitive": "cache_read", "block": "C", "read_index": 1, "memory": "shared" },
                { "primitive": "set_buffer", "block": "C", "memory": "local" }
            ] }"#,
        )
        .unwrap();
        assert_eq!(script.steps.len(), 2);
        assert_eq!(script.steps[0].primitive(), Primitive::CacheRead);
        assert_eq!(
            script.steps[1],
            ScheduleStep::SetBuffer { block: "C".into(), memory: MemoryScope::Local, fixed: false }
        );
        assert!(ScheduleScript::from_json(r#"{ "steps": [ { "primitive": "tile" } ] }"#).is_err());
    }
}
