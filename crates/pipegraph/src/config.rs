//! Pipeline configuration

use crate::descriptor::SurfaceSize;
use serde::{Deserialize, Serialize};

/// Settings fixed for the lifetime of a [`PipelineManager`](crate::PipelineManager)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Surface size used for the first materialization
    pub surface: SurfaceSize,
    /// Whether pipes with disjoint lifetimes and identical descriptors share resources
    ///
    /// Off by default: inspection tooling expects every pipe to keep its own contents.
    pub alias_transient_pipes: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            surface: SurfaceSize::default(),
            alias_transient_pipes: false,
        }
    }
}

impl PipelineConfig {
    pub fn new(surface: SurfaceSize) -> Self {
        Self { surface, ..Self::default() }
    }

    pub fn with_aliasing(mut self, enabled: bool) -> Self {
        self.alias_transient_pipes = enabled;
        self
    }

    /// Parses a configuration from YAML; missing keys take their default value
    pub fn from_yaml(source: &str) -> Result<Self, serde_norway::Error> {
        serde_norway::from_str(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_defaults() {
        let config = PipelineConfig::from_yaml("alias_transient_pipes: true\n").unwrap();
        assert_eq!(config.surface, SurfaceSize::new(1280, 720));
        assert!(config.alias_transient_pipes);

        let config = PipelineConfig::from_yaml("surface: { width: 640, height: 360 }\n").unwrap();
        assert_eq!(config, PipelineConfig::new(SurfaceSize::new(640, 360)));
    }
}
