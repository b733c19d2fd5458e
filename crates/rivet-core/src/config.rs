//! Tunables for descriptor pools and sub-buffer allocation.

use crate::constants::{DEFAULT_CHUNK_GRANULARITY, DEFAULT_MAX_SETS_PER_POOL};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// How the sub-buffer allocator picks among free regions that fit a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStrategy {
    /// Lowest-addressed free run that fits.
    #[default]
    FirstFit,
    /// Smallest free run that fits, lowest address on ties.
    BestFit,
}

/// Descriptor pool sizing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorPoolConfig {
    /// Sets per native pool. A pool is reset once this many sets came back.
    pub max_sets_per_pool: u32,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            max_sets_per_pool: DEFAULT_MAX_SETS_PER_POOL,
        }
    }
}

impl DescriptorPoolConfig {
    /// Check that the pool can hold at least one set.
    pub fn validate(&self) -> Result<()> {
        if self.max_sets_per_pool == 0 {
            return Err(Error::InvalidConfig(
                "max_sets_per_pool must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sub-buffer allocator tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubBufferConfig {
    /// Every allocation span is a whole number of chunks of this many bytes.
    pub chunk_granularity: u64,
    /// Region selection policy.
    pub strategy: FitStrategy,
}

impl Default for SubBufferConfig {
    fn default() -> Self {
        Self {
            chunk_granularity: DEFAULT_CHUNK_GRANULARITY,
            strategy: FitStrategy::default(),
        }
    }
}

impl SubBufferConfig {
    /// Config with the given chunk granularity and the default strategy.
    pub fn with_chunk_granularity(chunk_granularity: u64) -> Self {
        Self {
            chunk_granularity,
            ..Self::default()
        }
    }

    /// Check that the chunk granularity is usable.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_granularity == 0 {
            return Err(Error::InvalidConfig(
                "chunk_granularity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Aggregate configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RivetConfig {
    /// Descriptor set pool sizing.
    pub descriptor_pools: DescriptorPoolConfig,
    /// Sub-buffer allocator settings.
    pub sub_buffers: SubBufferConfig,
}

impl RivetConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.descriptor_pools.validate()?;
        self.sub_buffers.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_library_constants() {
        let config = RivetConfig::default();
        assert_eq!(config.descriptor_pools.max_sets_per_pool, 10);
        assert_eq!(config.sub_buffers.chunk_granularity, 256);
        assert_eq!(config.sub_buffers.strategy, FitStrategy::FirstFit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_values_are_rejected() {
        let pools = DescriptorPoolConfig {
            max_sets_per_pool: 0,
        };
        assert!(matches!(pools.validate(), Err(Error::InvalidConfig(_))));

        let buffers = SubBufferConfig::with_chunk_granularity(0);
        assert!(buffers.validate().is_err());
    }
}
