//! Configuration Module - GC Tuning Parameters
//!
//! Manages all configuration parameters for SGC.
//!
//! Per-process knobs (the minimum heap size, the fullsweep interval)
//! are copied into the process at spawn; the monitor thresholds are
//! consulted on every collection.

/// Main configuration for the Skein garbage collector
///
/// Stores all parameters affecting GC behavior.
/// Most parameters have sensible defaults.
///
/// # Examples
///
/// ```rust
/// use sgc::GcConfig;
///
/// // Use default configuration
/// let config = GcConfig::default();
///
/// // Force a fullsweep on every tenth minor collection
/// let config = GcConfig {
///     max_gen_gcs: 10,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Minimum heap size in words
    ///
    /// A process heap never shrinks below this size, and a freshly
    /// spawned process starts at it (rounded up to the size schedule).
    /// Raised to `global_floor` when set below it.
    /// Default: 34 (the first entry of the size schedule)
    pub min_heap_size: usize,

    /// System-wide heap floor in words
    ///
    /// The post-fullsweep shrink never fires on a heap at or below
    /// this size, and the virtual-heap thresholds never drop under
    /// it. Per-process minimums can only raise the effective limit,
    /// never lower it past this one.
    /// Default: 34
    pub global_floor: usize,

    /// Number of minor collections before a fullsweep is forced
    ///
    /// Generational collection never scans the old heap, so garbage
    /// that has been tenured can only be reclaimed by a major
    /// collection. This bounds how long that can be deferred.
    ///
    /// Default: 65535
    pub max_gen_gcs: u32,

    /// Long-GC monitor threshold in milliseconds
    ///
    /// If a collection takes longer than this, a `LongGc` event is
    /// reported after the collection completes. 0 disables monitoring.
    ///
    /// Default: 0 (disabled)
    pub long_gc_threshold_ms: u64,

    /// Large-heap monitor threshold in words
    ///
    /// If the combined young+old heap size meets this threshold after
    /// a collection, a `LargeHeap` event is reported. 0 disables.
    ///
    /// Default: 0 (disabled)
    pub large_heap_words: usize,

    /// Artificial sleep inserted into every collection, in milliseconds
    ///
    /// Test knob for exercising the long-GC monitor. 0 disables.
    ///
    /// Default: 0
    pub test_long_gc_sleep_ms: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            min_heap_size: crate::heap::sizes::MIN_HEAP_SIZE,
            global_floor: crate::heap::sizes::MIN_HEAP_SIZE,
            max_gen_gcs: 65535,
            long_gc_threshold_ms: 0,
            large_heap_words: 0,
            test_long_gc_sleep_ms: 0,
        }
    }
}

impl GcConfig {
    /// Validate configuration
    ///
    /// Checks if all values are in valid ranges.
    /// Returns error if configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_heap_size == 0 {
            return Err(ConfigError::InvalidHeapSize(
                "min_heap_size must be > 0".to_string(),
            ));
        }

        if self.global_floor == 0 {
            return Err(ConfigError::InvalidHeapSize(
                "global_floor must be > 0".to_string(),
            ));
        }

        if self.max_gen_gcs == 0 {
            return Err(ConfigError::InvalidGenGcs(
                "max_gen_gcs must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - SGC_MIN_HEAP (words)
    /// - SGC_GLOBAL_FLOOR (words)
    /// - SGC_MAX_GEN_GCS
    /// - SGC_LONG_GC_MS
    /// - SGC_LARGE_HEAP_WORDS
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SGC_MIN_HEAP") {
            if let Ok(words) = val.parse::<usize>() {
                config.min_heap_size = words;
            }
        }

        if let Ok(val) = std::env::var("SGC_GLOBAL_FLOOR") {
            if let Ok(words) = val.parse::<usize>() {
                config.global_floor = words;
            }
        }

        if let Ok(val) = std::env::var("SGC_MAX_GEN_GCS") {
            if let Ok(n) = val.parse::<u32>() {
                config.max_gen_gcs = n;
            }
        }

        if let Ok(val) = std::env::var("SGC_LONG_GC_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                config.long_gc_threshold_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("SGC_LARGE_HEAP_WORDS") {
            if let Ok(words) = val.parse::<usize>() {
                config.large_heap_words = words;
            }
        }

        config
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid heap size: {0}")]
    InvalidHeapSize(String),

    #[error("invalid fullsweep interval: {0}")]
    InvalidGenGcs(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GcConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_heap_size, 34);
        assert_eq!(config.global_floor, 34);
        assert_eq!(config.max_gen_gcs, 65535);
    }

    #[test]
    fn test_invalid_min_heap() {
        let config = GcConfig {
            min_heap_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_global_floor() {
        let config = GcConfig {
            global_floor: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_gen_gcs() {
        let config = GcConfig {
            max_gen_gcs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
