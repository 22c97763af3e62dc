//! Configuration for a [crate::Cache].
use std::time::Duration;

/// Alignment of the default buffers; wide enough for any SIMD lane the decoders use.
pub const DEFAULT_ALIGNMENT: usize = 64;

/// Fill ratio that a cache miss triggers a collection at, and collects down to.
pub const DEFAULT_GC_FILL_RATIO: f32 = 0.8;

#[derive(Debug, Clone, derive_builder::Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct CacheConfig {
    /// Size in bytes of the buffer allocated for a new entry when no custom allocator is installed.
    ///
    /// Such entries also cost exactly this much.
    pub entry_size: usize,
    /// Upper bound on the summed cost of all entries.
    pub cost_quota: usize,
    /// Alignment of default buffers.  Must be a power of two.
    #[builder(default = "DEFAULT_ALIGNMENT")]
    pub alignment: usize,
    /// When a miss finds the cache above `cost_quota * gc_fill_ratio`, collect until below it.
    #[builder(default = "DEFAULT_GC_FILL_RATIO")]
    pub gc_fill_ratio: f32,
    /// How long to sleep between retries of a contended lock once yielding hasn't helped.
    #[builder(default = "Duration::from_micros(5)")]
    pub retry_sleep: Duration,
    /// Lookups which take longer than this are logged.
    #[builder(default = "Duration::from_millis(100)")]
    pub slow_wait: Duration,
}

impl CacheConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(a) = self.alignment {
            if !a.is_power_of_two() {
                return Err(format!("alignment {} is not a power of two", a));
            }
        }

        if let Some(r) = self.gc_fill_ratio {
            if !(r > 0.0 && r <= 1.0) {
                return Err(format!("gc_fill_ratio {} must be in (0, 1]", r));
            }
        }

        Ok(())
    }
}

impl CacheConfig {
    /// A config with every optional knob at its default.
    pub fn new(entry_size: usize, cost_quota: usize) -> CacheConfig {
        CacheConfig {
            entry_size,
            cost_quota,
            alignment: DEFAULT_ALIGNMENT,
            gc_fill_ratio: DEFAULT_GC_FILL_RATIO,
            retry_sleep: Duration::from_micros(5),
            slow_wait: Duration::from_millis(100),
        }
    }

    /// The cost above which a miss collects first.
    pub(crate) fn gc_threshold(&self) -> f32 {
        self.cost_quota as f32 * self.gc_fill_ratio
    }
}
