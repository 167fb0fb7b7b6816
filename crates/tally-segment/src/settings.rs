use std::time::Duration;
use typed_builder::TypedBuilder;

/// Configures a [`SegmentAllocator`](crate::SegmentAllocator) instance.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct SegmentSettings {
    /// Ceiling on the adaptive step. Fast consumers double their requested
    /// range per refill until they hit this.
    #[builder(default = 1_000_000)]
    pub max_step: i64,
    /// Target lifetime of one segment. Refills landing inside one window
    /// double the step; refills slower than two windows halve it.
    #[builder(default = Duration::from_secs(15 * 60))]
    pub segment_validity: Duration,
    /// How often the tag cache is reconciled against the store.
    #[builder(default = Duration::from_secs(60))]
    pub reconcile_period: Duration,
    /// Upper bound on concurrently running refill tasks across all keys.
    #[builder(default = 5)]
    pub refill_workers: usize,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let settings = SegmentSettings::default();
        assert_eq!(settings.max_step, 1_000_000);
        assert_eq!(settings.segment_validity, Duration::from_secs(900));
        assert_eq!(settings.reconcile_period, Duration::from_secs(60));
        assert_eq!(settings.refill_workers, 5);
    }
}
