//! Per-instrument traded volume reconstruction.
//!
//! The stream reports volume either as a server running total (`totalVolume`) or as a
//! per-message delta (`volume`), and a client may join mid-session. Each instrument gets a
//! baseline fixed at first observation plus an increment observed this session. The
//! resulting total never decreases within a session.

use crate::types::{InstrumentId, Quote};
use fnv::FnvHashMap;
use tracing::debug;

/// Volume state for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VolumeCacheEntry {
    /// Volume traded before this session started tracking the instrument.
    pub baseline: f64,
    /// Volume observed during this session.
    pub increment: f64,
    /// `baseline + increment`.
    pub total: f64,
}

impl VolumeCacheEntry {
    fn new(baseline: f64) -> Self {
        Self {
            baseline,
            increment: 0.0,
            total: baseline,
        }
    }

    fn set_increment(&mut self, increment: f64) {
        self.increment = increment;
        self.total = self.baseline + increment;
    }
}

#[derive(Debug, Clone, Default)]
pub struct VolumeReconstructor {
    /// "Today so far" volumes from the historical snapshot endpoint.
    snapshot: FnvHashMap<InstrumentId, f64>,
    entries: FnvHashMap<InstrumentId, VolumeCacheEntry>,
}

impl VolumeReconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide today's volume snapshot. Only instruments whose baseline is not yet fixed
    /// are affected.
    pub fn set_snapshot<I>(&mut self, volumes: I)
    where
        I: IntoIterator<Item = (InstrumentId, f64)>,
    {
        self.snapshot = volumes
            .into_iter()
            .filter(|(_, volume)| volume.is_finite() && *volume >= 0.0)
            .collect();
    }

    /// Reconcile an inbound quote, returning the instrument's running total.
    ///
    /// The total is also written into `quote.total_volume`.
    pub fn reconcile(&mut self, quote: &mut Quote) -> f64 {
        let id = &quote.instrument_id;
        let cumulative = quote
            .traded_volume_cumulative
            .filter(|volume| volume.is_finite());
        let delta = quote
            .traded_volume_delta
            .filter(|volume| volume.is_finite() && *volume > 0.0);

        let snapshot = &self.snapshot;
        let entry = self.entries.entry(id.clone()).or_insert_with(|| {
            let baseline = snapshot
                .get(id)
                .copied()
                .or(cumulative.filter(|volume| *volume > 0.0))
                .unwrap_or(0.0);
            debug!(instrument = %id, baseline, "volume baseline established");
            VolumeCacheEntry::new(baseline)
        });

        let increment = match (cumulative, delta) {
            // Server running total is consistent with the baseline: trust it, but never go
            // backwards past volume already counted
            (Some(cumulative), _) if cumulative >= entry.baseline => {
                (cumulative - entry.baseline).max(entry.increment)
            }
            (_, Some(delta)) => entry.increment + delta,
            _ => entry.increment,
        };
        entry.set_increment(increment);

        quote.total_volume = Some(entry.total);
        entry.total
    }

    pub fn entry(&self, id: &InstrumentId) -> Option<&VolumeCacheEntry> {
        self.entries.get(id)
    }

    pub fn total(&self, id: &InstrumentId) -> Option<f64> {
        self.entries.get(id).map(|entry| entry.total)
    }

    /// Sum of all reconstructed totals.
    pub fn grand_total(&self) -> f64 {
        self.entries.values().map(|entry| entry.total).sum()
    }

    /// Drop session state. The snapshot is kept until replaced.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
