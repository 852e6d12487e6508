use crate::lock_or_recover;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Default per-sample decay applied to the held peak.
pub const DEFAULT_PEAK_DECAY: f32 = 0.99;

/// Running peak estimator for a single channel.
///
/// The held level decays geometrically every sample and snaps up to the
/// magnitude of any louder input.
#[derive(Clone, Copy, Debug)]
pub struct PeakDetector {
    level: f32,
    decay: f32,
}

impl PeakDetector {
    pub fn new(decay: f32) -> Self {
        Self { level: 0.0, decay }
    }

    pub fn process(&mut self, sample: f32) -> f32 {
        self.level *= self.decay;
        let magnitude = sample.abs();
        if magnitude > self.level {
            self.level = magnitude;
        }
        self.level
    }

    pub fn level(&self) -> f32 {
        self.level
    }
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self::new(DEFAULT_PEAK_DECAY)
    }
}

/// Published detector levels for readers off the audio thread.
///
/// `reset` swaps in a slot array sized for the new stream and hands the
/// audio side its own `PeakSlots` handle, so publishing never locks.
#[derive(Debug)]
pub struct PeakLevels {
    current: Mutex<Arc<[AtomicU32]>>,
}

/// Audio-side handle onto the slots of the latest `reset`.
#[derive(Clone, Debug)]
pub(crate) struct PeakSlots {
    slots: Arc<[AtomicU32]>,
}

impl PeakSlots {
    pub(crate) fn empty() -> Self {
        Self {
            slots: zeroed_slots(0),
        }
    }

    pub(crate) fn publish(&self, detectors: &[PeakDetector]) {
        for (slot, detector) in self.slots.iter().zip(detectors) {
            slot.store(detector.level().to_bits(), Ordering::Relaxed);
        }
    }
}

fn zeroed_slots(channels: usize) -> Arc<[AtomicU32]> {
    (0..channels)
        .map(|_| AtomicU32::new(0f32.to_bits()))
        .collect()
}

impl PeakLevels {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(zeroed_slots(0)),
        }
    }

    fn slots(&self) -> Arc<[AtomicU32]> {
        Arc::clone(&lock_or_recover(&self.current, "PeakLevels::slots"))
    }

    /// Publish `channels` zeroed levels. Control thread only.
    pub(crate) fn reset(&self, channels: usize) -> PeakSlots {
        let slots = zeroed_slots(channels);
        *lock_or_recover(&self.current, "PeakLevels::reset") = Arc::clone(&slots);
        PeakSlots { slots }
    }

    pub fn live_channels(&self) -> usize {
        self.slots().len()
    }

    pub fn get(&self, channel: usize) -> Option<f32> {
        self.slots()
            .get(channel)
            .map(|slot| f32::from_bits(slot.load(Ordering::Relaxed)))
    }

    pub fn snapshot(&self) -> Vec<f32> {
        self.slots()
            .iter()
            .map(|slot| f32::from_bits(slot.load(Ordering::Relaxed)))
            .collect()
    }
}

impl Default for PeakLevels {
    fn default() -> Self {
        Self::new()
    }
}

/// Peak magnitude in dBFS, floored so silence stays printable.
pub fn peak_to_db(level: f32) -> f32 {
    20.0 * level.abs().max(1e-6).log10()
}
