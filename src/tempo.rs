//! Host tempo shared with tempo-synced modulators.
//!
//! The service is created by whoever owns the transport and handed by
//! reference to modulators that need it. Each subscriber gets a
//! [`TempoListener`] that reads the tempo lock-free from the audio thread and
//! gives the handle back on removal, so the registry always knows who is
//! listening.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

pub const DEFAULT_BPM: f64 = 120.0;
const MIN_BPM: f64 = 1.0;
const MAX_BPM: f64 = 999.0;

#[derive(Debug)]
pub struct TempoService {
    bpm: Arc<AtomicU64>,
    listeners: Vec<u64>,
    next_id: u64,
}

impl Default for TempoService {
    fn default() -> Self {
        Self::new(DEFAULT_BPM)
    }
}

impl TempoService {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm: Arc::new(AtomicU64::new(clamp_bpm(bpm).to_bits())),
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm.load(Ordering::Relaxed))
    }

    /// Publish a new tempo. Listeners see it at their next read.
    pub fn set_bpm(&self, bpm: f64) {
        let clamped = clamp_bpm(bpm);
        if clamped != bpm {
            log::warn!("tempo {} out of range, clamped to {}", bpm, clamped);
        }
        self.bpm.store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn add_listener(&mut self) -> TempoListener {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push(id);

        log::debug!("tempo listener {} added ({} total)", id, self.listeners.len());

        TempoListener {
            id,
            bpm: Arc::clone(&self.bpm),
        }
    }

    /// Unregister a listener. Handles from another service are ignored.
    pub fn remove_listener(&mut self, listener: TempoListener) {
        let before = self.listeners.len();
        self.listeners.retain(|&id| id != listener.id);

        if self.listeners.len() == before {
            log::warn!("tempo listener {} was not registered", listener.id);
        }
    }

    pub fn num_listeners(&self) -> usize {
        self.listeners.len()
    }
}

fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_finite() {
        bpm.clamp(MIN_BPM, MAX_BPM)
    } else {
        DEFAULT_BPM
    }
}

/// Read side of a [`TempoService`] subscription.
#[derive(Debug)]
pub struct TempoListener {
    id: u64,
    bpm: Arc<AtomicU64>,
}

impl TempoListener {
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn bpm(&self) -> f64 {
        f64::from_bits(self.bpm.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_see_tempo_changes() {
        let mut service = TempoService::default();
        let listener = service.add_listener();

        assert_eq!(listener.bpm(), DEFAULT_BPM);
        service.set_bpm(90.0);
        assert_eq!(listener.bpm(), 90.0);
    }

    #[test]
    fn registry_tracks_add_and_remove() {
        let mut service = TempoService::default();
        let a = service.add_listener();
        let b = service.add_listener();
        assert_ne!(a.id(), b.id());
        assert_eq!(service.num_listeners(), 2);

        service.remove_listener(a);
        assert_eq!(service.num_listeners(), 1);
    }

    #[test]
    fn invalid_tempo_is_clamped() {
        let service = TempoService::new(f64::NAN);
        assert_eq!(service.bpm(), DEFAULT_BPM);

        service.set_bpm(5000.0);
        assert_eq!(service.bpm(), MAX_BPM);
    }
}
