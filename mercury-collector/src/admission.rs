//! Adaptive admission of captured packets.
//!
//! A single shared accept percentage, read by every capture worker on its
//! hot path and adjusted by the output coordinator after each drain round.
//! All accesses are `Relaxed`: a worker may act on a slightly stale
//! percentage and concurrent adjustments may overwrite each other, which
//! only delays convergence.

use std::sync::atomic::{AtomicU8, Ordering};

use rand::Rng;

/// Accept percentage when adaptive admission starts.
pub const ADAPTIVE_START_PERCENT: u8 = 30;

/// Lowest percentage adaptive feedback can reach.
pub const MIN_PERCENT: u8 = 1;

/// Highest percentage; accepts every packet.
pub const MAX_PERCENT: u8 = 100;

/// Decrease applied after a round that saw queue drops.
pub const DECREASE_STEP: u8 = 10;

/// Increase applied after a round in which every queue was at most a
/// quarter full.
pub const INCREASE_STEP: u8 = 1;

#[derive(Debug)]
pub struct AdmissionController {
    percent: AtomicU8,
    adaptive: bool,
}

impl AdmissionController {
    /// Controller for adaptive mode, starting at [`ADAPTIVE_START_PERCENT`].
    pub fn adaptive() -> Self {
        Self {
            percent: AtomicU8::new(ADAPTIVE_START_PERCENT),
            adaptive: true,
        }
    }

    /// Controller fixed at 100%. Feedback is ignored.
    pub fn disabled() -> Self {
        Self {
            percent: AtomicU8::new(MAX_PERCENT),
            adaptive: false,
        }
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Relaxed)
    }

    /// Overwrite the percentage, clamped to 0..=100.
    pub fn set_percent(&self, percent: u8) {
        self.percent.store(percent.min(MAX_PERCENT), Ordering::Relaxed);
    }

    /// Draw once from `rng`; true iff the draw falls under the percentage.
    pub fn accept_with<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        let percent = self.percent();
        if percent >= MAX_PERCENT {
            return true;
        }
        rng.random_range(0..MAX_PERCENT) < percent
    }

    /// Feedback from one coordinator round.
    ///
    /// New drops lower the percentage by [`DECREASE_STEP`] (not below
    /// [`MIN_PERCENT`]); otherwise, if every queue was quiet, raise it by
    /// [`INCREASE_STEP`].
    pub fn observe_round(&self, new_drops: bool, all_quiet: bool) {
        if !self.adaptive {
            return;
        }
        let current = self.percent();
        let next = if new_drops {
            current.saturating_sub(DECREASE_STEP).max(MIN_PERCENT)
        } else if all_quiet {
            current.saturating_add(INCREASE_STEP).min(MAX_PERCENT)
        } else {
            return;
        };
        self.percent.store(next, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    // ===========================================
    // Test Category A — Accept / Drop
    // ===========================================

    #[test]
    fn test_disabled_accepts_everything() {
        let controller = AdmissionController::disabled();
        let mut rng = SmallRng::seed_from_u64(1);
        assert!((0..10_000).all(|_| controller.accept_with(&mut rng)));
    }

    #[test]
    fn test_zero_percent_rejects_everything() {
        let controller = AdmissionController::adaptive();
        controller.set_percent(0);
        let mut rng = SmallRng::seed_from_u64(2);
        assert!((0..10_000).all(|_| !controller.accept_with(&mut rng)));
    }

    #[test]
    fn test_accept_ratio_converges_to_percent() {
        for percent in [1u8, 30, 50, 90] {
            let controller = AdmissionController::adaptive();
            controller.set_percent(percent);
            let mut rng = SmallRng::seed_from_u64(u64::from(percent));
            let draws = 200_000;
            let accepted = (0..draws)
                .filter(|_| controller.accept_with(&mut rng))
                .count();
            let ratio = accepted as f64 / draws as f64;
            let expected = f64::from(percent) / 100.0;
            assert!(
                (ratio - expected).abs() < 0.01,
                "percent={percent} ratio={ratio}"
            );
        }
    }

    #[test]
    fn test_set_percent_clamps() {
        let controller = AdmissionController::adaptive();
        controller.set_percent(250);
        assert_eq!(controller.percent(), MAX_PERCENT);
    }

    // ===========================================
    // Test Category B — Feedback
    // ===========================================

    #[test]
    fn test_adaptive_starts_at_thirty() {
        assert_eq!(AdmissionController::adaptive().percent(), 30);
        assert_eq!(AdmissionController::disabled().percent(), 100);
    }

    #[test]
    fn test_drops_decrease_to_floor() {
        let controller = AdmissionController::adaptive();
        controller.observe_round(true, false);
        assert_eq!(controller.percent(), 20);
        for _ in 0..10 {
            controller.observe_round(true, true);
        }
        assert_eq!(controller.percent(), MIN_PERCENT);
    }

    #[test]
    fn test_quiet_rounds_increase_to_ceiling() {
        let controller = AdmissionController::adaptive();
        controller.observe_round(false, true);
        assert_eq!(controller.percent(), 31);
        for _ in 0..200 {
            controller.observe_round(false, true);
        }
        assert_eq!(controller.percent(), MAX_PERCENT);
    }

    #[test]
    fn test_busy_round_without_drops_holds() {
        let controller = AdmissionController::adaptive();
        controller.observe_round(false, false);
        assert_eq!(controller.percent(), 30);
    }

    #[test]
    fn test_disabled_ignores_feedback() {
        let controller = AdmissionController::disabled();
        controller.observe_round(true, false);
        assert_eq!(controller.percent(), 100);
        assert!(!controller.is_adaptive());
    }

    #[test]
    fn test_shared_across_threads() {
        let controller = Arc::new(AdmissionController::adaptive());
        let handles: Vec<_> = (0..4)
            .map(|seed| {
                let controller = Arc::clone(&controller);
                std::thread::spawn(move || {
                    let mut rng = SmallRng::seed_from_u64(seed);
                    (0..1000).filter(|_| controller.accept_with(&mut rng)).count()
                })
            })
            .collect();
        controller.observe_round(true, false);
        for handle in handles {
            let accepted = handle.join().expect("join");
            assert!(accepted <= 1000);
        }
        assert!(controller.percent() <= 30);
    }
}
