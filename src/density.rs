//! The density-bound calculator (spec §4.6): per-level lower/upper
//! occupancy thresholds for the calibrator tree, interpolated between the
//! user-supplied endpoints, with a primary fallback bound set once the
//! array grows past a cutoff. Grounded in
//! `original_source/pma/density_bounds.hpp`.

use crate::config::{DensityParams, PRIMARY_DENSITY_BOUNDS};

/// Compute the interpolated `(rho, theta)` bounds for level `level` of a
/// calibrator tree of height `tree_height` (both 1-based, `1 <= level <=
/// tree_height`).
pub fn thresholds(params: &DensityParams, tree_height: usize, level: usize) -> (f64, f64) {
    debug_assert!(level >= 1 && level <= tree_height);
    if tree_height <= 1 {
        return (params.rho_h, params.theta_h);
    }
    let t = (level - 1) as f64 / (tree_height - 1) as f64;
    let rho = params.rho_0 + (params.rho_h - params.rho_0) * t;
    let theta = params.theta_0 - (params.theta_0 - params.theta_h) * t;
    (rho, theta)
}

/// Caches the per-level `(rho, theta)` pairs for a calibrator tree of a
/// given height, recomputing only when the height changes.
pub struct CachedDensityBounds {
    user_params: DensityParams,
    primary_cutoff_extents: usize,
    cached_height: usize,
    cached: Vec<(f64, f64)>,
}

impl CachedDensityBounds {
    pub fn new(user_params: DensityParams, primary_cutoff_extents: usize) -> Self {
        CachedDensityBounds {
            user_params,
            primary_cutoff_extents,
            cached_height: 0,
            cached: Vec::new(),
        }
    }

    /// Whether, given the number of extents worth of segments backing the
    /// array, the primary (hard-coded) bound set applies instead of the
    /// user-supplied one.
    pub fn active_params(&self, extents_worth_of_segments: usize) -> DensityParams {
        if extents_worth_of_segments >= self.primary_cutoff_extents {
            PRIMARY_DENSITY_BOUNDS
        } else {
            self.user_params
        }
    }

    fn rebuild(&mut self, tree_height: usize, params: DensityParams) {
        self.cached = (1..=tree_height)
            .map(|level| thresholds(&params, tree_height, level))
            .collect();
        self.cached_height = tree_height;
    }

    /// Retrieve the bounds for `level`, assuming `tree_height` matches the
    /// last call (or rebuilding the cache if it changed).
    pub fn thresholds(
        &mut self,
        tree_height: usize,
        level: usize,
        extents_worth_of_segments: usize,
    ) -> (f64, f64) {
        debug_assert!(level >= 1 && level <= tree_height);
        let params = self.active_params(extents_worth_of_segments);
        if self.cached_height != tree_height || self.cached.len() != tree_height {
            self.rebuild(tree_height, params);
        }
        self.cached[level - 1]
    }

    pub fn calibrator_tree_height(&self) -> usize {
        self.cached_height
    }
}

/// The height of the calibrator tree over `number_segments` segments:
/// `ceil(log2(number_segments)) + 1`.
pub fn calibrator_tree_height(number_segments: usize) -> usize {
    if number_segments <= 1 {
        1
    } else {
        (usize::BITS - (number_segments - 1).leading_zeros()) as usize + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_matches_power_of_two_boundaries() {
        assert_eq!(calibrator_tree_height(1), 1);
        assert_eq!(calibrator_tree_height(2), 2);
        assert_eq!(calibrator_tree_height(3), 3);
        assert_eq!(calibrator_tree_height(4), 3);
        assert_eq!(calibrator_tree_height(5), 4);
        assert_eq!(calibrator_tree_height(8), 4);
    }

    #[test]
    fn interpolation_is_monotone() {
        let p = DensityParams {
            rho_0: 0.1,
            rho_h: 0.3,
            theta_h: 0.7,
            theta_0: 0.9,
        };
        let h = 5;
        let mut prev_rho = -1.0;
        let mut prev_theta = 2.0;
        for level in 1..=h {
            let (rho, theta) = thresholds(&p, h, level);
            assert!(rho >= prev_rho);
            assert!(theta <= prev_theta);
            prev_rho = rho;
            prev_theta = theta;
        }
        let (rho1, theta1) = thresholds(&p, h, 1);
        assert!((rho1 - p.rho_0).abs() < 1e-9);
        assert!((theta1 - p.theta_0).abs() < 1e-9);
        let (rhoh, thetah) = thresholds(&p, h, h);
        assert!((rhoh - p.rho_h).abs() < 1e-9);
        assert!((thetah - p.theta_h).abs() < 1e-9);
    }
}
