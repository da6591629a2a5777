//! Construction-time tunables, gathered into one context struct in place of
//! the source's process-wide configuration object (huge pages, verbose
//! flag, result DB path). See Design Notes "Global mutable configuration".

use crate::error::{PmaError, Result};

/// Below this many extents worth of segments, the user-supplied density
/// bounds apply; at or above it, [`PRIMARY_DENSITY_BOUNDS`] takes over.
/// Named per spec §9 Open Questions / REDESIGN FLAGS (was hard-coded as
/// `64 * segments_per_extent` in the source).
pub const PRIMARY_DENSITY_CUTOFF_EXTENTS: usize = 64;

/// The fallback density bound set `(rho_0, rho_h, theta_h, theta_0)` used
/// once the array exceeds [`PRIMARY_DENSITY_CUTOFF_EXTENTS`].
pub const PRIMARY_DENSITY_BOUNDS: DensityParams = DensityParams {
    rho_0: 0.0,
    rho_h: 0.75,
    theta_h: 0.75,
    theta_0: 1.0,
};

/// The extent size used when huge pages are enabled (2 MiB), matching the
/// typical value named in spec §3.
pub const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

/// Default OS (small) page size assumed when huge pages are disabled.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// The four density-bound endpoints interpolated across the calibrator
/// tree's levels (spec §3 "Calibrator tree").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityParams {
    pub rho_0: f64,
    pub rho_h: f64,
    pub theta_h: f64,
    pub theta_0: f64,
}

impl DensityParams {
    pub fn validate(&self) -> Result<()> {
        let DensityParams {
            rho_0,
            rho_h,
            theta_h,
            theta_0,
        } = *self;
        if !(0.0 <= rho_0 && rho_0 < rho_h && rho_h < theta_h && theta_h < theta_0 && theta_0 <= 1.0)
        {
            return Err(PmaError::invalid(format!(
                "density bounds must satisfy 0 <= rho_0 < rho_h < theta_h < theta_0 <= 1, got {:?}",
                self
            )));
        }
        if !(2.0 * rho_h < theta_h) {
            return Err(PmaError::invalid(format!(
                "density bounds must satisfy 2*rho_h < theta_h (resize-oscillation guard), got {:?}",
                self
            )));
        }
        Ok(())
    }
}

impl Default for DensityParams {
    fn default() -> Self {
        DensityParams {
            rho_0: 0.08,
            rho_h: 0.30,
            theta_h: 0.70,
            theta_0: 0.92,
        }
    }
}

/// Construction parameters for a [`crate::pma::PackedMemoryArray`].
#[derive(Debug, Clone)]
pub struct PmaConfig {
    /// Fan-out of a separator-index node (the `B` of spec §4.4/§4.5).
    pub block_size: usize,
    /// Segment capacity `C`: a power of two, `32 <= C <= 2^16 - 1`.
    pub segment_capacity: usize,
    /// Pages per extent; together with the page size this determines the
    /// unit of rewiring.
    pub pages_per_extent: usize,
    /// Use huge-page (2 MiB) backed extents.
    pub use_huge_pages: bool,
    /// Upper bound on the virtual reservation, in bytes.
    pub max_memory: usize,
    /// Multiplies the calibrator height to size the predictor capacity:
    /// `max(4, height * predictor_scale)`.
    pub predictor_scale: usize,
    /// User-supplied density bounds, used below
    /// [`PRIMARY_DENSITY_CUTOFF_EXTENTS`].
    pub density_bounds: DensityParams,
    /// The cutoff (in extents worth of segments) above which
    /// [`PRIMARY_DENSITY_BOUNDS`] replaces `density_bounds`.
    pub primary_density_cutoff_extents: usize,
    /// Saturation count for predictor entries (`count_max`, `1..=2^16`).
    pub predictor_count_max: u32,
    /// Use the rewiring-capable substrate for storage and spreads, rather
    /// than plain heap allocation. Rewiring requires a Unix target.
    pub use_rewiring: bool,
}

impl Default for PmaConfig {
    fn default() -> Self {
        PmaConfig {
            block_size: 64,
            segment_capacity: 64,
            pages_per_extent: if cfg!(feature = "huge-pages-by-default") {
                HUGE_PAGE_SIZE / DEFAULT_PAGE_SIZE
            } else {
                16
            },
            use_huge_pages: false,
            max_memory: 1 << 35, // 32 GiB, matching the source's default
            predictor_scale: 8,
            density_bounds: DensityParams::default(),
            primary_density_cutoff_extents: PRIMARY_DENSITY_CUTOFF_EXTENTS,
            predictor_count_max: 32,
            use_rewiring: cfg!(unix),
        }
    }
}

impl PmaConfig {
    pub fn validate(&self) -> Result<()> {
        let c = self.segment_capacity;
        if c < 32 || c > (u16::MAX as usize) {
            return Err(PmaError::invalid(format!(
                "segment_capacity must be in [32, 2^16 - 1], got {}",
                c
            )));
        }
        if !c.is_power_of_two() {
            return Err(PmaError::invalid(format!(
                "segment_capacity must be a power of two, got {}",
                c
            )));
        }
        let page_size = self.page_size();
        if (page_size * self.pages_per_extent) % (c * 8) != 0 {
            return Err(PmaError::invalid(format!(
                "page_size mod (segment_capacity * 8) must be 0: page_size={}, segment_capacity={}",
                page_size, c
            )));
        }
        if self.block_size < 2 {
            return Err(PmaError::invalid("block_size must be >= 2"));
        }
        if self.predictor_count_max == 0 || self.predictor_count_max > (1 << 16) {
            return Err(PmaError::invalid(
                "predictor_count_max must be in [1, 2^16]",
            ));
        }
        self.density_bounds.validate()?;
        Ok(())
    }

    pub fn page_size(&self) -> usize {
        if self.use_huge_pages {
            HUGE_PAGE_SIZE
        } else {
            DEFAULT_PAGE_SIZE
        }
    }

    pub fn extent_size(&self) -> usize {
        self.page_size() * self.pages_per_extent
    }

    pub fn segments_per_extent(&self) -> usize {
        self.extent_size() / (self.segment_capacity * 8)
    }
}
