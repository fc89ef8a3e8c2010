/// Circular statistics for directional quantities (wind direction, degrees).
///
/// Shared by the rolling feature pass, the neighbor-gap snapshot, and the
/// generic delta rule so all three agree on what "difference" means.

/// Resultant lengths below this are treated as fully dispersed.
const MIN_RESULTANT: f64 = 1e-9;

/// Normalize any angle to [0, 360).
pub fn normalize_deg(angle: f64) -> f64 {
    let a = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if a >= 360.0 { 0.0 } else { a }
}

/// Shortest signed difference `a - b` in degrees, in (-180, 180].
///
/// Antisymmetric except at exactly 180°, where both directions report +180.
pub fn angular_difference_deg(a: f64, b: f64) -> f64 {
    let d = normalize_deg(a - b);
    if d > 180.0 { d - 360.0 } else { d }
}

/// Mean resultant vector of a set of angles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resultant {
    pub mean_sin: f64,
    pub mean_cos: f64,
}

impl Resultant {
    pub fn from_angles<I: IntoIterator<Item = f64>>(angles: I) -> Option<Self> {
        let mut n = 0usize;
        let (mut s, mut c) = (0.0, 0.0);
        for a in angles {
            let r = a.to_radians();
            s += r.sin();
            c += r.cos();
            n += 1;
        }
        if n == 0 {
            return None;
        }
        Some(Self {
            mean_sin: s / n as f64,
            mean_cos: c / n as f64,
        })
    }

    /// Mean direction in [0, 360).
    pub fn mean_deg(&self) -> f64 {
        normalize_deg(self.mean_sin.atan2(self.mean_cos).to_degrees())
    }

    /// Resultant length R, clamped to [MIN_RESULTANT, 1].
    pub fn length(&self) -> f64 {
        (self.mean_sin.powi(2) + self.mean_cos.powi(2))
            .sqrt()
            .clamp(MIN_RESULTANT, 1.0)
    }

    /// Circular standard deviation sqrt(-2 ln R), in degrees.
    pub fn circular_std_deg(&self) -> f64 {
        (-2.0 * self.length().ln()).max(0.0).sqrt().to_degrees()
    }
}

/// Circular mean of angles in degrees, `None` for an empty set.
pub fn circular_mean_deg(angles: &[f64]) -> Option<f64> {
    Resultant::from_angles(angles.iter().copied()).map(|r| r.mean_deg())
}
