/// Feature computation for the anomaly pipeline.
///
/// Submodules:
/// - `circular`: shortest-arc differences and resultant-vector statistics
///   for wind direction, shared by features and rules.
/// - `rolling`: time-windowed per-station statistics (mean/std, median/MAD,
///   circular mean/std), z-scores, deltas and volatility.
/// - `neighbor`: deviation of each station from its neighbors' consensus.

pub mod circular;
pub mod neighbor;
pub mod rolling;

pub use neighbor::attach_neighbor_gap;
pub use rolling::{FeatureRow, compute_features, latest_per_station};
