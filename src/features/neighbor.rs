/// Spatial neighbor gap on the latest snapshot of one metric.

use std::collections::HashMap;

use crate::features::circular::{angular_difference_deg, circular_mean_deg};
use crate::features::rolling::{FeatureRow, finite, median_of};
use crate::stations::NeighborMap;

/// Fill `neighbor_gap` on each row of a single-metric snapshot.
///
/// The gap is the row's value minus the median of its neighbors' latest
/// values (signed shortest arc from the circular mean for wind direction).
/// Rows whose neighbors have no value in the snapshot keep `None`.
pub fn attach_neighbor_gap(snapshot: &mut [FeatureRow], neighbors: &NeighborMap) {
    let values: HashMap<String, f64> = snapshot
        .iter()
        .map(|r| (r.station_id.clone(), r.value))
        .collect();

    for row in snapshot.iter_mut() {
        let nb_values: Vec<f64> = neighbors
            .get(&row.station_id)
            .map(|nbs| {
                nbs.iter()
                    .filter_map(|n| values.get(&n.station_id).copied())
                    .collect()
            })
            .unwrap_or_default();

        row.neighbor_gap = if nb_values.is_empty() {
            None
        } else if row.metric.is_circular() {
            circular_mean_deg(&nb_values).and_then(|m| finite(angular_difference_deg(row.value, m)))
        } else {
            median_of(&nb_values).and_then(|m| finite(row.value - m))
        };
    }
}
