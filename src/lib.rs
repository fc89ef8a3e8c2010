/// Weather-station anomaly detection service.
///
/// Rolling per-station features, neighbor coherence, isolation-forest
/// scoring with a z-score cold start, and edge-triggered rule alerts with
/// cooldown de-duplication, driven by a single-worker tick loop.

pub mod alert;
pub mod analytics;
pub mod anomaly;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod features;
pub mod logging;
pub mod model;
pub mod replay;
pub mod stations;
pub mod store;
