pub mod components;
pub mod sources;
pub mod threshold;

pub use components::{connected_components, Component};
pub use sources::{detect_sources, SourceCandidate};
pub use threshold::{median_sigma_threshold, Threshold};
