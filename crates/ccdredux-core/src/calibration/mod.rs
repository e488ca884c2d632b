pub mod chain;
pub mod index;
pub mod mask;
pub mod stage;

pub use chain::{CalibratedLight, CalibrationChain, MaskSummary, MasterDark};
pub use index::CalibrationIndex;
pub use mask::{combine_masks, MaskCombination};
pub use stage::{GroupFailure, GroupStage, StageTracker};
