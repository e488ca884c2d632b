pub mod median;
pub mod sigma_clip;

pub use median::median_combine;
pub use sigma_clip::{
    accumulate, per_frame_mask, Accumulation, ClipKind, ClipStatistic, CombinePolicy,
    NoiseFloor, SigmaClipParams,
};
