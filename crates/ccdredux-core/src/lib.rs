pub mod calibration;
pub mod consts;
pub mod detection;
pub mod error;
pub mod filters;
pub mod frame;
pub mod group;
pub mod io;
pub mod photometry;
pub mod pipeline;
pub mod stack;
pub mod stats;
