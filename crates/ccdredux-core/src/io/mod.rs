pub mod image_io;
pub mod manifest;

pub use image_io::{load_adu, save_mask_png, save_tiff};
pub use manifest::{scan_directory, Ingested, Manifest, ManifestEntry};
