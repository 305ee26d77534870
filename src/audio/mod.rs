pub mod decoder;
pub mod preprocess;

pub use decoder::{AudioDecoder, DecodedAudio};
pub use preprocess::preprocess;

/// Sample rate every clip is resampled to before analysis
pub const TARGET_SAMPLE_RATE: u32 = 16000;
/// Shortest accepted clip, measured after decoding
pub const MIN_DURATION_SECS: f64 = 1.0;
/// Longest accepted clip
pub const MAX_DURATION_SECS: f64 = 300.0;
