pub mod api;
pub mod audio;
pub mod auth;
pub mod config;
pub mod dsp;
pub mod error;
pub mod explainer;
pub mod features;
pub mod models;
pub mod pipeline;
pub mod storage;

pub use error::{DetectionError, ErrorCode, Result};
