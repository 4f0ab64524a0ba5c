//! Runtime drivers that run scheduled voices on dedicated OS threads.

#[cfg(all(feature = "tokio-runtime", not(target_arch = "wasm32")))]
pub mod driver;

#[cfg(all(feature = "tokio-runtime", not(target_arch = "wasm32")))]
pub use driver::{SkipCheck, VoiceDriver};
