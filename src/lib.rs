//! Audio-reactive lamp driver: live or decoded audio is reduced to twelve
//! band levels and streamed to the lamp as CRC-checked register writes.

pub mod audio;
pub mod config;
pub mod dsp;
pub mod error;
pub mod link;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};
