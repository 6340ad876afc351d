//! System Audio Output Domain
//!
//! Output lines on the default device through rodio. Each line owns a
//! fixed-size sample ring, so memory use does not grow with sound length.

mod ring_buffer;
mod rodio_output;

pub use ring_buffer::RingBuffer;
pub use rodio_output::RodioOutput;

/// Samples the device thread pulls from a ring at once
pub const SOURCE_BATCH_SAMPLES: usize = 1024;
