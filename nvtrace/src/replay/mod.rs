//! Log replay against a live device

pub mod engine;
pub mod pairing;
pub mod translate;

pub use engine::{ticks_to_duration, ReplayEngine, ReplayOptions, ReplayStats, DEFAULT_POLL_TIMEOUT};
pub use pairing::{pair_records, Pairing, RecordPair};
pub use translate::{translate, ReplayCommand, SkipReason, Translation};
