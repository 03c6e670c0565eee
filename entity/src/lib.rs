pub mod chunk_status;
pub mod recording_chunks;
pub mod recording_status;
pub mod recordings;

/// A type alias that represents any Entity's internal id field data type.
/// Aliased so that it's easy to change the underlying type if necessary.
pub type Id = i64;
