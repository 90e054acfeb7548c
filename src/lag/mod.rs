pub mod offsets;
pub mod lag_computer;

pub use offsets::{MemoryOffsets, OffsetFetcher, OffsetFetcherFactory};
pub use lag_computer::{LagComputer, LagRecord, LagScan};
