//! Core domain logic: codec, records, series storage and rebasing

pub mod codec;
pub mod config;
pub mod log;
pub mod rebase;
pub mod record;
pub mod store;

// Re-export main types for cleaner imports
pub use codec::{CodecError, PayloadCodec};
pub use rebase::{
    BASE_NAV, NormalizedPoint, NormalizedSeries, RebaseError, rebase, select_baseline,
    window_filter,
};
pub use record::{FundDetailProvider, FundRecord};
pub use store::{MergeOutcome, SeriesPoint, SeriesStore};
