pub mod delta;
pub mod merge;

pub use delta::{compute_delta, Delta, DeltaMode, RefreshReason};
pub use merge::{build_snapshot, merge, merge_sources};
