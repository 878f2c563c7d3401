pub mod kv;
pub mod snapshots;

pub use kv::KvStore;
pub use snapshots::SnapshotStore;
