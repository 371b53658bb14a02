pub mod backend;
pub mod dedupe;
pub mod identity;
pub mod lifecycle;
pub mod migration;
pub mod store;

pub use backend::{BackendError, JsonFileBackend, MemoryBackend, StorageBackend, StorageUsage};
pub use dedupe::{Admission, DedupeEngine};
pub use identity::{IdentityResolver, ResolvedIdentity};
pub use lifecycle::{CycleOutcome, LifecycleManager, QuotaOutcome, SkipReason};
pub use migration::{migrate_legacy, MigrationOutcome};
pub use store::{HistoryFilter, ImportPolicy, Partition, RecordStore, SortOrder, StoreError};
