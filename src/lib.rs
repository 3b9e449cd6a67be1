pub mod core;
pub mod directory;
pub mod remote;
pub mod scheduler;
pub mod storage;

pub use self::core::{
    Credential, DemandUpdate, EntityId, EntityRef, FetchError, KeyPool, ResultCache, Settings,
    StatusSnapshot, SweepCheckpoint,
};
pub use directory::{EntityDirectory, StaticDirectory};
pub use remote::{HttpStatusApi, StatusApi};
pub use scheduler::{DemandScheduler, SweepPhase, SweepPoller, SweepStatus, VisibilityEvent};
pub use storage::{DocumentStore, MemoryStore};
