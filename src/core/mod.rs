mod cache;
mod error;
mod keypool;
mod models;
mod settings;

pub use cache::ResultCache;
pub use error::FetchError;
pub use keypool::{Credential, KeyPool};
pub use models::{current_value, DemandUpdate, EntityId, EntityRef, StatusSnapshot, SweepCheckpoint};
pub use settings::Settings;
