pub mod cache;
pub mod types;

pub use cache::PolicyCache;
pub use types::{ActionKind, FieldVisibility, Policy, TrackedEntity};
