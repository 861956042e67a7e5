pub mod admission;
pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod sandbox;
pub mod store;
pub mod submission;

pub use compare::{Verdict, VerdictStatus, compare};
pub use engine::{CheckEngine, CheckRequest};
pub use error::{CheckError, StoreError};

/// Collision-resistant token used for scratch file names and image tags.
pub fn unique_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
