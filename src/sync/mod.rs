pub mod driver;
pub mod mapper;
pub mod media;
pub mod sweeper;

pub use driver::{Reconciler, SyncError, SyncErrorKind};
