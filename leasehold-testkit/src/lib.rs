//! Test doubles for `leasehold`.
//!
//! - [`ManualClock`] - simulated time that advances only when slept on
//! - [`TokioClock`] - lock clock driven by paused tokio time
//! - [`RecordingLeaseStore`] - in-memory lease table with call counting and
//!   fault injection

pub mod clock;
pub mod store;

pub use clock::ManualClock;
pub use leasehold::TokioClock;
pub use store::RecordingLeaseStore;
