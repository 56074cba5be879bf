//! Pulse Engine - the coordination core
//!
//! Components over the store boundary:
//! - `ClaimResolver`: race-free resolution of concurrent claim attempts
//! - `ProximityMatcher`: radius queries over active events and collectibles
//! - `LifecycleScheduler`: recurring drop and expiry-sweep duties
//! - `EventDirectory`: event creation and the one-way ended transition
//!
//! None of them hold application-level locks. The store's atomic conditional
//! update is the only correctness mechanism, so the guarantees hold across
//! process boundaries when the engine is horizontally scaled.

pub mod claim;
pub mod events;
pub mod lifecycle;
pub mod proximity;

pub use claim::{ClaimOutcome, ClaimReason, ClaimResolver};
pub use events::EventDirectory;
pub use lifecycle::{LifecycleConfig, LifecycleScheduler};
pub use proximity::ProximityMatcher;
