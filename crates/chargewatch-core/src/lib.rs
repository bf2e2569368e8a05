//! # chargewatch-core
//!
//! Polling and notification engine for charging station availability.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **StationRegistry** - Immutable station name to id mapping
//! - **PollEngine** - Per-station poll loops driven by registered hooks
//! - **Hook** - Callback interface invoked with each new station state
//! - **ThresholdHook** - Free-slot threshold subscription built on `Hook`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌────────────────────┐
//! │   Caller    │────▶│ PollEngine  │────▶│ RateLimitedSession │
//! └─────────────┘     └─────────────┘     └────────────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │  dispatch   │────▶ Hook
//!                     └─────────────┘
//! ```

mod dispatch;
pub mod engine;
pub mod hook;
pub mod record;
pub mod registry;
pub mod sink;
pub mod subscription;

#[cfg(test)]
mod testing;

pub use engine::{EngineConfig, EngineError, PollEngine};
pub use hook::{Hook, HookError, HookOutcome};
pub use record::StationRecord;
pub use registry::{StationKey, StationRegistry};
pub use sink::EventSink;
pub use subscription::{Notice, Notifier, SubscriptionError, SubscriptionState, ThresholdHook};
