//! Content transfer: per-transfer state, line-ending translation,
//! bandwidth throttling, the engine that drives them and multi-item
//! transfer queues.

pub mod engine;
pub mod queue;
pub mod state;
pub mod throttle;
pub mod translate;

pub use engine::{TransferEngine, TransferOutcome};
pub use queue::{FixedAction, Transfer, TransferItem, TransferKind, TransferPrompt, TransferReport};
pub use state::TransferState;
pub use throttle::{BandwidthThrottle, RateLimiter, Unlimited};
pub use translate::LineTranslator;
