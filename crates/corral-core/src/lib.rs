//! Provider-agnostic orchestration engine for corral (§4).
//!
//! This crate owns everything downstream of the provider abstraction: the
//! filter & plan builder, the bounded worker pool and its per-repository
//! retry state machine, the durable session store, the API optimization
//! layer, the sync engine, config loading, the git subprocess wrapper, the
//! lock file, and the marker file writer. Provider adapters
//! (`corral-github`, `corral-gitlab`, `corral-gitea`) depend on this crate
//! for [`provider::Provider`] and the shared error taxonomy; the CLI
//! (`corral-cli`) depends on this crate for everything else.

pub mod cancel;
pub mod caching_provider;
pub mod config;
pub mod engine;
pub mod environment;
pub mod filter;
pub mod git;
pub mod lock;
pub mod marker;
pub mod optimizer;
pub mod provider;
pub mod store;
pub mod sync;

pub use cancel::CancellationToken;
pub use caching_provider::CachingProvider;
pub use engine::{Reporter, RunSummary, TaskOutcome};
pub use filter::{Plan, PlannedRepository, SkippedRepository, build_plan};
pub use optimizer::{ApiOptimizer, ApiOptimizerMetrics, Batcher, Deduplicator, RateLimiter};
pub use provider::Provider;
pub use store::{SessionInfo, SessionStore};
pub use sync::{SyncAction, SyncEngine, SyncItem, SyncPlan, SyncReport};
