//! fleetpatch-gateway — the provider boundary.
//!
//! One trait method per provider capability the rollout workflow needs,
//! and nothing else: the gateway never retries and never polls. Retry
//! discipline lives in the poller; policy lives in the orchestrators.
//! Any vendor SDK can sit behind [`ProviderGateway`].
//!
//! [`MemoryGateway`] is a deterministic in-memory provider with scripted
//! convergence. It backs the test suites and the CLI rehearsal mode.

pub mod error;
pub mod gateway;
pub mod memory;

pub use error::{GatewayError, GatewayResult};
pub use gateway::ProviderGateway;
pub use memory::{CallCounts, MemoryGateway, Op, pending_member, serving_member};
