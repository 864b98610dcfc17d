//! Off-chain API clients for the liquidation worker.
//!
//! This crate provides HTTP and queue collaborators for:
//! - Candidate discovery: Mars unhealthy positions API or a FIFO queue
//! - Pool snapshots: Osmosis LCD and Astroport factory providers
//! - Swap routing: sidecar query server and Astroport requesters with a fallback registry

mod candidates;
pub mod pools;
mod queue;
pub mod swap;

pub use candidates::{
    select_candidates, ApiVersion, CandidateFeed, CandidatePosition, HealthFactorFilter,
    HttpCandidateFeed,
};
pub use pools::{AstroportPoolProvider, FetchRetry, OsmosisPoolProvider, PoolProvider};
pub use queue::{InMemoryQueue, LiquidationQueue, QueueCandidateFeed};
pub use swap::{
    AstroportRouteRequester, RouteQuote, RouteRequester, RouteRequesterRegistry, SqsRouteRequester,
};
