//! Earshot Core
//!
//! Proximity-to-channel assignment: keeps players that are close to each other
//! in a simulated world inside the same voice channel, and separates them when
//! they drift apart.
//!
//! # Pipeline
//!
//! ```text
//! position report ──► Registry ──► NeighborResolver ──► AssignmentPolicy ──► ChannelPool
//!                     (who/where)   (partner or none)    (merge/split/stay)   (destination)
//! ```
//!
//! Everything in this crate is synchronous and free of I/O. The node crate
//! owns the collaborators (member directory, channel graph, move sink) and
//! drives these pieces once per report.
//!
//! # Merge tie-break
//!
//! When two players find each other, only the one whose key sorts greater
//! moves into the other's channel. The smaller one records the pairing and
//! waits to be joined, so a pair never issues crossing moves.

mod error;
mod geometry;
mod ids;
mod neighbors;
mod policy;
mod pool;
mod registry;

pub use error::{Error, Result};
pub use geometry::{DistanceMetric, Position};
pub use ids::{ChannelId, IdentityId, PlayerKey};
pub use neighbors::{NeighborResolver, Partner, PartnerStrategy};
pub use policy::{
    Action, AssignmentPolicy, Decision, Observation, PartnerView, PlayerState, PolicyConfig,
    Reason, SplitPolicy, Target,
};
pub use pool::{ChannelPool, PoolIntent};
pub use registry::{PlayerRecord, Registry};

/// Default proximity limit, in world units.
pub const DEFAULT_DISTANCE_LIMIT: f64 = 15.0;
