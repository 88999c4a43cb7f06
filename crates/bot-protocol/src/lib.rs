//! Shared wire/data-model types for the bot detection & response kernel.
//!
//! This crate holds plain value types only: no async, no I/O, no locking.
//! `bot-core` owns all behavior; this crate owns the shapes that cross
//! component boundaries (and, via `serde`, the process boundary for
//! persistence and the CLI/gateway consumers).

pub mod cluster;
pub mod identity;
pub mod policy;
pub mod reputation;
pub mod signal;
pub mod signature;
pub mod spectral;

pub use cluster::{BotCluster, ClusterType};
pub use identity::{IdentityKind, IdentityVectors};
pub use policy::{
    ApiKeyConfig, DetectionPolicy, PathMapping, PolicyAction, PolicyTransition,
    TransitionCondition, TransitionEffect,
};
pub use reputation::{PatternReputationEntry, PatternType, ReputationState};
pub use signal::{BlackboardValue, DetectionContribution, EarlyExitVerdict, RiskBand};
pub use signature::{RequestObservation, SignatureBehavior};
pub use spectral::SpectralFeatures;

/// Current on-disk schema version for the reputation snapshot, which must
/// be versioned. Bump whenever `PatternReputationEntry`'s serialized shape
/// changes in a way that isn't forward compatible.
pub const REPUTATION_SCHEMA_VERSION: u32 = 1;
