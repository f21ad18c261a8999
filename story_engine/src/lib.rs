//! # Story Engine
//!
//! The decision layer over a [`world_graph`] scenario. Each externally
//! triggered sweep walks the graph, turns authored qualitative tags into
//! numbers, scores and picks one outcome per eligible node, binds it to media
//! assets, and commits the resulting state changes in one batch.
//!
//! ## Core Components
//!
//! - **qualitative**: descriptor taxonomy and the cycle-seeded resolver
//! - **persona**: scoped bias profiles and conditional persona swaps
//! - **outcome**: outcome bundles, scoring and selection rules
//! - **asset**: catalog boundary, mood and recency ranking, asset chains
//! - **adjuster**: pluggable read-only scoring hooks
//! - **orchestrator**: the sweep state machine and its report
//! - **config**: TOML engine configuration
//!
//! ## Design Philosophy
//!
//! - **Read, then write once**: nothing touches runtime state before the commit phase
//! - **Node-local failure**: a node that cannot advance is reported, the sweep goes on
//! - **Replayable**: every random draw is seeded from `(seed, node, key, cycle)`

pub mod adjuster;
pub mod asset;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod persona;
pub mod qualitative;

pub use adjuster::*;
pub use asset::*;
pub use config::*;
pub use error::*;
pub use orchestrator::*;
pub use outcome::*;
pub use persona::*;
pub use qualitative::*;
