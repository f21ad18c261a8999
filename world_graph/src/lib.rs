//! # World Graph
//!
//! The "world bible" crate for a scenario: the authored topology of people,
//! locations, activities, events, asset pools and state triggers, plus the
//! mutable per-node runtime state a play session accumulates.
//!
//! Topology and state are separate types. A [`GraphStore`] is frozen
//! once loaded; a [`StateStore`] is the only thing that changes during play, and
//! nothing in this crate makes decisions about *what* should change.

pub mod error;
pub mod graph;
pub mod node;
pub mod registry;
pub mod state;
pub mod tag;

pub use error::*;
pub use graph::*;
pub use node::*;
pub use registry::*;
pub use state::*;
pub use tag::*;
