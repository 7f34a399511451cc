// src/tier.rs
//! Storage tier identifiers.

/// One of the two storage tiers a file can live in.
///
/// `Hot` is the serving tier; `Cold` is an optional retention tier below
/// `Hot` and is never served directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Hot,
    Cold,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Hot => write!(f, "hot"),
            Tier::Cold => write!(f, "cold"),
        }
    }
}
