//! Link-enrichment orchestration.
//!
//! Ties the scanner, the resolution cache, and the GitHub client together
//! into one pass per document (see [`LinkEnricher::enrich`]).

pub mod pipeline;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use pipeline::{LinkEnricher, PassReport};
pub use resolver::{BatchResolver, ResolveStats, ResolverSettings};
