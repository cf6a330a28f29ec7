//! Research fan-out — turn each question into a computed, charted, narrated
//! result.
//!
//! Every question runs as its own task. A question either yields a complete
//! `ResearchResult` or is dropped; there are no partial results.

pub mod callback;
pub mod executor;

pub use callback::{NoOpResearchCallback, ResearchCallback};
pub use executor::{ResearchExecutor, SkipReason};
