pub mod engine;
pub mod score;

pub use engine::{SearchEngine, SearchQuery, SearchMode};
pub use score::{ScoredFact, ScoredObservation};
