pub mod aggregation;
pub mod recommendation;
pub mod selection;
pub mod types;

pub use aggregation::AggregationTask;
pub use recommendation::RecommendationTask;
pub use selection::SelectionTask;
pub use types::{TurnCommand, session_keys};
