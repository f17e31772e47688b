pub mod filter;
pub mod planner;
pub mod sort;

pub use filter::{Comparison, FilterExpr};
pub use planner::{plan, PlannedQuery, QueryPlanner, DEFAULT_MAX_LIMIT};
pub use sort::{SortExpr, SortOrder};
