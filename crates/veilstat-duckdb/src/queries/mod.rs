pub mod counts;
pub mod filters;
pub mod funnel_results;
pub mod properties;
