//! HTTP API handlers for tcv-engine

pub mod assess;
pub mod assessments;
pub mod health;
pub mod review;
pub mod rules;
pub mod stats;

pub use assess::assess_routes;
pub use assessments::assessment_routes;
pub use health::health_routes;
pub use review::review_routes;
pub use rules::rule_routes;
pub use stats::stats_routes;
