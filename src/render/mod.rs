//! Run outputs: filtered report, statistics and per-flow results.

pub mod report;
pub mod sarif;
pub mod stats;

pub use report::write_results;
pub use sarif::{read_report, remaining_code_flows, rewrite_report, write_report};
pub use stats::{read_stats, write_stats};
