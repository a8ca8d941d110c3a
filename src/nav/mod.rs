//! NAV aggregation.

mod aggregator;

pub use aggregator::NavCalculator;
