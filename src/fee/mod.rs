//! Transaction fee estimation.

pub mod oracle;

pub use oracle::{FeeOracle, FeeQuote, FeeSettings, FeeSource, Urgency};
