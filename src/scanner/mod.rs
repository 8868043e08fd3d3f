//! Price observation and opportunity detection.

pub mod detector;
pub mod profit;
pub mod types;

pub use profit::{NotionalSpreadPolicy, ProfitInputs, ProfitPolicy};
pub use detector::{OpportunityScanner, ScanSettings};
pub use types::{Opportunity, OpportunitySummary, PriceKey, PricePoint, Token, TradingPair, Venue};
