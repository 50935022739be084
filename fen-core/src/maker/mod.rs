//! Two-sided quoting: engine, quote formation, features, cancel throttle.

pub mod engine;
pub mod feature;
pub mod quote;
pub mod throttle;

pub use engine::{CycleReport, MakerEngine, MakerStats, SideAction, SkipReason};
pub use feature::{Adjustment, FeatureContext, MarketEvent, QuoteFeature, SideGates};
pub use quote::{form_quotes, QuoteAbort, QuoteIntent, QuotePair};
pub use throttle::CancelWindow;
