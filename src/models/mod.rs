pub mod analysis;
pub mod dataset;
pub mod quote;
pub mod record;

pub use analysis::{
    AnalysisResult, Correlation, Exclusion, MarketSegments, MarketSummary, PerformanceCategory, RiskMetrics,
    SegmentCount, SymbolStats, VolumeLeader,
};
pub use dataset::{Dataset, TimeWindow};
pub use quote::{MarketCapCategory, QuoteInfo};
pub use record::{Field, Record, RecordKey};
