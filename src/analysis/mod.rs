pub mod clustering;
pub mod correlation;
pub mod risk;
pub mod stats;

pub use clustering::{kmeans, standardize, KMeansParams, KMeansResult};
pub use correlation::{correlation_matrix, pearson, ReturnSeries};
pub use risk::{conditional_var, historical_var, max_drawdown, risk_metrics, TRADING_DAYS};
