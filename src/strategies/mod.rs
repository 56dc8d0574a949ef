// Signal sources over candle windows
pub mod reversal;
pub mod traits;
pub mod trend;

pub use reversal::ReversalStrategy;
pub use traits::SignalSource;
pub use trend::TrendStrategy;

use crate::config::{StrategyConfig, StrategyKind};

/// Builds the configured signal source.
pub fn from_config(config: &StrategyConfig) -> Box<dyn SignalSource> {
    match config.kind {
        StrategyKind::Reversal => Box::new(ReversalStrategy::new(
            config.reversal_body_ratio,
            config.min_trend_body_pct,
        )),
        StrategyKind::Trend => Box::new(TrendStrategy),
    }
}
