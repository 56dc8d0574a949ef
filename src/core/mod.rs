pub mod engine;
pub mod position;
pub mod risk;
pub mod state_machine;

pub use engine::{EngineSettings, TickOutcome, TradingEngine};
pub use position::{OpenPosition, Position, PositionState};
pub use risk::{Levels, PriceTick, RiskPolicy};
pub use state_machine::{PositionMachine, RecoveryKind, Transition};
