pub mod catalog;
pub mod command;
pub mod engine;
pub mod gate;
pub mod ledger;
pub mod recommend;
pub mod report;
pub mod sequence;
pub mod session;

pub use catalog::{CatalogGame, CatalogHall, TableCatalog, TableKey};
pub use command::{parse_command, Command};
pub use engine::{
    state_actor, ConversationEngine, Dispatch, DispatchContext, Disposition, EnginePolicy,
    Outbound, Reply, Route,
};
pub use gate::{throttle_key, DedupeCache, GateDecision, RateGate};
pub use ledger::{LedgerBook, LedgerEntry};
pub use report::{BusinessDayPolicy, ReportAggregator};
pub use sequence::{SequenceBounds, Side};
pub use session::{SessionState, Stage};
