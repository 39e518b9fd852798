pub mod fixes;
pub mod history;
pub mod knowledge;
pub mod repair_cycle;

pub use fixes::{suggest_fixes, FixSuggestion};
pub use history::{
    AttemptHistory,
    AttemptRecord,
    Diagnostic,
    DiagnosticKind,
    HistoryError,
    Stage,
};
pub use knowledge::{KnowledgeEntry, KnowledgeLog};
pub use repair_cycle::{CancellationFlag, CycleReport, CycleState, RepairCycle, StopReason};
