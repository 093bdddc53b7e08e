pub mod catalog;
pub mod interpret;
pub mod linker;
pub mod metrics;
pub mod parser;
pub mod session;
pub mod step;
pub mod tree;
pub mod view;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::catalog::NodeCatalog;
    pub use crate::interpret::{interpret, BenchmarkRecord, OutputPreview, TokenUsage};
    pub use crate::linker::{infer_sub_run, link, NodeKey, SubRunLinks};
    pub use crate::metrics::merge_metrics_prefer_longer;
    pub use crate::parser::{Ledger, RunStatus, RunSummary};
    pub use crate::session::{ConnectionState, IngestOutcome, IngestSummary, WatchSession};
    pub use crate::step::{Step, StepId, StepMetrics, StepStatus, WaitingInfo};
    pub use crate::tree::{build_step_tree, flatten, tree_run_ids, ExpansionState, StepTreeNode};
    pub use crate::view::{resolve_selection, root_run_id, RunView, StepView, ViewStatus};
}
