//! Data types that flow between the sweeper's components.
//!
//! Upload records are produced by the collector, enriched with sizes, narrowed
//! by selectors and filters, and finally summarized in reports.

pub mod bucket;
pub mod progress;
pub mod report;
pub mod selector;
pub mod upload;

pub use bucket::{BucketRef, DEFAULT_REGION};
pub use progress::{DeletionFailure, DeletionResult, ProgressState};
pub use report::{CostBreakdown, DryRunReport, GroupTotals, SizeReport};
pub use selector::{DeleteSelector, ListScope};
pub use upload::UploadRecord;
