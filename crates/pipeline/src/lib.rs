pub mod compose;
pub mod cycle;
pub mod detector;
pub mod grouper;
pub mod ledger;
pub mod prompts;
pub mod records;
pub mod retry;
pub mod scheduler;
pub mod synth;

#[cfg(test)]
mod test_support;

pub use compose::{ComposedDigest, DigestComposer, load_analyses, write_digest};
pub use cycle::{CycleOutcome, CycleReport, PipelineState};
pub use detector::{ChangeDetector, ScanDecision};
pub use grouper::{CategoryAllowList, CategoryBatch, Grouping, group_records};
pub use ledger::{DeduplicationLedger, normalize_id};
pub use records::{SourceRecord, parse_records};
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use synth::{Synthesis, SynthesisInvoker};
