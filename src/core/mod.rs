pub mod downloader;
pub mod engine;
pub mod ledger;
pub mod planner;
pub mod policy;
pub mod resolver;
pub mod scanner;
pub mod uploader;

pub use downloader::Downloader;
pub use engine::{describe, ComponentOutcome, ComponentState, ModelSyncer, SyncReport};
pub use ledger::{Ledger, LEDGER_NAME};
pub use planner::{Direction, ReverseDrift, SyncPlanner, TransferPlan};
pub use policy::{AbortPolicy, ConfirmPolicy, Decision, ProceedPolicy, Verdict};
pub use resolver::VersionResolver;
pub use scanner::{LocalTreeScanner, Rename, ScanConfig};
pub use uploader::{UploadOptions, Uploader};
