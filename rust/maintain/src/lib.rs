pub mod config;
pub mod context;
pub mod drain;
pub mod job;
pub mod jobs;
pub mod metrics;
pub mod reaper;
pub mod registry;
pub mod runner;

pub use config::MaintainConfig;
pub use context::{AdminIdentity, AdminIdentityError, JobContext};
pub use drain::{batch_drain, DrainOutcome, DrainStatus};
pub use job::{JobConfig, JobConfigError, JobOption, MaintainJob};
pub use jobs::{register_builtin_jobs, JobDeps};
pub use metrics::MaintainMetrics;
pub use reaper::{start_service_reaper, ServiceReaper, ServiceReaperConfig, ServiceReaperError};
pub use registry::JobRegistry;
pub use runner::{MaintainError, MaintainJobRunner};
