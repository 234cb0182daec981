pub mod config;
pub mod service_reaper;

pub use config::ServiceReaperConfig;
pub use service_reaper::{
    start_service_reaper, ServiceCheckUnit, ServiceReaper, ServiceReaperError,
    ServiceReaperHandle,
};
