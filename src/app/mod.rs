mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod types;


pub use orchestrator::RunOrchestrator;
pub use startup::{
    check_privileges, create_private_dir, export_no_proxy, merge_no_proxy, no_proxy_entries,
};
pub use types::RunState;
