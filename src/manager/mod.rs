mod registry;
mod run;
mod state;


pub use registry::{ServiceManager, SERVICE_MANAGER_NAME};
pub use state::ServiceStatus;
