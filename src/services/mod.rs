mod probe;
mod process;

#[cfg(test)]
mod tests;

pub use probe::{wait_until_ready, ProbeOutcome, RetryConfig};
pub use process::ProcessService;
