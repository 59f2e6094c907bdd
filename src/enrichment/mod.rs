pub mod fallback;
mod hooks;
mod scheduler;
mod task;
pub mod uniquifier;

#[cfg(test)]
pub mod test_support;

pub use hooks::ArticleLifecycleHooks;
pub use scheduler::{EnrichmentScheduler, SchedulerConfig};
