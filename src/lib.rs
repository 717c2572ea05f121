pub mod actors;
pub mod config;
pub mod evaluator;
pub mod notifier;
pub mod probe;
pub mod util;
