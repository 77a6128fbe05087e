pub mod processor;

pub use processor::{run_once, Outcome, WorkerContext};
