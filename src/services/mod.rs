pub mod extractor;
pub mod notifier;
pub mod queue;
pub mod scratch;
pub mod storage;
