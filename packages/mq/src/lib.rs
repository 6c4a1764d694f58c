pub mod broker;
pub mod error;

pub use broker::{JUDGE_QUEUE, PLAGIARISM_QUEUE, QueueBroker, QueueConsumer};
pub use error::MqError;
