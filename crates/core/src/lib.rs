#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod metrics;
pub mod topology;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, FeedpipeError, TopologyError};

// 설정
pub use config::{ConnectionSettings, FeedpipeConfig, GeneralConfig, PipelineConfig, PipelineRole};

// 토폴로지
pub use topology::{BotQueues, PipelineTopology};

// 큐 이름
pub use types::{DestinationQueues, QueueName};
