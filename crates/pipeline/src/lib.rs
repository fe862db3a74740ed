#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`broker`]: 브로커 원시 연산 trait과 redis / 인메모리 백엔드
//! - [`queues`]: 토폴로지 기반 소스/목적지 큐 바인딩
//! - [`pipeline`]: 전달 엔진 (수신, 확인, 송신)
//! - [`admin`]: 큐 길이, 큐 비우기, 고아 큐 탐지, 메시지 확인/주입
//! - [`factory`]: 브로커 레지스트리와 파이프라인 팩토리
//! - [`bot`]: 봇 처리 루프
//! - [`error`]: 도메인 에러 타입

pub mod admin;
pub mod bot;
pub mod broker;
pub mod error;
pub mod factory;
pub mod pipeline;
pub mod queues;

// --- 주요 타입 re-export ---

// 에러
pub use error::PipelineError;

// 브로커
pub use broker::{Broker, BrokerOp, DynBroker, FaultKind, MemoryBroker, MemoryStore, RedisBroker};

// 전달 엔진
pub use pipeline::{DeliveryState, Pipeline};

// 큐 바인딩
pub use queues::{QueueResolver, SourceBinding};

// 관리
pub use admin::{BotQueueReport, OrphanedQueue, QueueAdmin, QueueCount, QueueReport};

// 팩토리
pub use factory::{BrokerConstructor, BrokerRegistry, PipelineFactory};

// 봇 러너
pub use bot::{BotRunner, ErrorProcedure, ProcessError, Processor, RunSummary, RunnerOptions};
