//! 브로커 연결 -- 큐 브로커 원시 연산 추상화
//!
//! [`Broker`]는 전달 엔진이 사용하는 원시 연산을 정의합니다.
//!
//! | 연산 | 의미 | redis |
//! |------|------|-------|
//! | `push` | 큐 머리에 삽입 | `LPUSH` |
//! | `blocking_move` | 꼬리에서 꺼내 다른 큐 머리에 원자적으로 삽입 (대기) | `BRPOPLPUSH` |
//! | `peek_tail` | 꼬리 조회 | `LINDEX -1` |
//! | `pop_tail` | 꼬리 제거 | `RPOP` |
//! | `queue_len` | 길이 | `LLEN` |
//! | `delete` | 큐 삭제 | `DEL` |
//! | `nonempty_queues` | 비어 있지 않은 큐와 길이 | `SCAN` + `LLEN` |
//!
//! `Broker`는 RPITIT를 사용하므로 `dyn Broker`가 불가합니다.
//! 팩토리는 [`DynBroker`]를 통해 `Box<dyn DynBroker>`로 백엔드를 다룹니다.

pub mod memory;
pub mod redis;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::PipelineError;

pub use self::memory::{FaultKind, MemoryBroker, MemoryStore};
pub use self::redis::RedisBroker;

/// 힙에 할당된 Send 가능한 Future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 브로커 원시 연산 종류
///
/// 에러와 메트릭 레이블, 인메모리 장애 주입에 사용됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerOp {
    /// 머리 삽입
    Push,
    /// 원자적 대기 이동
    BlockingMove,
    /// 꼬리 조회
    PeekTail,
    /// 꼬리 제거
    PopTail,
    /// 길이 조회
    Length,
    /// 삭제
    Delete,
    /// 큐 목록 조회
    Scan,
}

impl BrokerOp {
    /// 메트릭 레이블 값
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::BlockingMove => "blocking_move",
            Self::PeekTail => "peek_tail",
            Self::PopTail => "pop_tail",
            Self::Length => "length",
            Self::Delete => "delete",
            Self::Scan => "scan",
        }
    }
}

impl fmt::Display for BrokerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 큐 브로커 연결
///
/// 연결 하나는 한 프로세스(봇 또는 관리 클라이언트)가 소유하며 공유하지 않습니다.
/// 연결되지 않은 상태의 연산은 [`PipelineError::NotConnected`]를 반환합니다.
pub trait Broker: Send {
    /// 브로커 종류 이름 (예: `"redis"`)
    fn kind(&self) -> &'static str;

    /// 현재 연결 여부
    fn is_connected(&self) -> bool;

    /// 브로커에 연결합니다. 닿을 수 없으면 [`PipelineError::Connection`].
    fn connect(&mut self) -> impl Future<Output = Result<(), PipelineError>> + Send;

    /// 연결을 해제합니다. 여러 번 호출해도 안전하며 실패하지 않습니다.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;

    /// 큐 머리에 메시지를 넣습니다.
    fn push(
        &mut self,
        queue: &str,
        message: Bytes,
    ) -> impl Future<Output = Result<(), PipelineError>> + Send;

    /// `source` 꼬리에서 꺼내 `destination` 머리에 넣고 그 메시지를 반환합니다.
    ///
    /// `source`가 비어 있으면 소켓 타임아웃까지 기다리며,
    /// 그 안에 메시지가 없으면 [`PipelineError::Timeout`]을 반환합니다.
    fn blocking_move(
        &mut self,
        source: &str,
        destination: &str,
    ) -> impl Future<Output = Result<Bytes, PipelineError>> + Send;

    /// 큐 꼬리 메시지를 제거하지 않고 조회합니다.
    fn peek_tail(
        &mut self,
        queue: &str,
    ) -> impl Future<Output = Result<Option<Bytes>, PipelineError>> + Send;

    /// 큐 꼬리 메시지를 제거하고 반환합니다.
    fn pop_tail(
        &mut self,
        queue: &str,
    ) -> impl Future<Output = Result<Option<Bytes>, PipelineError>> + Send;

    /// 큐 길이. 없는 큐는 0입니다.
    fn queue_len(&mut self, queue: &str) -> impl Future<Output = Result<u64, PipelineError>> + Send;

    /// 큐를 삭제합니다. 없는 큐도 성공입니다.
    fn delete(&mut self, queue: &str) -> impl Future<Output = Result<(), PipelineError>> + Send;

    /// 브로커에 있는 비어 있지 않은 모든 큐와 그 길이 (이름 순)
    ///
    /// 토폴로지와 무관하게 브로커 전체를 봅니다.
    fn nonempty_queues(
        &mut self,
    ) -> impl Future<Output = Result<BTreeMap<String, u64>, PipelineError>> + Send;
}

/// dyn-compatible 브로커 trait
///
/// `Broker`를 구현한 타입은 자동으로 `DynBroker`도 구현됩니다.
pub trait DynBroker: Send {
    /// 브로커 종류 이름
    fn kind(&self) -> &'static str;

    /// 현재 연결 여부
    fn is_connected(&self) -> bool;

    /// 브로커에 연결합니다.
    fn connect(&mut self) -> BoxFuture<'_, Result<(), PipelineError>>;

    /// 연결을 해제합니다.
    fn disconnect(&mut self) -> BoxFuture<'_, ()>;

    /// 큐 머리에 삽입합니다.
    fn push<'a>(
        &'a mut self,
        queue: &'a str,
        message: Bytes,
    ) -> BoxFuture<'a, Result<(), PipelineError>>;

    /// 원자적 대기 이동
    fn blocking_move<'a>(
        &'a mut self,
        source: &'a str,
        destination: &'a str,
    ) -> BoxFuture<'a, Result<Bytes, PipelineError>>;

    /// 꼬리 조회
    fn peek_tail<'a>(&'a mut self, queue: &'a str)
    -> BoxFuture<'a, Result<Option<Bytes>, PipelineError>>;

    /// 꼬리 제거
    fn pop_tail<'a>(&'a mut self, queue: &'a str)
    -> BoxFuture<'a, Result<Option<Bytes>, PipelineError>>;

    /// 큐 길이
    fn queue_len<'a>(&'a mut self, queue: &'a str) -> BoxFuture<'a, Result<u64, PipelineError>>;

    /// 큐 삭제
    fn delete<'a>(&'a mut self, queue: &'a str) -> BoxFuture<'a, Result<(), PipelineError>>;

    /// 비어 있지 않은 큐 목록
    fn nonempty_queues(&mut self) -> BoxFuture<'_, Result<BTreeMap<String, u64>, PipelineError>>;
}

impl<T: Broker> DynBroker for T {
    fn kind(&self) -> &'static str {
        Broker::kind(self)
    }

    fn is_connected(&self) -> bool {
        Broker::is_connected(self)
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<(), PipelineError>> {
        Box::pin(Broker::connect(self))
    }

    fn disconnect(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(Broker::disconnect(self))
    }

    fn push<'a>(
        &'a mut self,
        queue: &'a str,
        message: Bytes,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(Broker::push(self, queue, message))
    }

    fn blocking_move<'a>(
        &'a mut self,
        source: &'a str,
        destination: &'a str,
    ) -> BoxFuture<'a, Result<Bytes, PipelineError>> {
        Box::pin(Broker::blocking_move(self, source, destination))
    }

    fn peek_tail<'a>(
        &'a mut self,
        queue: &'a str,
    ) -> BoxFuture<'a, Result<Option<Bytes>, PipelineError>> {
        Box::pin(Broker::peek_tail(self, queue))
    }

    fn pop_tail<'a>(
        &'a mut self,
        queue: &'a str,
    ) -> BoxFuture<'a, Result<Option<Bytes>, PipelineError>> {
        Box::pin(Broker::pop_tail(self, queue))
    }

    fn queue_len<'a>(&'a mut self, queue: &'a str) -> BoxFuture<'a, Result<u64, PipelineError>> {
        Box::pin(Broker::queue_len(self, queue))
    }

    fn delete<'a>(&'a mut self, queue: &'a str) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(Broker::delete(self, queue))
    }

    fn nonempty_queues(&mut self) -> BoxFuture<'_, Result<BTreeMap<String, u64>, PipelineError>> {
        Box::pin(Broker::nonempty_queues(self))
    }
}
