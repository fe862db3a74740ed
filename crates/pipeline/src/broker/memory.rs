//! 인메모리 브로커 -- 테스트와 단일 프로세스 실행용
//!
//! [`MemoryStore`]는 큐 이름 → `VecDeque<Bytes>` 저장소이며 복제(clone)해도 같은 데이터를
//! 가리킵니다. 여러 [`MemoryBroker`]가 하나의 저장소를 공유하면 여러 프로세스가
//! 같은 브로커에 붙은 상황을 흉내낼 수 있습니다.
//!
//! 큐의 머리(head)는 `VecDeque`의 앞, 꼬리(tail)는 뒤입니다.
//!
//! # 장애 주입
//! - [`MemoryStore::set_unreachable`]: 이후 `connect`가 실패
//! - [`MemoryStore::inject_fault`]: 지정한 연산의 다음 호출 한 번을 실패시킴

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;
use tracing::debug;

use super::{Broker, BrokerOp};
use crate::error::PipelineError;

/// 주입할 장애 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// [`PipelineError::Timeout`]으로 실패
    Timeout,
    /// [`PipelineError::Broker`]로 실패
    Failure,
}

#[derive(Default)]
struct StoreInner {
    queues: Mutex<HashMap<String, VecDeque<Bytes>>>,
    faults: Mutex<HashMap<BrokerOp, VecDeque<FaultKind>>>,
    unreachable: AtomicBool,
    pushed: Notify,
}

/// 공유 인메모리 큐 저장소
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Bytes>>> {
        // 락 보유 중 패닉해도 큐 데이터는 일관된 상태로 남음
        self.inner
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, HashMap<BrokerOp, VecDeque<FaultKind>>> {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// true로 설정하면 이후 연결 시도가 실패합니다.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// 브로커에 닿을 수 없는 상태인지 확인합니다.
    pub fn is_unreachable(&self) -> bool {
        self.inner.unreachable.load(Ordering::SeqCst)
    }

    /// `op`의 다음 호출 한 번을 `kind`로 실패시킵니다. 여러 번 호출하면 순서대로 쌓입니다.
    pub fn inject_fault(&self, op: BrokerOp, kind: FaultKind) {
        self.faults().entry(op).or_default().push_back(kind);
    }

    fn take_fault(&self, op: BrokerOp) -> Option<FaultKind> {
        self.faults().get_mut(&op).and_then(VecDeque::pop_front)
    }

    /// 큐 길이 (없으면 0)
    pub fn len(&self, queue: &str) -> usize {
        self.queues().get(queue).map_or(0, VecDeque::len)
    }

    /// 모든 큐가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.queues().values().all(VecDeque::is_empty)
    }

    /// 큐 내용을 머리부터 꼬리 순서로 복사합니다.
    pub fn snapshot(&self, queue: &str) -> Vec<Bytes> {
        self.queues()
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 비어 있지 않은 큐 이름 (정렬됨)
    pub fn queue_names(&self) -> Vec<String> {
        self.nonempty_lengths().into_keys().collect()
    }

    /// 비어 있지 않은 큐와 길이
    fn nonempty_lengths(&self) -> BTreeMap<String, u64> {
        self.queues()
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(name, q)| (name.clone(), q.len() as u64))
            .collect()
    }

    /// 두 큐의 길이를 한 번의 락 안에서 읽습니다.
    pub fn len_pair(&self, first: &str, second: &str) -> (usize, usize) {
        let queues = self.queues();
        let len = |name: &str| queues.get(name).map_or(0, VecDeque::len);
        (len(first), len(second))
    }

    /// 큐 머리에 메시지를 넣습니다. 연결 상태와 주입된 장애를 거치지 않습니다.
    pub fn push(&self, queue: &str, message: Bytes) {
        self.queues()
            .entry(queue.to_owned())
            .or_default()
            .push_front(message);
        self.inner.pushed.notify_waiters();
    }

    /// 꼬리에서 꺼내 다른 큐 머리에 넣는 연산을 한 번의 락 안에서 수행합니다.
    fn try_move(&self, source: &str, destination: &str) -> Option<Bytes> {
        let mut queues = self.queues();
        let message = queues.get_mut(source)?.pop_back()?;
        queues
            .entry(destination.to_owned())
            .or_default()
            .push_front(message.clone());
        Some(message)
    }

    fn peek_tail(&self, queue: &str) -> Option<Bytes> {
        self.queues().get(queue).and_then(|q| q.back().cloned())
    }

    fn pop_tail(&self, queue: &str) -> Option<Bytes> {
        self.queues().get_mut(queue).and_then(VecDeque::pop_back)
    }

    fn delete(&self, queue: &str) {
        self.queues().remove(queue);
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("queues", &self.queue_names())
            .field("unreachable", &self.is_unreachable())
            .finish()
    }
}

/// [`MemoryStore`] 위의 브로커 연결
#[derive(Debug)]
pub struct MemoryBroker {
    store: MemoryStore,
    socket_timeout: Duration,
    connected: bool,
}

impl MemoryBroker {
    /// 저장소와 블로킹 대기 시간으로 생성합니다. 연결은 `connect`에서 수행합니다.
    pub fn new(store: MemoryStore, socket_timeout: Duration) -> Self {
        Self {
            store,
            socket_timeout,
            connected: false,
        }
    }

    /// 연결된 저장소 핸들
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// 연결 여부와 주입된 장애를 확인합니다.
    fn check(&self, op: BrokerOp) -> Result<(), PipelineError> {
        if !self.connected {
            return Err(PipelineError::NotConnected);
        }
        match self.store.take_fault(op) {
            None => Ok(()),
            Some(FaultKind::Timeout) => Err(PipelineError::Timeout {
                operation: op,
                timeout: self.socket_timeout,
            }),
            Some(FaultKind::Failure) => Err(PipelineError::Broker {
                operation: op,
                reason: "injected failure".to_owned(),
            }),
        }
    }
}

impl Broker for MemoryBroker {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), PipelineError> {
        if self.store.is_unreachable() {
            return Err(PipelineError::Connection {
                broker: "memory".to_owned(),
                address: "in-process".to_owned(),
                reason: "store marked unreachable".to_owned(),
            });
        }
        self.connected = true;
        debug!("memory broker connected");
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    async fn push(&mut self, queue: &str, message: Bytes) -> Result<(), PipelineError> {
        self.check(BrokerOp::Push)?;
        self.store.push(queue, message);
        Ok(())
    }

    async fn blocking_move(
        &mut self,
        source: &str,
        destination: &str,
    ) -> Result<Bytes, PipelineError> {
        self.check(BrokerOp::BlockingMove)?;
        let deadline = tokio::time::Instant::now() + self.socket_timeout;
        loop {
            // 확인 전에 대기 등록을 해야 그 사이의 push를 놓치지 않음
            let notified = self.store.inner.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.store.try_move(source, destination) {
                return Ok(message);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(PipelineError::Timeout {
                    operation: BrokerOp::BlockingMove,
                    timeout: self.socket_timeout,
                });
            }
        }
    }

    async fn peek_tail(&mut self, queue: &str) -> Result<Option<Bytes>, PipelineError> {
        self.check(BrokerOp::PeekTail)?;
        Ok(self.store.peek_tail(queue))
    }

    async fn pop_tail(&mut self, queue: &str) -> Result<Option<Bytes>, PipelineError> {
        self.check(BrokerOp::PopTail)?;
        Ok(self.store.pop_tail(queue))
    }

    async fn queue_len(&mut self, queue: &str) -> Result<u64, PipelineError> {
        self.check(BrokerOp::Length)?;
        Ok(self.store.len(queue) as u64)
    }

    async fn delete(&mut self, queue: &str) -> Result<(), PipelineError> {
        self.check(BrokerOp::Delete)?;
        self.store.delete(queue);
        Ok(())
    }

    async fn nonempty_queues(&mut self) -> Result<BTreeMap<String, u64>, PipelineError> {
        self.check(BrokerOp::Scan)?;
        Ok(self.store.nonempty_lengths())
    }
}
