//! 전달 엔진 -- 수신, 확인(ack), 송신
//!
//! [`Pipeline`]은 한 봇(또는 관리 클라이언트)이 소유하는 세션입니다.
//! 모든 연산이 `&mut self`를 받으므로 한 세션을 여러 작업이 동시에 쓰지 못합니다.
//!
//! # 상태 전이
//! ```text
//! Idle → receive() → Receiving → (메시지 반환) → Held → acknowledge() → Idle
//! ```
//! `Held`에서 프로세스가 죽으면 메시지는 내부 큐에 남고,
//! 다음 `receive()`가 소스 큐보다 내부 큐를 먼저 확인하여 다시 전달합니다.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use feedpipe_core::config::ConnectionSettings;
use feedpipe_core::metrics as m;
use feedpipe_core::types::{DestinationQueues, QueueName};
use metrics::counter;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::broker::DynBroker;
use crate::error::PipelineError;
use crate::queues::{QueueResolver, SourceBinding};

/// 전달 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// 보유한 메시지 없음
    Idle,
    /// 수신 대기 중
    Receiving,
    /// 메시지를 봇에 넘겼고 아직 확인하지 않음
    Held,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Receiving => write!(f, "receiving"),
            Self::Held => write!(f, "held"),
        }
    }
}

/// 파이프라인 세션
pub struct Pipeline {
    broker: Box<dyn DynBroker>,
    settings: ConnectionSettings,
    load_balance: bool,
    source: Option<SourceBinding>,
    destinations: DestinationQueues,
    cursor: usize,
    state: DeliveryState,
    session_id: Uuid,
}

impl Pipeline {
    /// 연결되지 않은 세션을 생성합니다. 큐 바인딩은 비어 있습니다.
    pub fn new(broker: Box<dyn DynBroker>, settings: ConnectionSettings, load_balance: bool) -> Self {
        Self {
            broker,
            settings,
            load_balance,
            source: None,
            destinations: DestinationQueues::empty(),
            cursor: 0,
            state: DeliveryState::Idle,
            session_id: Uuid::new_v4(),
        }
    }

    // --- 바인딩 ---

    /// 소스 큐를 바인딩합니다.
    pub fn set_source(&mut self, binding: SourceBinding) {
        debug!(
            session = %self.session_id,
            source = %binding.source,
            internal = %binding.internal,
            "source queue bound"
        );
        self.source = Some(binding);
    }

    /// 목적지 큐를 바인딩하고 부하 분산 커서를 0으로 돌립니다.
    pub fn set_destinations(&mut self, destinations: DestinationQueues) {
        debug!(
            session = %self.session_id,
            count = destinations.len(),
            "destination queues bound"
        );
        self.destinations = destinations;
        self.cursor = 0;
    }

    /// 부하 분산 여부를 바꿉니다.
    pub fn set_load_balance(&mut self, load_balance: bool) {
        self.load_balance = load_balance;
    }

    /// 토폴로지에서 봇의 큐를 찾아 바인딩합니다.
    ///
    /// 소스 큐가 없는 봇(수집기)은 목적지만 바인딩합니다.
    /// 실패하면 기존 바인딩을 그대로 둡니다.
    /// 봇별 `load-balance` 값이 있으면 현재 설정을 덮어씁니다.
    pub fn bind_bot(&mut self, resolver: &QueueResolver, bot_id: &str) -> Result<(), PipelineError> {
        let bot = resolver.topology().bot(bot_id).ok_or_else(|| {
            PipelineError::Configuration(format!("bot '{bot_id}' is not defined in the pipeline"))
        })?;
        let source = match bot.source_queue {
            Some(_) => Some(resolver.bind_source(bot_id)?),
            None => None,
        };
        let destinations = resolver.bind_destinations_for(bot_id)?;

        match source {
            Some(binding) => self.set_source(binding),
            None => self.source = None,
        }
        self.set_destinations(destinations);
        self.load_balance = resolver.load_balance_for(bot_id, self.load_balance);
        Ok(())
    }

    // --- 조회 ---

    /// 바인딩된 소스 큐
    pub fn source(&self) -> Option<&SourceBinding> {
        self.source.as_ref()
    }

    /// 바인딩된 목적지 큐
    pub fn destinations(&self) -> &DestinationQueues {
        &self.destinations
    }

    /// 부하 분산 여부
    pub fn load_balance(&self) -> bool {
        self.load_balance
    }

    /// 현재 전달 상태
    pub fn state(&self) -> DeliveryState {
        self.state
    }

    /// 세션 ID
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// 연결 설정
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// 브로커 종류 이름
    pub fn broker_kind(&self) -> &'static str {
        self.broker.kind()
    }

    /// 연결 여부
    pub fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    // --- 연결 ---

    /// 브로커에 연결합니다.
    pub async fn connect(&mut self) -> Result<(), PipelineError> {
        self.broker.connect().await?;
        debug!(
            session = %self.session_id,
            broker = self.broker.kind(),
            host = %self.settings.host,
            port = self.settings.port,
            db = self.settings.db,
            "pipeline connected"
        );
        Ok(())
    }

    /// 연결을 해제합니다. 여러 번 호출해도 안전합니다.
    pub async fn disconnect(&mut self) {
        self.broker.disconnect().await;
        self.state = DeliveryState::Idle;
    }

    // --- 전달 ---

    /// 다음 메시지를 받습니다.
    ///
    /// 내부 큐에 메시지가 있으면 소스 큐를 건드리지 않고 그 메시지를 돌려줍니다.
    /// 없으면 소스 큐 꼬리에서 내부 큐로 원자적으로 옮긴 메시지를 돌려줍니다.
    /// 블로킹 대기가 타임아웃되면 한 번 재연결 후 재시도하고, 다시 실패하면 에러를 전파합니다.
    pub async fn receive(&mut self) -> Result<Bytes, PipelineError> {
        let binding = self.source.clone().ok_or_else(|| {
            PipelineError::Configuration("receive requires a bound source queue".to_owned())
        })?;
        let span = info_span!("receive", session = %self.session_id, queue = %binding.source);

        async {
            self.state = DeliveryState::Receiving;
            let result = match self.receive_once(&binding).await {
                Err(e) if e.is_timeout() => {
                    warn!(error = %e, "blocking receive timed out, reconnecting once");
                    counter!(m::PIPELINE_RECONNECTS_TOTAL, m::LABEL_BROKER => self.broker.kind())
                        .increment(1);
                    self.broker.disconnect().await;
                    match self.broker.connect().await {
                        Ok(()) => self.receive_once(&binding).await,
                        Err(e) => Err(e),
                    }
                }
                other => other,
            };

            match result {
                Ok(message) => {
                    self.state = DeliveryState::Held;
                    counter!(m::PIPELINE_MESSAGES_RECEIVED_TOTAL, m::LABEL_QUEUE => binding.source.to_string())
                        .increment(1);
                    Ok(message)
                }
                Err(e) => {
                    self.state = DeliveryState::Idle;
                    self.record_failure(&e);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// 끝나기 전에 버린 `receive()` 뒤에 호출하여 `Receiving` 상태를 `Idle`로 돌립니다.
    ///
    /// 그 사이 옮겨진 메시지는 내부 큐에 남아 다음 `receive()`에서 다시 전달됩니다.
    pub fn abandon_receive(&mut self) {
        if self.state == DeliveryState::Receiving {
            debug!(session = %self.session_id, "pending receive abandoned");
            self.state = DeliveryState::Idle;
        }
    }

    async fn receive_once(&mut self, binding: &SourceBinding) -> Result<Bytes, PipelineError> {
        if let Some(message) = self.broker.peek_tail(binding.internal.as_str()).await? {
            debug!(internal = %binding.internal, "redelivering unacknowledged message");
            counter!(m::PIPELINE_MESSAGES_REDELIVERED_TOTAL, m::LABEL_QUEUE => binding.source.to_string())
                .increment(1);
            return Ok(message);
        }
        self.broker
            .blocking_move(binding.source.as_str(), binding.internal.as_str())
            .await
    }

    /// 보유 중인 메시지를 확인(ack)하여 내부 큐에서 제거합니다.
    ///
    /// 내부 큐가 비어 있으면 아무 일도 하지 않습니다.
    pub async fn acknowledge(&mut self) -> Result<(), PipelineError> {
        let binding = self.source.clone().ok_or_else(|| {
            PipelineError::Configuration("acknowledge requires a bound source queue".to_owned())
        })?;

        match self.broker.pop_tail(binding.internal.as_str()).await {
            Ok(popped) => {
                if popped.is_some() {
                    counter!(m::PIPELINE_MESSAGES_ACKNOWLEDGED_TOTAL, m::LABEL_QUEUE => binding.source.to_string())
                        .increment(1);
                } else {
                    debug!(session = %self.session_id, "acknowledge on empty internal queue");
                }
                self.state = DeliveryState::Idle;
                Ok(())
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// 메시지를 목적지 큐로 보냅니다.
    ///
    /// - 브로드캐스트: 모든 목적지에 복사
    /// - 부하 분산: 커서가 가리키는 목적지 하나에 넣고 커서를 한 칸 옮김
    /// - 목적지 없음: 성공으로 처리
    ///
    /// 실패하면 호출자는 수신한 메시지를 확인하면 안 됩니다.
    pub async fn send(&mut self, message: Bytes) -> Result<(), PipelineError> {
        if self.destinations.is_empty() {
            debug!(session = %self.session_id, "no destination queues, message not forwarded");
            return Ok(());
        }

        let result = if self.load_balance {
            self.send_balanced(message).await
        } else {
            self.send_broadcast(message).await
        };
        if let Err(e) = &result {
            self.record_failure(e);
        }
        result
    }

    async fn send_balanced(&mut self, message: Bytes) -> Result<(), PipelineError> {
        let len = self.destinations.len();
        let index = self.cursor % len;
        let Some(queue) = self.destinations.get(index) else {
            return Ok(());
        };
        self.broker.push(queue.as_str(), message).await?;
        counter!(m::PIPELINE_MESSAGES_SENT_TOTAL, m::LABEL_QUEUE => queue.to_string()).increment(1);
        // 성공한 뒤에만 전진하여 실패한 목적지를 다음에 다시 시도
        self.cursor = (index + 1) % len;
        Ok(())
    }

    async fn send_broadcast(&mut self, message: Bytes) -> Result<(), PipelineError> {
        for queue in self.destinations.iter() {
            self.broker.push(queue.as_str(), message.clone()).await?;
            counter!(m::PIPELINE_MESSAGES_SENT_TOTAL, m::LABEL_QUEUE => queue.to_string())
                .increment(1);
        }
        Ok(())
    }

    // --- 큐 단위 연산 (관리용) ---

    /// 각 큐의 길이를 셉니다. 없는 큐는 0입니다.
    pub async fn count_queued_messages<'q, I>(
        &mut self,
        queues: I,
    ) -> Result<BTreeMap<QueueName, u64>, PipelineError>
    where
        I: IntoIterator<Item = &'q QueueName>,
    {
        let mut counts = BTreeMap::new();
        for queue in queues {
            let len = self.broker.queue_len(queue.as_str()).await.inspect_err(|e| {
                self.record_failure(e);
            })?;
            counts.insert(queue.clone(), len);
        }
        Ok(counts)
    }

    /// 큐 꼬리(다음에 꺼낼 메시지)를 조회합니다.
    pub async fn peek_queue(&mut self, queue: &QueueName) -> Result<Option<Bytes>, PipelineError> {
        self.broker.peek_tail(queue.as_str()).await
    }

    /// 큐 꼬리 메시지를 꺼냅니다.
    pub async fn pop_queue(&mut self, queue: &QueueName) -> Result<Option<Bytes>, PipelineError> {
        self.broker.pop_tail(queue.as_str()).await
    }

    /// 큐를 삭제합니다. 토폴로지 검증은 하지 않습니다.
    pub async fn delete_queue(&mut self, queue: &QueueName) -> Result<(), PipelineError> {
        self.broker.delete(queue.as_str()).await
    }

    /// 브로커 전체에서 비어 있지 않은 큐와 길이를 조회합니다.
    pub async fn nonempty_queues(&mut self) -> Result<BTreeMap<String, u64>, PipelineError> {
        self.broker.nonempty_queues().await.inspect_err(|e| {
            self.record_failure(e);
        })
    }

    fn record_failure(&self, err: &PipelineError) {
        if let Some(op) = err.operation() {
            counter!(
                m::PIPELINE_BROKER_ERRORS_TOTAL,
                m::LABEL_BROKER => self.broker.kind(),
                m::LABEL_OPERATION => op.as_str()
            )
            .increment(1);
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("broker", &self.broker.kind())
            .field("settings", &self.settings)
            .field("load_balance", &self.load_balance)
            .field("source", &self.source)
            .field("destinations", &self.destinations)
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broker::{MemoryBroker, MemoryStore};

    fn pipeline(store: &MemoryStore) -> Pipeline {
        let settings = ConnectionSettings {
            socket_timeout: Duration::from_millis(30),
            ..ConnectionSettings::default()
        };
        let broker = MemoryBroker::new(store.clone(), settings.socket_timeout);
        Pipeline::new(Box::new(broker), settings, false)
    }

    #[tokio::test]
    async fn state_transitions_through_cycle() {
        let store = MemoryStore::new();
        let mut p = pipeline(&store);
        p.connect().await.unwrap();
        p.set_source(SourceBinding::parse("in").unwrap());
        assert_eq!(p.state(), DeliveryState::Idle);

        store.push("in", Bytes::from_static(b"m"));
        p.receive().await.unwrap();
        assert_eq!(p.state(), DeliveryState::Held);

        p.acknowledge().await.unwrap();
        assert_eq!(p.state(), DeliveryState::Idle);
    }

    #[tokio::test]
    async fn dropped_receive_can_be_abandoned() {
        let store = MemoryStore::new();
        let mut p = pipeline(&store);
        p.connect().await.unwrap();
        p.set_source(SourceBinding::parse("in").unwrap());

        // 소켓 타임아웃(30ms)보다 먼저 future를 버림
        let waited = tokio::time::timeout(Duration::from_millis(5), p.receive()).await;
        assert!(waited.is_err());
        assert_eq!(p.state(), DeliveryState::Receiving);

        p.abandon_receive();
        assert_eq!(p.state(), DeliveryState::Idle);

        // Held 상태는 건드리지 않음
        store.push("in", Bytes::from_static(b"m"));
        p.receive().await.unwrap();
        p.abandon_receive();
        assert_eq!(p.state(), DeliveryState::Held);
    }

    #[tokio::test]
    async fn receive_without_source_is_configuration_error() {
        let store = MemoryStore::new();
        let mut p = pipeline(&store);
        p.connect().await.unwrap();
        let err = p.receive().await.unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        let err = p.acknowledge().await.unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[tokio::test]
    async fn set_destinations_resets_cursor() {
        let store = MemoryStore::new();
        let mut p = pipeline(&store);
        p.connect().await.unwrap();
        p.set_load_balance(true);
        p.set_destinations(DestinationQueues::parse(["a", "b"]).unwrap());
        p.send(Bytes::from_static(b"1")).await.unwrap();

        p.set_destinations(DestinationQueues::parse(["a", "b"]).unwrap());
        p.send(Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(store.len("a"), 2);
        assert_eq!(store.len("b"), 0);
    }

    #[tokio::test]
    async fn bind_bot_uses_topology_override() {
        let topology = feedpipe_core::topology::PipelineTopology::parse(
            r#"
[bots.collector]
destination-queues = ["x", "y"]
load-balance = true
"#,
        )
        .unwrap();
        let resolver = QueueResolver::new(topology);
        let store = MemoryStore::new();
        let mut p = pipeline(&store);
        p.bind_bot(&resolver, "collector").unwrap();
        assert!(p.source().is_none());
        assert_eq!(p.destinations().len(), 2);
        assert!(p.load_balance());
        assert!(p.bind_bot(&resolver, "ghost").is_err());
    }

    #[tokio::test]
    async fn bind_bot_replaces_source_binding() {
        let topology = feedpipe_core::topology::PipelineTopology::parse(
            r#"
[bots.collector]
destination-queues = "parser-queue"

[bots.parser]
source-queue = "parser-queue"
destination-queues = "out"
"#,
        )
        .unwrap();
        let resolver = QueueResolver::new(topology);
        let store = MemoryStore::new();
        let mut p = pipeline(&store);

        p.bind_bot(&resolver, "parser").unwrap();
        assert_eq!(p.source().unwrap().source.as_str(), "parser-queue");

        // 실패한 바인딩은 기존 상태를 건드리지 않음
        assert!(p.bind_bot(&resolver, "ghost").is_err());
        assert_eq!(p.source().unwrap().source.as_str(), "parser-queue");
        assert_eq!(p.destinations().len(), 1);

        p.bind_bot(&resolver, "collector").unwrap();
        assert!(p.source().is_none());
        assert_eq!(p.destinations().get(0).unwrap().as_str(), "parser-queue");
    }

    #[tokio::test]
    async fn session_ids_are_unique() {
        let store = MemoryStore::new();
        assert_ne!(pipeline(&store).session_id(), pipeline(&store).session_id());
    }

    #[tokio::test]
    async fn disconnect_returns_to_idle() {
        let store = MemoryStore::new();
        let mut p = pipeline(&store);
        p.connect().await.unwrap();
        assert!(p.is_connected());
        p.disconnect().await;
        p.disconnect().await;
        assert!(!p.is_connected());
        assert_eq!(p.state(), DeliveryState::Idle);
        assert_eq!(p.broker_kind(), "memory");
    }
}
