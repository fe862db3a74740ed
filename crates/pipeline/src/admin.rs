//! 관리 기능 -- 큐 길이 조회, 큐 비우기, 고아 큐 탐지, 메시지 확인/주입
//!
//! [`QueueAdmin`]은 처리 루프에 참여하지 않는 관리용 연결입니다.
//! 실행 중인 봇과 동시에 사용해도 안전하며, 길이는 근사값일 수 있습니다.
//! 관리 연결은 `acknowledge`를 호출하지 않습니다.

use std::collections::BTreeMap;

use bytes::Bytes;
use feedpipe_core::metrics as m;
use feedpipe_core::types::QueueName;
use metrics::{counter, gauge};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::queues::QueueResolver;

/// 큐 하나의 길이
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueCount {
    /// 큐 이름
    pub queue: QueueName,
    /// 대기 중인 메시지 수
    pub count: u64,
}

/// 봇 하나의 큐 현황
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotQueueReport {
    /// 봇 ID
    pub bot_id: String,
    /// 소스 큐
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<QueueCount>,
    /// 내부 큐
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal: Option<QueueCount>,
    /// 목적지 큐
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<QueueCount>,
}

impl BotQueueReport {
    fn is_empty(&self) -> bool {
        self.source.is_none() && self.internal.is_none() && self.destinations.is_empty()
    }
}

/// 전체 큐 현황
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueReport {
    /// 봇별 현황 (봇 ID 순)
    pub bots: Vec<BotQueueReport>,
    /// 토폴로지의 모든 큐(내부 큐 포함)에 있는 메시지 합계
    pub total: u64,
}

/// 토폴로지에 없는데 메시지가 남아 있는 큐
///
/// 봇 구성을 바꾼 뒤 정리하지 않은 큐가 보통 여기에 해당합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedQueue {
    /// 브로커의 큐 이름 (검증되지 않은 원래 이름)
    pub queue: String,
    /// 대기 중인 메시지 수
    pub count: u64,
}

/// 관리용 큐 클라이언트
#[derive(Debug)]
pub struct QueueAdmin {
    pipeline: Pipeline,
    resolver: QueueResolver,
}

impl QueueAdmin {
    /// 연결된 파이프라인과 리졸버로 생성합니다.
    pub fn new(pipeline: Pipeline, resolver: QueueResolver) -> Self {
        Self { pipeline, resolver }
    }

    /// 리졸버
    pub fn resolver(&self) -> &QueueResolver {
        &self.resolver
    }

    /// 내부 파이프라인
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// 각 큐의 길이를 셉니다. 없는 큐는 0입니다.
    pub async fn count_queued_messages<'q, I>(
        &mut self,
        queues: I,
    ) -> Result<BTreeMap<QueueName, u64>, PipelineError>
    where
        I: IntoIterator<Item = &'q QueueName>,
    {
        let counts = self.pipeline.count_queued_messages(queues).await?;
        for (queue, count) in &counts {
            gauge!(m::ADMIN_QUEUE_DEPTH, m::LABEL_QUEUE => queue.to_string()).set(*count as f64);
        }
        Ok(counts)
    }

    /// 토폴로지 전체의 큐 현황을 봇별로 조회합니다.
    ///
    /// `non_zero`이면 비어 있는 큐와, 그 결과 아무 큐도 남지 않은 봇을 뺍니다.
    pub async fn list_queues(&mut self, non_zero: bool) -> Result<QueueReport, PipelineError> {
        let all = self.resolver.all_queues(true);
        let counts = self.count_queued_messages(&all).await?;
        let lookup = |queue: &QueueName| -> Option<QueueCount> {
            let count = counts.get(queue).copied().unwrap_or(0);
            (!non_zero || count > 0).then(|| QueueCount {
                queue: queue.clone(),
                count,
            })
        };

        let mut bots = Vec::new();
        for (bot_id, queues) in &self.resolver.topology().bots {
            let report = BotQueueReport {
                bot_id: bot_id.clone(),
                source: queues.source_queue.as_ref().and_then(lookup),
                internal: queues.internal_queue().as_ref().and_then(lookup),
                destinations: queues.destination_queues.iter().filter_map(lookup).collect(),
            };
            if !(non_zero && report.is_empty()) {
                bots.push(report);
            }
        }

        Ok(QueueReport {
            bots,
            total: counts.values().sum(),
        })
    }

    /// 큐를 비우고 비우기 전 메시지 수를 돌려줍니다.
    ///
    /// 토폴로지(소스, 내부, 목적지 큐)에 없는 이름은 아무 것도 하지 않고
    /// [`PipelineError::NotFound`]를 반환합니다.
    pub async fn clear_queue(&mut self, name: &str) -> Result<u64, PipelineError> {
        if !self.resolver.contains_queue(name) {
            return Err(PipelineError::NotFound(name.to_owned()));
        }
        let queue = QueueName::new(name)?;
        let discarded = self
            .pipeline
            .count_queued_messages([&queue])
            .await?
            .get(&queue)
            .copied()
            .unwrap_or(0);
        self.pipeline.delete_queue(&queue).await?;

        counter!(m::ADMIN_QUEUES_CLEARED_TOTAL, m::LABEL_QUEUE => queue.to_string()).increment(1);
        info!(queue = %queue, discarded, "queue cleared");
        Ok(discarded)
    }

    /// 브로커 전체에서 비어 있지 않은 큐를 찾습니다 (토폴로지와 무관).
    pub async fn nonempty_queues(&mut self) -> Result<BTreeMap<String, u64>, PipelineError> {
        self.pipeline.nonempty_queues().await
    }

    /// 토폴로지(내부 큐 포함)에 없는데 메시지가 남아 있는 큐를 찾습니다.
    ///
    /// `ignore`에 있는 이름은 결과에서 뺍니다.
    pub async fn orphaned_queues(
        &mut self,
        ignore: &[String],
    ) -> Result<Vec<OrphanedQueue>, PipelineError> {
        let known = self.resolver.all_queues(true);
        let orphaned: Vec<OrphanedQueue> = self
            .nonempty_queues()
            .await?
            .into_iter()
            .filter(|(queue, _)| {
                !known.contains(queue.as_str()) && !ignore.iter().any(|i| i == queue)
            })
            .map(|(queue, count)| OrphanedQueue { queue, count })
            .collect();

        if !orphaned.is_empty() {
            warn!(
                count = orphaned.len(),
                "orphaned queues found, possibly left over from an earlier pipeline layout"
            );
        }
        Ok(orphaned)
    }

    /// 봇의 소스 큐에서 다음에 받을 메시지를 꺼내지 않고 조회합니다.
    pub async fn peek(&mut self, bot_id: &str) -> Result<Option<Bytes>, PipelineError> {
        let binding = self.resolver.bind_source(bot_id)?;
        self.pipeline.peek_queue(&binding.source).await
    }

    /// 봇의 소스 큐에서 다음 메시지를 꺼냅니다.
    pub async fn pop(&mut self, bot_id: &str) -> Result<Option<Bytes>, PipelineError> {
        let binding = self.resolver.bind_source(bot_id)?;
        let message = self.pipeline.pop_queue(&binding.source).await?;
        if message.is_some() {
            info!(bot = bot_id, queue = %binding.source, "message popped from source queue");
        }
        Ok(message)
    }

    /// 봇의 목적지 큐로 메시지를 보냅니다 (봇의 부하 분산 설정을 따름).
    ///
    /// 부하 분산 봇이면 같은 `QueueAdmin`으로 보낸 메시지가 목적지를 차례로 돌아갑니다.
    /// 새 `QueueAdmin`은 첫 번째 목적지부터 시작합니다.
    pub async fn inject(&mut self, bot_id: &str, message: Bytes) -> Result<(), PipelineError> {
        let destinations = self.resolver.bind_destinations_for(bot_id)?;
        let load_balance = self
            .resolver
            .load_balance_for(bot_id, self.pipeline.load_balance());
        let previous = self.pipeline.load_balance();

        // 같은 목적지로 연달아 보내면 부하 분산 커서를 이어서 씀
        if self.pipeline.destinations() != &destinations {
            self.pipeline.set_destinations(destinations);
        }
        self.pipeline.set_load_balance(load_balance);
        let result = self.pipeline.send(message).await;
        self.pipeline.set_load_balance(previous);

        if result.is_ok() {
            info!(bot = bot_id, "message injected into destination queues");
        }
        result
    }

    /// 연결을 해제합니다.
    pub async fn close(mut self) {
        self.pipeline.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use feedpipe_core::config::ConnectionSettings;
    use feedpipe_core::topology::PipelineTopology;

    use super::*;
    use crate::broker::{MemoryBroker, MemoryStore};

    const TOPOLOGY: &str = r#"
[bots.collector]
destination-queues = "parser-queue"

[bots.parser]
source-queue = "parser-queue"
destination-queues = ["out-a", "out-b"]

[bots.out-a]
source-queue = "out-a"

[bots.out-b]
source-queue = "out-b"
"#;

    async fn admin(store: &MemoryStore) -> QueueAdmin {
        admin_with(store, TOPOLOGY).await
    }

    async fn admin_with(store: &MemoryStore, topology: &str) -> QueueAdmin {
        let settings = ConnectionSettings {
            socket_timeout: Duration::from_millis(30),
            ..ConnectionSettings::default()
        };
        let broker = MemoryBroker::new(store.clone(), settings.socket_timeout);
        let mut pipeline = Pipeline::new(Box::new(broker), settings, false);
        pipeline.connect().await.unwrap();
        let resolver = QueueResolver::new(PipelineTopology::parse(topology).unwrap());
        QueueAdmin::new(pipeline, resolver)
    }

    #[tokio::test]
    async fn list_queues_reports_per_bot() {
        let store = MemoryStore::new();
        store.push("parser-queue", Bytes::from_static(b"1"));
        store.push("parser-queue", Bytes::from_static(b"2"));
        store.push("out-b-internal", Bytes::from_static(b"3"));
        let mut admin = admin(&store).await;

        let report = admin.list_queues(false).await.unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.bots.len(), 4);

        let parser = report.bots.iter().find(|b| b.bot_id == "parser").unwrap();
        assert_eq!(parser.source.as_ref().unwrap().count, 2);
        assert_eq!(parser.internal.as_ref().unwrap().count, 0);
        assert_eq!(parser.destinations.len(), 2);

        let collector = report.bots.iter().find(|b| b.bot_id == "collector").unwrap();
        assert!(collector.source.is_none());
        assert_eq!(collector.destinations[0].count, 2);
    }

    #[tokio::test]
    async fn list_queues_non_zero_filters_empty() {
        let store = MemoryStore::new();
        store.push("out-b-internal", Bytes::from_static(b"stuck"));
        let mut admin = admin(&store).await;

        let report = admin.list_queues(true).await.unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.bots.len(), 1);
        let out_b = &report.bots[0];
        assert_eq!(out_b.bot_id, "out-b");
        assert!(out_b.source.is_none());
        assert_eq!(out_b.internal.as_ref().unwrap().count, 1);
    }

    #[tokio::test]
    async fn clear_queue_returns_discarded_count() {
        let store = MemoryStore::new();
        store.push("out-a", Bytes::from_static(b"x"));
        store.push("out-a", Bytes::from_static(b"y"));
        let mut admin = admin(&store).await;

        assert_eq!(admin.clear_queue("out-a").await.unwrap(), 2);
        assert_eq!(store.len("out-a"), 0);
        // 이미 빈 큐도 성공
        assert_eq!(admin.clear_queue("out-a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_unknown_queue_is_not_found() {
        let store = MemoryStore::new();
        store.push("stray", Bytes::from_static(b"keep"));
        let mut admin = admin(&store).await;

        let err = admin.clear_queue("stray").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
        assert_eq!(store.len("stray"), 1);
    }

    #[tokio::test]
    async fn orphaned_queues_exclude_topology_and_ignored() {
        let store = MemoryStore::new();
        store.push("parser-queue", Bytes::from_static(b"known"));
        store.push("out-a-internal", Bytes::from_static(b"known-internal"));
        store.push("old-expert-queue", Bytes::from_static(b"1"));
        store.push("old-expert-queue", Bytes::from_static(b"2"));
        store.push("scratch", Bytes::from_static(b"3"));
        let mut admin = admin(&store).await;

        let all = admin.nonempty_queues().await.unwrap();
        assert_eq!(all.len(), 4);

        let orphaned = admin.orphaned_queues(&[]).await.unwrap();
        assert_eq!(orphaned, vec![
            OrphanedQueue {
                queue: "old-expert-queue".to_owned(),
                count: 2,
            },
            OrphanedQueue {
                queue: "scratch".to_owned(),
                count: 1,
            },
        ]);

        let orphaned = admin.orphaned_queues(&["scratch".to_owned()]).await.unwrap();
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].queue, "old-expert-queue");
    }

    #[tokio::test]
    async fn orphaned_queues_empty_when_broker_matches_topology() {
        let store = MemoryStore::new();
        store.push("out-b", Bytes::from_static(b"x"));
        let mut admin = admin(&store).await;
        assert!(admin.orphaned_queues(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn peek_and_pop_source_queue() {
        let store = MemoryStore::new();
        store.push("parser-queue", Bytes::from_static(b"older"));
        store.push("parser-queue", Bytes::from_static(b"newer"));
        let mut admin = admin(&store).await;

        assert_eq!(
            admin.peek("parser").await.unwrap(),
            Some(Bytes::from_static(b"older"))
        );
        assert_eq!(store.len("parser-queue"), 2);
        assert_eq!(
            admin.pop("parser").await.unwrap(),
            Some(Bytes::from_static(b"older"))
        );
        assert_eq!(store.len("parser-queue"), 1);

        // 소스 큐가 없는 봇
        assert!(admin.peek("collector").await.is_err());
    }

    #[tokio::test]
    async fn inject_broadcasts_to_bot_destinations() {
        let store = MemoryStore::new();
        let mut admin = admin(&store).await;
        admin
            .inject("parser", Bytes::from_static(b"{\"test\":1}"))
            .await
            .unwrap();
        assert_eq!(store.len("out-a"), 1);
        assert_eq!(store.len("out-b"), 1);
        assert_eq!(store.len("parser-queue"), 0);
    }

    #[tokio::test]
    async fn repeated_inject_rotates_load_balanced_destinations() {
        let store = MemoryStore::new();
        let mut admin = admin_with(
            &store,
            r#"
[bots.splitter]
destination-queues = ["left", "right"]
load-balance = true
"#,
        )
        .await;

        admin.inject("splitter", Bytes::from_static(b"1")).await.unwrap();
        admin.inject("splitter", Bytes::from_static(b"2")).await.unwrap();
        admin.inject("splitter", Bytes::from_static(b"3")).await.unwrap();
        assert_eq!(
            store.snapshot("left"),
            vec![Bytes::from_static(b"3"), Bytes::from_static(b"1")]
        );
        assert_eq!(store.snapshot("right"), vec![Bytes::from_static(b"2")]);
    }
}
