//! 파이프라인 토폴로지 — 봇별 소스/목적지 큐 정의 (`pipeline.toml`)
//!
//! # 파일 형식
//! ```toml
//! [bots.cymru-expert]
//! source-queue = "cymru-expert-queue"
//! destination-queues = ["dedup-queue", "file-output-queue"]
//! load-balance = false   # 선택, 전역 설정을 덮어씀
//!
//! [bots.file-output]
//! source-queue = "file-output-queue"
//! ```
//!
//! 소스 큐가 있는 봇은 정확히 하나의 내부 큐(`{source}-internal`)를 가집니다.
//! 목적지 큐는 0개 이상이며, 다른 봇의 소스 큐와 같은 이름으로 단계를 연결합니다.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FeedpipeError, TopologyError};
use crate::types::{DestinationQueues, QueueName};

/// 봇 하나의 큐 구성
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BotQueues {
    /// 입력 큐 (수집기는 없음)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_queue: Option<QueueName>,
    /// 출력 큐 목록 (출력 봇은 비어 있음)
    #[serde(default, skip_serializing_if = "DestinationQueues::is_empty")]
    pub destination_queues: DestinationQueues,
    /// 봇별 부하 분산 설정 (없으면 전역 `load_balance` 사용)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balance: Option<bool>,
}

impl BotQueues {
    /// 소스/목적지로 생성합니다.
    pub fn new(source_queue: Option<QueueName>, destination_queues: DestinationQueues) -> Self {
        Self {
            source_queue,
            destination_queues,
            load_balance: None,
        }
    }

    /// 내부 큐 이름 (소스 큐가 있을 때만)
    pub fn internal_queue(&self) -> Option<QueueName> {
        self.source_queue.as_ref().map(QueueName::internal)
    }
}

/// 정적 파이프라인 토폴로지
///
/// 봇 ID는 영문자, 숫자, `-`만 허용합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTopology {
    /// 봇 ID → 큐 구성
    #[serde(default)]
    pub bots: BTreeMap<String, BotQueues>,
}

impl PipelineTopology {
    /// 파일에서 토폴로지를 로드하고 검증합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FeedpipeError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FeedpipeError::Topology(TopologyError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                FeedpipeError::Io(e)
            }
        })?;
        let topology = Self::parse(&content)?;
        tracing::debug!(
            path = %path.display(),
            bots = topology.bots.len(),
            "loaded pipeline topology"
        );
        Ok(topology)
    }

    /// TOML 문자열에서 토폴로지를 파싱하고 검증합니다.
    pub fn parse(toml_str: &str) -> Result<Self, FeedpipeError> {
        let topology: Self = toml::from_str(toml_str).map_err(|e| {
            FeedpipeError::Topology(TopologyError::ParseFailed {
                reason: e.to_string(),
            })
        })?;
        topology.validate()?;
        Ok(topology)
    }

    /// 봇 ID 규칙을 검증합니다.
    pub fn validate(&self) -> Result<(), TopologyError> {
        for bot_id in self.bots.keys() {
            validate_bot_id(bot_id)?;
        }
        Ok(())
    }

    /// 봇을 추가하거나 교체합니다.
    pub fn insert(
        &mut self,
        bot_id: impl Into<String>,
        queues: BotQueues,
    ) -> Result<(), TopologyError> {
        let bot_id = bot_id.into();
        validate_bot_id(&bot_id)?;
        self.bots.insert(bot_id, queues);
        Ok(())
    }

    /// 봇 구성을 조회합니다.
    pub fn bot(&self, bot_id: &str) -> Option<&BotQueues> {
        self.bots.get(bot_id)
    }

    /// 등록된 봇 ID (정렬됨)
    pub fn bot_ids(&self) -> impl Iterator<Item = &str> {
        self.bots.keys().map(String::as_str)
    }

    /// 모든 소스 큐
    pub fn source_queues(&self) -> BTreeSet<QueueName> {
        self.bots
            .values()
            .filter_map(|b| b.source_queue.clone())
            .collect()
    }

    /// 모든 목적지 큐
    pub fn destination_queues(&self) -> BTreeSet<QueueName> {
        self.bots
            .values()
            .flat_map(|b| b.destination_queues.iter().cloned())
            .collect()
    }

    /// 모든 내부 큐
    pub fn internal_queues(&self) -> BTreeSet<QueueName> {
        self.bots
            .values()
            .filter_map(BotQueues::internal_queue)
            .collect()
    }

    /// 토폴로지에 등장하는 모든 큐
    pub fn all_queues(&self, with_internal: bool) -> BTreeSet<QueueName> {
        let mut all = self.source_queues();
        all.extend(self.destination_queues());
        if with_internal {
            all.extend(self.internal_queues());
        }
        all
    }

    /// 이름이 토폴로지(내부 큐 포함)에 있는지 확인합니다.
    pub fn contains_queue(&self, name: &str) -> bool {
        self.bots.values().any(|b| {
            b.destination_queues.contains(name)
                || b.source_queue.as_ref().is_some_and(|s| {
                    s.as_str() == name || b.internal_queue().is_some_and(|i| i.as_str() == name)
                })
        })
    }
}

fn validate_bot_id(bot_id: &str) -> Result<(), TopologyError> {
    if bot_id.is_empty() {
        return Err(TopologyError::InvalidBotId {
            bot_id: bot_id.to_owned(),
            reason: "must not be empty".to_owned(),
        });
    }
    if !bot_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(TopologyError::InvalidBotId {
            bot_id: bot_id.to_owned(),
            reason: "only ASCII letters, digits and '-' are allowed".to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[bots.feed-collector]
destination-queues = "parser-queue"

[bots.feed-parser]
source-queue = "parser-queue"
destination-queues = ["expert-queue", "archive-queue"]

[bots.expert]
source-queue = "expert-queue"
destination-queues = ["output-a", "output-b"]
load-balance = true

[bots.file-output]
source-queue = "archive-queue"
"#;

    fn names(set: &BTreeSet<QueueName>) -> Vec<&str> {
        set.iter().map(QueueName::as_str).collect()
    }

    #[test]
    fn parse_sample_topology() {
        let t = PipelineTopology::parse(SAMPLE).unwrap();
        assert_eq!(t.bots.len(), 4);

        let collector = t.bot("feed-collector").unwrap();
        assert!(collector.source_queue.is_none());
        assert_eq!(collector.destination_queues.len(), 1);

        let expert = t.bot("expert").unwrap();
        assert_eq!(expert.load_balance, Some(true));

        let output = t.bot("file-output").unwrap();
        assert!(output.destination_queues.is_empty());
    }

    #[test]
    fn queue_discovery() {
        let t = PipelineTopology::parse(SAMPLE).unwrap();
        assert_eq!(
            names(&t.source_queues()),
            vec!["archive-queue", "expert-queue", "parser-queue"]
        );
        assert_eq!(
            names(&t.internal_queues()),
            vec![
                "archive-queue-internal",
                "expert-queue-internal",
                "parser-queue-internal"
            ]
        );
        assert_eq!(t.all_queues(false).len(), 5);
        assert_eq!(t.all_queues(true).len(), 8);
    }

    #[test]
    fn contains_queue_includes_internal() {
        let t = PipelineTopology::parse(SAMPLE).unwrap();
        assert!(t.contains_queue("parser-queue"));
        assert!(t.contains_queue("parser-queue-internal"));
        assert!(t.contains_queue("output-b"));
        // 목적지 큐만 있는 경우 내부 큐는 없음
        assert!(!t.contains_queue("output-b-internal"));
        assert!(!t.contains_queue("parser-queeu"));
    }

    #[test]
    fn invalid_bot_id_rejected() {
        let err = PipelineTopology::parse("[bots.\"bad_id\"]\nsource-queue = \"q\"").unwrap_err();
        assert!(matches!(
            err,
            FeedpipeError::Topology(TopologyError::InvalidBotId { .. })
        ));
    }

    #[test]
    fn joined_source_queue_rejected() {
        let err = PipelineTopology::parse("[bots.a]\nsource-queue = \"q1,q2\"").unwrap_err();
        assert!(matches!(
            err,
            FeedpipeError::Topology(TopologyError::ParseFailed { .. })
        ));
    }

    #[test]
    fn unknown_field_rejected() {
        let result = PipelineTopology::parse("[bots.a]\nsource = \"q\"");
        assert!(result.is_err());
    }

    #[test]
    fn empty_topology_is_valid() {
        let t = PipelineTopology::parse("").unwrap();
        assert!(t.bots.is_empty());
        assert!(t.all_queues(true).is_empty());
    }

    #[test]
    fn insert_validates_bot_id() {
        let mut t = PipelineTopology::default();
        assert!(t.insert("ok-bot", BotQueues::default()).is_ok());
        assert!(t.insert("not ok", BotQueues::default()).is_err());
        assert_eq!(t.bot_ids().collect::<Vec<_>>(), vec!["ok-bot"]);
    }

    #[tokio::test]
    async fn load_missing_file() {
        let err = PipelineTopology::load("/nonexistent/pipeline.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FeedpipeError::Topology(TopologyError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        tokio::fs::write(&path, SAMPLE).await.unwrap();
        let t = PipelineTopology::load(&path).await.unwrap();
        assert_eq!(t.bots.len(), 4);
    }
}
