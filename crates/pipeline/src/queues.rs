//! 큐 바인딩 -- 토폴로지에서 봇이 읽고 쓸 큐를 결정
//!
//! [`QueueResolver`]는 정적 [`PipelineTopology`]를 감싸며,
//! 봇 ID로 소스/내부 큐([`SourceBinding`])와 목적지 큐 목록을 돌려줍니다.

use std::collections::BTreeSet;

use feedpipe_core::topology::{BotQueues, PipelineTopology};
use feedpipe_core::types::{DestinationQueues, QueueName};

use crate::error::PipelineError;

/// 소스 큐와 그 내부(in-flight) 큐
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBinding {
    /// 입력 큐
    pub source: QueueName,
    /// `{source}-internal`
    pub internal: QueueName,
}

impl SourceBinding {
    /// 소스 큐로부터 바인딩을 만듭니다.
    pub fn new(source: QueueName) -> Self {
        let internal = source.internal();
        Self { source, internal }
    }

    /// 원시 문자열을 검증하여 바인딩을 만듭니다.
    ///
    /// 쉼표나 공백으로 이어진 값은 [`PipelineError::Configuration`]입니다.
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        Ok(Self::new(QueueName::new(raw)?))
    }
}

/// 토폴로지 기반 큐 리졸버
#[derive(Debug, Clone, Default)]
pub struct QueueResolver {
    topology: PipelineTopology,
}

impl QueueResolver {
    /// 토폴로지로 생성합니다.
    pub fn new(topology: PipelineTopology) -> Self {
        Self { topology }
    }

    /// 감싼 토폴로지
    pub fn topology(&self) -> &PipelineTopology {
        &self.topology
    }

    fn bot(&self, bot_id: &str) -> Result<&BotQueues, PipelineError> {
        self.topology.bot(bot_id).ok_or_else(|| {
            PipelineError::Configuration(format!("bot '{bot_id}' is not defined in the pipeline"))
        })
    }

    /// 봇의 소스 큐와 내부 큐를 바인딩합니다.
    ///
    /// 모르는 봇이거나 소스 큐가 없는 봇이면 [`PipelineError::Configuration`]입니다.
    pub fn bind_source(&self, bot_id: &str) -> Result<SourceBinding, PipelineError> {
        let bot = self.bot(bot_id)?;
        let source = bot.source_queue.clone().ok_or_else(|| {
            PipelineError::Configuration(format!("bot '{bot_id}' has no source queue"))
        })?;
        Ok(SourceBinding::new(source))
    }

    /// 큐 이름 목록을 목적지 목록으로 정규화합니다.
    ///
    /// 항목이 하나뿐이면 문자열 값으로 보고 공백 기준으로 나눕니다 (`["a b"]` → `[a, b]`).
    /// 빈 목록은 아무 것도 보내지 않는 싱크입니다.
    pub fn bind_destination<I, S>(queue_names: I) -> Result<DestinationQueues, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = queue_names.into_iter().map(Into::into).collect();
        if names.len() == 1 {
            let joined = names.remove(0);
            return Ok(DestinationQueues::from_joined(&joined)?);
        }
        Ok(DestinationQueues::parse(names)?)
    }

    /// 봇의 목적지 큐 목록 (출력 봇은 빈 목록)
    pub fn bind_destinations_for(&self, bot_id: &str) -> Result<DestinationQueues, PipelineError> {
        Ok(self.bot(bot_id)?.destination_queues.clone())
    }

    /// 봇별 부하 분산 설정. 봇에 값이 없으면 `default`.
    pub fn load_balance_for(&self, bot_id: &str, default: bool) -> bool {
        self.topology
            .bot(bot_id)
            .and_then(|b| b.load_balance)
            .unwrap_or(default)
    }

    /// 모든 소스 큐
    pub fn source_queues(&self) -> BTreeSet<QueueName> {
        self.topology.source_queues()
    }

    /// 모든 목적지 큐
    pub fn destination_queues(&self) -> BTreeSet<QueueName> {
        self.topology.destination_queues()
    }

    /// 모든 내부 큐
    pub fn internal_queues(&self) -> BTreeSet<QueueName> {
        self.topology.internal_queues()
    }

    /// 토폴로지의 모든 큐
    pub fn all_queues(&self, with_internal: bool) -> BTreeSet<QueueName> {
        self.topology.all_queues(with_internal)
    }

    /// 토폴로지에 있는 큐 이름인지 확인합니다 (내부 큐 포함).
    pub fn contains_queue(&self, name: &str) -> bool {
        self.topology.contains_queue(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> QueueResolver {
        let topology = PipelineTopology::parse(
            r#"
[bots.collector]
destination-queues = "parser-queue"

[bots.parser]
source-queue = "parser-queue"
destination-queues = ["expert-queue", "output-queue"]
load-balance = true

[bots.output]
source-queue = "output-queue"
"#,
        )
        .unwrap();
        QueueResolver::new(topology)
    }

    #[test]
    fn bind_source_returns_internal_queue() {
        let binding = resolver().bind_source("parser").unwrap();
        assert_eq!(binding.source.as_str(), "parser-queue");
        assert_eq!(binding.internal.as_str(), "parser-queue-internal");
    }

    #[test]
    fn bind_source_without_source_queue_is_configuration_error() {
        let err = resolver().bind_source("collector").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn bind_source_unknown_bot_is_configuration_error() {
        let err = resolver().bind_source("ghost").unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn source_binding_rejects_joined_value() {
        assert!(SourceBinding::parse("a,b").is_err());
        assert!(SourceBinding::parse("a b").is_err());
        assert_eq!(
            SourceBinding::parse("a").unwrap().internal.as_str(),
            "a-internal"
        );
    }

    #[test]
    fn bind_destination_normalizes_single_and_list() {
        let single = QueueResolver::bind_destination(["only"]).unwrap();
        assert_eq!(single.len(), 1);
        let many = QueueResolver::bind_destination(vec!["a", "b"]).unwrap();
        assert_eq!(many.len(), 2);
        let empty = QueueResolver::bind_destination(Vec::<String>::new()).unwrap();
        assert!(empty.is_empty());
        assert!(QueueResolver::bind_destination(["a,b"]).is_err());
    }

    #[test]
    fn bind_destination_splits_single_joined_string() {
        let split = QueueResolver::bind_destination(["a b"]).unwrap();
        let names: Vec<&str> = split.iter().map(QueueName::as_str).collect();
        assert_eq!(names, vec!["a", "b"]);
        // 목록의 각 항목은 이름 하나
        assert!(QueueResolver::bind_destination(["a b", "c"]).is_err());
    }

    #[test]
    fn topology_joined_destination_string_is_split() {
        let topology = PipelineTopology::parse(
            "[bots.parser]\nsource-queue = \"in\"\ndestination-queues = \"out-a out-b\"\n",
        )
        .unwrap();
        let r = QueueResolver::new(topology);
        let destinations = r.bind_destinations_for("parser").unwrap();
        assert_eq!(destinations.len(), 2);
        assert!(destinations.contains("out-b"));
        // 소스 큐는 여전히 이름 하나만 허용
        assert!(PipelineTopology::parse("[bots.a]\nsource-queue = \"q1 q2\"").is_err());
    }

    #[test]
    fn destinations_for_output_bot_are_empty() {
        let r = resolver();
        assert!(r.bind_destinations_for("output").unwrap().is_empty());
        assert_eq!(r.bind_destinations_for("parser").unwrap().len(), 2);
    }

    #[test]
    fn load_balance_override() {
        let r = resolver();
        assert!(r.load_balance_for("parser", false));
        assert!(!r.load_balance_for("output", false));
        assert!(r.load_balance_for("output", true));
        assert!(!r.load_balance_for("ghost", false));
    }

    #[test]
    fn discovery_delegates_to_topology() {
        let r = resolver();
        assert_eq!(r.source_queues().len(), 2);
        assert_eq!(r.destination_queues().len(), 3);
        assert_eq!(r.internal_queues().len(), 2);
        assert_eq!(r.all_queues(true).len(), 5);
        assert!(r.contains_queue("output-queue-internal"));
        assert!(!r.contains_queue("unknown"));
    }
}
