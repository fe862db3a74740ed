//! 파이프라인 팩토리 -- 설정의 `broker` 값으로 백엔드 선택
//!
//! [`BrokerRegistry`]는 소문자 브로커 이름 → 생성 함수 맵입니다.
//! [`PipelineFactory`]는 레지스트리와 [`PipelineConfig`]의 역할별 연결 설정으로
//! [`Pipeline`]을 만듭니다.
//!
//! # 사용 예시
//! ```ignore
//! let factory = PipelineFactory::default();
//! let mut source = factory.connect(&config.pipeline, PipelineRole::Source).await?;
//! source.set_source(resolver.bind_source("my-bot")?);
//! ```

use std::collections::BTreeMap;

use feedpipe_core::config::{ConnectionSettings, PipelineConfig, PipelineRole};
use tracing::debug;

use crate::broker::{DynBroker, MemoryBroker, MemoryStore, RedisBroker};
use crate::error::PipelineError;
use crate::pipeline::Pipeline;

/// 브로커 생성 함수
pub type BrokerConstructor = Box<dyn Fn(&ConnectionSettings) -> Box<dyn DynBroker> + Send + Sync>;

/// 브로커 레지스트리
///
/// 이름은 대소문자를 구분하지 않습니다.
pub struct BrokerRegistry {
    constructors: BTreeMap<String, BrokerConstructor>,
}

impl BrokerRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// `redis`와 새 저장소 위의 `memory`를 등록한 레지스트리
    pub fn with_defaults() -> Self {
        Self::with_memory_store(MemoryStore::new())
    }

    /// `redis`와 주어진 저장소 위의 `memory`를 등록한 레지스트리
    ///
    /// 같은 저장소를 넘긴 팩토리들은 같은 큐를 봅니다.
    pub fn with_memory_store(store: MemoryStore) -> Self {
        let mut registry = Self::new();
        registry.insert(
            "redis",
            Box::new(|settings: &ConnectionSettings| -> Box<dyn DynBroker> {
                Box::new(RedisBroker::new(settings.clone()))
            }),
        );
        registry.insert(
            "memory",
            Box::new(move |settings: &ConnectionSettings| -> Box<dyn DynBroker> {
                Box::new(MemoryBroker::new(store.clone(), settings.socket_timeout))
            }),
        );
        registry
    }

    fn insert(&mut self, name: &str, constructor: BrokerConstructor) {
        self.constructors.insert(name.to_lowercase(), constructor);
    }

    /// 브로커를 등록합니다.
    ///
    /// 같은 이름이 이미 있으면 [`PipelineError::Configuration`]을 반환합니다.
    pub fn register(
        &mut self,
        name: &str,
        constructor: BrokerConstructor,
    ) -> Result<(), PipelineError> {
        let key = name.to_lowercase();
        if self.constructors.contains_key(&key) {
            return Err(PipelineError::Configuration(format!(
                "broker '{key}' is already registered"
            )));
        }
        self.constructors.insert(key, constructor);
        Ok(())
    }

    /// 등록 여부
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.to_lowercase())
    }

    /// 등록된 브로커 이름 (정렬됨)
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// 이름으로 브로커를 만듭니다. 모르는 이름은 [`PipelineError::Configuration`].
    pub fn build(
        &self,
        name: &str,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn DynBroker>, PipelineError> {
        let key = name.to_lowercase();
        let constructor = self.constructors.get(&key).ok_or_else(|| {
            PipelineError::Configuration(format!(
                "unknown broker '{name}' (available: {})",
                self.names().join(", ")
            ))
        })?;
        Ok(constructor(settings))
    }
}

impl Default for BrokerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for BrokerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerRegistry")
            .field("brokers", &self.names())
            .finish()
    }
}

/// 파이프라인 팩토리
#[derive(Debug, Default)]
pub struct PipelineFactory {
    registry: BrokerRegistry,
}

impl PipelineFactory {
    /// 레지스트리로 생성합니다.
    pub fn new(registry: BrokerRegistry) -> Self {
        Self { registry }
    }

    /// 레지스트리
    pub fn registry(&self) -> &BrokerRegistry {
        &self.registry
    }

    /// 레지스트리 (가변)
    pub fn registry_mut(&mut self) -> &mut BrokerRegistry {
        &mut self.registry
    }

    /// 역할별 연결 설정으로 연결되지 않은 파이프라인을 만듭니다.
    pub fn create(
        &self,
        config: &PipelineConfig,
        role: PipelineRole,
    ) -> Result<Pipeline, PipelineError> {
        config
            .validate()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        let settings = config.connection(role);
        let broker = self.registry.build(&config.broker, &settings)?;
        debug!(
            broker = broker.kind(),
            role = %role,
            host = %settings.host,
            port = settings.port,
            "pipeline created"
        );
        Ok(Pipeline::new(broker, settings, config.load_balance))
    }

    /// 파이프라인을 만들고 연결합니다.
    pub async fn connect(
        &self,
        config: &PipelineConfig,
        role: PipelineRole,
    ) -> Result<Pipeline, PipelineError> {
        let mut pipeline = self.create(config, role)?;
        pipeline.connect().await?;
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> PipelineConfig {
        PipelineConfig {
            broker: "memory".to_owned(),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn default_registry_has_redis_and_memory() {
        let registry = BrokerRegistry::default();
        assert_eq!(registry.names(), vec!["memory", "redis"]);
        assert!(registry.contains("Redis"));
        assert!(registry.contains("MEMORY"));
        assert!(!registry.contains("amqp"));
    }

    #[test]
    fn unknown_broker_is_configuration_error() {
        let factory = PipelineFactory::default();
        let config = PipelineConfig {
            broker: "amqp".to_owned(),
            ..PipelineConfig::default()
        };
        let err = factory.create(&config, PipelineRole::Source).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("amqp"));
    }

    #[test]
    fn broker_lookup_is_case_insensitive() {
        let factory = PipelineFactory::default();
        let config = PipelineConfig {
            broker: "ReDiS".to_owned(),
            ..PipelineConfig::default()
        };
        let pipeline = factory.create(&config, PipelineRole::Source).unwrap();
        assert_eq!(pipeline.broker_kind(), "redis");
        assert!(!pipeline.is_connected());
    }

    #[test]
    fn create_uses_role_settings() {
        let factory = PipelineFactory::default();
        let mut config = memory_config();
        config.destination_pipeline_db = 9;
        config.load_balance = true;
        let pipeline = factory.create(&config, PipelineRole::Destination).unwrap();
        assert_eq!(pipeline.settings().db, 9);
        assert!(pipeline.load_balance());
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut registry = BrokerRegistry::new();
        let ctor = || -> BrokerConstructor {
            Box::new(|s: &ConnectionSettings| -> Box<dyn DynBroker> {
                Box::new(MemoryBroker::new(MemoryStore::new(), s.socket_timeout))
            })
        };
        registry.register("Custom", ctor()).unwrap();
        assert!(registry.contains("custom"));
        assert!(registry.register("CUSTOM", ctor()).is_err());
    }

    #[test]
    fn invalid_config_is_rejected_before_building() {
        let factory = PipelineFactory::default();
        let mut config = memory_config();
        config.source_pipeline_port = 0;
        let err = factory.create(&config, PipelineRole::Source).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[tokio::test]
    async fn shared_store_connects_factories() {
        let store = MemoryStore::new();
        let a = PipelineFactory::new(BrokerRegistry::with_memory_store(store.clone()));
        let b = PipelineFactory::new(BrokerRegistry::with_memory_store(store.clone()));
        let config = memory_config();

        let mut writer = a.connect(&config, PipelineRole::Destination).await.unwrap();
        writer.set_destinations(feedpipe_core::types::DestinationQueues::parse(["shared"]).unwrap());
        writer.send(bytes::Bytes::from_static(b"hello")).await.unwrap();

        let mut reader = b.connect(&config, PipelineRole::Source).await.unwrap();
        let counts = reader
            .count_queued_messages([&feedpipe_core::types::QueueName::new("shared").unwrap()])
            .await
            .unwrap();
        assert_eq!(counts.values().sum::<u64>(), 1);
    }

    #[tokio::test]
    async fn connect_to_unreachable_memory_store_fails() {
        let store = MemoryStore::new();
        store.set_unreachable(true);
        let factory = PipelineFactory::new(BrokerRegistry::with_memory_store(store));
        let err = factory
            .connect(&memory_config(), PipelineRole::Source)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Connection { .. }));
    }
}
