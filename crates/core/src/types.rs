//! 큐 이름 타입 — 파이프라인 전반에서 쓰이는 검증된 이름
//!
//! 큐 이름은 외부 도구(큐 카운터, 복구 도구)가 그대로 파싱하므로
//! 공백이나 쉼표가 섞인 값은 경계에서 거부합니다.
//! 목적지 큐는 설정에서 문자열 하나 또는 목록으로 쓸 수 있으며,
//! 역직렬화 시점에 항상 [`DestinationQueues`] 목록으로 정규화됩니다.
//! 문자열 하나는 공백 기준으로 나눠 여러 큐로 해석합니다 (`"a b"` → `[a, b]`).

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

/// 내부(in-flight) 큐 접미어
pub const INTERNAL_QUEUE_SUFFIX: &str = "-internal";

/// 검증된 큐 이름
///
/// 비어 있지 않고, 공백과 쉼표를 포함하지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// 이름을 검증하여 생성합니다.
    pub fn new(name: impl Into<String>) -> Result<Self, TopologyError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TopologyError::InvalidQueueName {
                name,
                reason: "must not be empty".to_owned(),
            });
        }
        if name.chars().any(char::is_whitespace) {
            return Err(TopologyError::InvalidQueueName {
                name,
                reason: "must not contain whitespace (one queue per name)".to_owned(),
            });
        }
        if name.contains(',') {
            return Err(TopologyError::InvalidQueueName {
                name,
                reason: "must not contain ',' (one queue per name)".to_owned(),
            });
        }
        Ok(Self(name))
    }

    /// 문자열 슬라이스를 반환합니다.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 이 큐를 소스로 쓰는 봇의 내부 큐 이름 (`{name}-internal`)
    pub fn internal(&self) -> QueueName {
        Self(format!("{}{INTERNAL_QUEUE_SUFFIX}", self.0))
    }

    /// 내부 큐 명명 규칙을 따르는 이름인지 확인합니다.
    pub fn is_internal(&self) -> bool {
        self.0.len() > INTERNAL_QUEUE_SUFFIX.len() && self.0.ends_with(INTERNAL_QUEUE_SUFFIX)
    }
}

impl TryFrom<String> for QueueName {
    type Error = TopologyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for QueueName {
    type Error = TopologyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueName> for String {
    fn from(value: QueueName) -> Self {
        value.0
    }
}

impl AsRef<str> for QueueName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for QueueName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 목적지 큐 목록
///
/// 순서를 보존하며 중복은 첫 번째 항목만 남깁니다.
/// 빈 목록은 "싱크" 봇을 의미하며 전송은 아무 일도 하지 않습니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DestinationSpec", into = "Vec<QueueName>")]
pub struct DestinationQueues(Vec<QueueName>);

/// 설정 파일에서 허용하는 목적지 표기
#[derive(Deserialize)]
#[serde(untagged)]
enum DestinationSpec {
    Joined(String),
    Many(Vec<QueueName>),
}

impl TryFrom<DestinationSpec> for DestinationQueues {
    type Error = TopologyError;

    fn try_from(spec: DestinationSpec) -> Result<Self, Self::Error> {
        match spec {
            DestinationSpec::Joined(raw) => Self::from_joined(&raw),
            DestinationSpec::Many(names) => Ok(Self::new(names)),
        }
    }
}

impl From<DestinationQueues> for Vec<QueueName> {
    fn from(value: DestinationQueues) -> Self {
        value.0
    }
}

impl DestinationQueues {
    /// 목록에서 생성합니다 (중복 제거, 순서 보존).
    pub fn new(names: Vec<QueueName>) -> Self {
        let mut unique: Vec<QueueName> = Vec::with_capacity(names.len());
        for name in names {
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        Self(unique)
    }

    /// 빈 목록 (싱크)
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// 단일 큐
    pub fn single(name: QueueName) -> Self {
        Self(vec![name])
    }

    /// 공백으로 이어진 문자열 하나를 큐 목록으로 나눕니다.
    ///
    /// 빈 문자열은 빈 목록입니다. 쉼표는 여전히 거부됩니다.
    pub fn from_joined(raw: &str) -> Result<Self, TopologyError> {
        Self::parse(raw.split_whitespace())
    }

    /// 문자열 목록을 검증하여 생성합니다. 각 항목은 큐 이름 하나입니다.
    pub fn parse<I, S>(names: I) -> Result<Self, TopologyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names
            .into_iter()
            .map(QueueName::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(names))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&QueueName> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QueueName> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[QueueName] {
        &self.0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|q| q.as_str() == name)
    }
}

impl<'a> IntoIterator for &'a DestinationQueues {
    type Item = &'a QueueName;
    type IntoIter = std::slice::Iter<'a, QueueName>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
