//! 파이프라인 에러 타입
//!
//! [`PipelineError`]는 브로커 연결, 큐 바인딩, 전달 엔진, 관리 기능에서 발생하는
//! 모든 에러를 표현합니다. 브로커 라이브러리의 에러는 백엔드 경계에서 이 타입으로
//! 변환되며, `From<PipelineError> for FeedpipeError` 변환으로 상위 레이어에 전파됩니다.

use std::time::Duration;

use feedpipe_core::error::{FeedpipeError, TopologyError};

use crate::broker::BrokerOp;

/// 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 토폴로지 또는 연결 설정이 잘못됨 (복구 불가)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 연결 시점에 브로커에 닿을 수 없음
    #[error("connection error: {broker} broker at {address}: {reason}")]
    Connection {
        /// 브로커 종류
        broker: String,
        /// 접속 주소
        address: String,
        /// 실패 사유
        reason: String,
    },

    /// 브로커 연산 실패
    #[error("broker error during {operation}: {reason}")]
    Broker {
        /// 실패한 연산
        operation: BrokerOp,
        /// 실패 사유
        reason: String,
    },

    /// 브로커 연산 타임아웃
    #[error("broker operation {operation} timed out after {timeout:?}")]
    Timeout {
        /// 타임아웃된 연산
        operation: BrokerOp,
        /// 적용된 타임아웃
        timeout: Duration,
    },

    /// 연결되지 않은 상태에서 연산 시도
    #[error("broker is not connected")]
    NotConnected,

    /// 토폴로지에 없는 큐
    #[error("queue not found: {0}")]
    NotFound(String),

    /// 봇 처리기가 메시지 처리에 실패하여 러너가 중단됨
    #[error("bot '{bot_id}' failed to process message: {reason}")]
    Processing {
        /// 봇 ID
        bot_id: String,
        /// 실패 사유
        reason: String,
    },
}

impl PipelineError {
    /// 연결 이후 브로커 연산 실패인지 확인합니다.
    ///
    /// `Broker`, `Timeout`, `NotConnected`가 해당합니다.
    pub fn is_broker_failure(&self) -> bool {
        matches!(
            self,
            Self::Broker { .. } | Self::Timeout { .. } | Self::NotConnected
        )
    }

    /// 타임아웃 에러인지 확인합니다.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// 실패한 브로커 연산 (해당하는 경우)
    pub fn operation(&self) -> Option<BrokerOp> {
        match self {
            Self::Broker { operation, .. } | Self::Timeout { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}

impl From<TopologyError> for PipelineError {
    fn from(err: TopologyError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<PipelineError> for FeedpipeError {
    fn from(err: PipelineError) -> Self {
        FeedpipeError::Pipeline(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_failure_classification() {
        let broker = PipelineError::Broker {
            operation: BrokerOp::Push,
            reason: "READONLY".to_owned(),
        };
        let timeout = PipelineError::Timeout {
            operation: BrokerOp::BlockingMove,
            timeout: Duration::from_secs(1),
        };
        assert!(broker.is_broker_failure());
        assert!(timeout.is_broker_failure());
        assert!(timeout.is_timeout());
        assert!(PipelineError::NotConnected.is_broker_failure());
        assert!(!PipelineError::NotFound("q".to_owned()).is_broker_failure());
        assert!(!PipelineError::Configuration("x".to_owned()).is_broker_failure());
    }

    #[test]
    fn operation_is_exposed() {
        let err = PipelineError::Timeout {
            operation: BrokerOp::BlockingMove,
            timeout: Duration::from_millis(10),
        };
        assert_eq!(err.operation(), Some(BrokerOp::BlockingMove));
        assert_eq!(PipelineError::NotConnected.operation(), None);
    }

    #[test]
    fn connection_error_display() {
        let err = PipelineError::Connection {
            broker: "redis".to_owned(),
            address: "127.0.0.1:6379".to_owned(),
            reason: "connection refused".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("redis"));
        assert!(msg.contains("127.0.0.1:6379"));
    }

    #[test]
    fn topology_error_becomes_configuration() {
        let err: PipelineError = TopologyError::InvalidQueueName {
            name: "a,b".to_owned(),
            reason: "must not contain ','".to_owned(),
        }
        .into();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn converts_to_root_error() {
        let err: FeedpipeError = PipelineError::NotFound("ghost-queue".to_owned()).into();
        assert!(matches!(err, FeedpipeError::Pipeline(_)));
        assert!(err.to_string().contains("ghost-queue"));
    }
}
