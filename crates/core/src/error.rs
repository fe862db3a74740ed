//! 에러 타입 — 설정/토폴로지 에러와 최상위 에러 정의
//!
//! 브로커 동작 중 발생하는 에러는 `feedpipe-pipeline`의 `PipelineError`가 담당하며,
//! `From<PipelineError> for FeedpipeError` 변환으로 이 최상위 타입에 합류합니다.

/// feedpipe 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum FeedpipeError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 토폴로지 에러
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// 파이프라인(브로커) 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 토폴로지 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// 토폴로지 파일을 찾을 수 없음
    #[error("pipeline file not found: {path}")]
    FileNotFound { path: String },

    /// 토폴로지 파싱 실패
    #[error("failed to parse pipeline file: {reason}")]
    ParseFailed { reason: String },

    /// 큐 이름 규칙 위반
    #[error("invalid queue name '{name}': {reason}")]
    InvalidQueueName { name: String, reason: String },

    /// 봇 ID 규칙 위반
    #[error("invalid bot id '{bot_id}': {reason}")]
    InvalidBotId { bot_id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_to_root() {
        let err: FeedpipeError = ConfigError::FileNotFound {
            path: "feedpipe.toml".to_owned(),
        }
        .into();
        assert!(matches!(err, FeedpipeError::Config(_)));
        assert!(err.to_string().contains("feedpipe.toml"));
    }

    #[test]
    fn topology_error_display_names_queue() {
        let err = TopologyError::InvalidQueueName {
            name: "a b".to_owned(),
            reason: "must not contain whitespace".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'a b'"));
        assert!(msg.contains("whitespace"));
    }

    #[test]
    fn io_error_converts_to_root() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: FeedpipeError = io.into();
        assert!(matches!(err, FeedpipeError::Io(_)));
    }
}
