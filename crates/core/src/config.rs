//! 설정 관리 — feedpipe.toml 파싱 및 런타임 설정
//!
//! [`FeedpipeConfig`]는 로깅 설정과 브로커 연결 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`FEEDPIPE_PIPELINE_BROKER=memory` 형식)
//! 3. 설정 파일 (`feedpipe.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 연결 역할
//! 봇은 소스(수신)와 목적지(송신) 연결을 따로 가질 수 있으므로
//! 브로커 연결 값은 `source_pipeline_*`, `destination_pipeline_*` 키로 나뉩니다.
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), feedpipe_core::error::FeedpipeError> {
//! use feedpipe_core::config::{FeedpipeConfig, PipelineRole};
//!
//! let config = FeedpipeConfig::load("feedpipe.toml").await?;
//! let source = config.pipeline.connection(PipelineRole::Source);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, FeedpipeError};

/// feedpipe 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedpipeConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 브로커/파이프라인 설정
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// 봇 러너 에러 처리 설정
    #[serde(default)]
    pub bot: BotConfig,
}

impl FeedpipeConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FeedpipeError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, FeedpipeError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FeedpipeError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                FeedpipeError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, FeedpipeError> {
        toml::from_str(toml_str).map_err(|e| {
            FeedpipeError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `FEEDPIPE_{SECTION}_{FIELD}`
    /// 예: `FEEDPIPE_PIPELINE_SOURCE_PORT=6380`
    ///
    /// `FEEDPIPE_PIPELINE_HOST`는 소스/목적지 호스트를 함께 바꾸며,
    /// 역할별 변수가 있으면 그 값이 우선합니다.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "FEEDPIPE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "FEEDPIPE_GENERAL_LOG_FORMAT");
        override_string(
            &mut self.general.pipeline_file,
            "FEEDPIPE_GENERAL_PIPELINE_FILE",
        );

        // Pipeline
        let p = &mut self.pipeline;
        override_string(&mut p.broker, "FEEDPIPE_PIPELINE_BROKER");
        override_bool(&mut p.load_balance, "FEEDPIPE_PIPELINE_LOAD_BALANCE");

        override_string(&mut p.source_pipeline_host, "FEEDPIPE_PIPELINE_HOST");
        override_string(&mut p.destination_pipeline_host, "FEEDPIPE_PIPELINE_HOST");

        override_string(&mut p.source_pipeline_host, "FEEDPIPE_PIPELINE_SOURCE_HOST");
        override_u16(&mut p.source_pipeline_port, "FEEDPIPE_PIPELINE_SOURCE_PORT");
        override_u32(&mut p.source_pipeline_db, "FEEDPIPE_PIPELINE_SOURCE_DB");
        override_optional_string(
            &mut p.source_pipeline_password,
            "FEEDPIPE_PIPELINE_SOURCE_PASSWORD",
        );
        override_u64(
            &mut p.source_pipeline_socket_timeout,
            "FEEDPIPE_PIPELINE_SOURCE_SOCKET_TIMEOUT",
        );

        override_string(
            &mut p.destination_pipeline_host,
            "FEEDPIPE_PIPELINE_DESTINATION_HOST",
        );
        override_u16(
            &mut p.destination_pipeline_port,
            "FEEDPIPE_PIPELINE_DESTINATION_PORT",
        );
        override_u32(
            &mut p.destination_pipeline_db,
            "FEEDPIPE_PIPELINE_DESTINATION_DB",
        );
        override_optional_string(
            &mut p.destination_pipeline_password,
            "FEEDPIPE_PIPELINE_DESTINATION_PASSWORD",
        );
        override_u64(
            &mut p.destination_pipeline_socket_timeout,
            "FEEDPIPE_PIPELINE_DESTINATION_SOCKET_TIMEOUT",
        );

        // Bot
        let b = &mut self.bot;
        if let Ok(val) = std::env::var("FEEDPIPE_BOT_ERROR_PROCEDURE") {
            match val.parse() {
                Ok(parsed) => b.error_procedure = parsed,
                Err(_) => warn!(
                    env_key = "FEEDPIPE_BOT_ERROR_PROCEDURE",
                    value = val.as_str(),
                    "failed to parse error procedure from env var, ignoring"
                ),
            }
        }
        override_u32(&mut b.error_max_retries, "FEEDPIPE_BOT_ERROR_MAX_RETRIES");
        override_u64(&mut b.error_retry_delay, "FEEDPIPE_BOT_ERROR_RETRY_DELAY");
        override_bool(&mut b.error_dump_message, "FEEDPIPE_BOT_ERROR_DUMP_MESSAGE");
        override_string(&mut b.dump_path, "FEEDPIPE_BOT_DUMP_PATH");
        override_u64(&mut b.rate_limit, "FEEDPIPE_BOT_RATE_LIMIT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), FeedpipeError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.general.pipeline_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "general.pipeline_file".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        self.pipeline.validate()?;
        self.bot.validate()
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 파이프라인 토폴로지 파일 경로
    pub pipeline_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pipeline_file: "/etc/feedpipe/pipeline.toml".to_owned(),
        }
    }
}

/// 연결 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineRole {
    /// 소스 큐에서 수신
    Source,
    /// 목적지 큐로 송신
    Destination,
}

impl fmt::Display for PipelineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Destination => write!(f, "destination"),
        }
    }
}

/// 브로커/파이프라인 설정
///
/// 키 이름은 외부 도구와 공유하는 `<role>_pipeline_<field>` 규칙을 따릅니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 브로커 종류 (대소문자 무시: redis, memory)
    pub broker: String,
    /// true면 목적지 하나에 라운드로빈 전송, false면 모든 목적지에 브로드캐스트
    pub load_balance: bool,

    /// 소스 브로커 호스트
    pub source_pipeline_host: String,
    /// 소스 브로커 포트
    pub source_pipeline_port: u16,
    /// 소스 브로커 DB 번호
    pub source_pipeline_db: u32,
    /// 소스 브로커 비밀번호
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_pipeline_password: Option<String>,
    /// 소스 블로킹 호출 타임아웃 (초)
    pub source_pipeline_socket_timeout: u64,

    /// 목적지 브로커 호스트
    pub destination_pipeline_host: String,
    /// 목적지 브로커 포트
    pub destination_pipeline_port: u16,
    /// 목적지 브로커 DB 번호
    pub destination_pipeline_db: u32,
    /// 목적지 브로커 비밀번호
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_pipeline_password: Option<String>,
    /// 목적지 블로킹 호출 타임아웃 (초)
    pub destination_pipeline_socket_timeout: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            broker: "redis".to_owned(),
            load_balance: false,
            source_pipeline_host: "127.0.0.1".to_owned(),
            source_pipeline_port: 6379,
            source_pipeline_db: 2,
            source_pipeline_password: None,
            source_pipeline_socket_timeout: 50_000,
            destination_pipeline_host: "127.0.0.1".to_owned(),
            destination_pipeline_port: 6379,
            destination_pipeline_db: 2,
            destination_pipeline_password: None,
            destination_pipeline_socket_timeout: 50_000,
        }
    }
}

impl PipelineConfig {
    /// 역할별 연결 설정을 추출합니다.
    pub fn connection(&self, role: PipelineRole) -> ConnectionSettings {
        match role {
            PipelineRole::Source => ConnectionSettings {
                host: self.source_pipeline_host.clone(),
                port: self.source_pipeline_port,
                db: self.source_pipeline_db,
                password: self.source_pipeline_password.clone(),
                socket_timeout: Duration::from_secs(self.source_pipeline_socket_timeout),
            },
            PipelineRole::Destination => ConnectionSettings {
                host: self.destination_pipeline_host.clone(),
                port: self.destination_pipeline_port,
                db: self.destination_pipeline_db,
                password: self.destination_pipeline_password.clone(),
                socket_timeout: Duration::from_secs(self.destination_pipeline_socket_timeout),
            },
        }
    }

    /// 파이프라인 설정을 검증합니다.
    ///
    /// 브로커 종류가 실제로 등록되어 있는지는 팩토리가 확인합니다.
    pub fn validate(&self) -> Result<(), FeedpipeError> {
        if self.broker.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.broker".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        for role in [PipelineRole::Source, PipelineRole::Destination] {
            let conn = self.connection(role);
            if conn.host.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("pipeline.{role}_pipeline_host"),
                    reason: "must not be empty".to_owned(),
                }
                .into());
            }
            if conn.port == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("pipeline.{role}_pipeline_port"),
                    reason: "must be greater than 0".to_owned(),
                }
                .into());
            }
            if conn.socket_timeout.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: format!("pipeline.{role}_pipeline_socket_timeout"),
                    reason: "must be greater than 0".to_owned(),
                }
                .into());
            }
        }

        Ok(())
    }
}

/// 재시도 횟수를 넘긴 에러의 처리 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorProcedure {
    /// 봇을 멈춤
    #[default]
    Stop,
    /// 에러를 기록하고 계속 진행
    Pass,
}

impl fmt::Display for ErrorProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Pass => write!(f, "pass"),
        }
    }
}

impl FromStr for ErrorProcedure {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stop" => Ok(Self::Stop),
            "pass" => Ok(Self::Pass),
            other => Err(ConfigError::InvalidValue {
                field: "bot.error_procedure".to_owned(),
                reason: format!("'{other}' is not one of: stop, pass"),
            }),
        }
    }
}

/// 봇 러너 에러 처리 설정
///
/// 처리 실패와 브로커 실패는 `error_max_retries`번까지
/// `error_retry_delay`초 쉬고 다시 시도합니다. 그 뒤에는 `error_procedure`를 따릅니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// 재시도 횟수를 넘긴 뒤의 처리 방식 (stop, pass)
    pub error_procedure: ErrorProcedure,
    /// 연속 에러 허용 횟수
    pub error_max_retries: u32,
    /// 에러 후 재시도까지 대기 시간 (초)
    pub error_retry_delay: u64,
    /// 포기한 메시지를 덤프 파일에 남길지 여부
    pub error_dump_message: bool,
    /// 덤프 파일 디렉토리 (`{dump_path}/{bot_id}.dump`)
    pub dump_path: String,
    /// 메시지 처리 사이 대기 시간 (초, 0이면 대기 없음)
    pub rate_limit: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            error_procedure: ErrorProcedure::Stop,
            error_max_retries: 3,
            error_retry_delay: 15,
            error_dump_message: true,
            dump_path: "/var/lib/feedpipe/dump".to_owned(),
            rate_limit: 0,
        }
    }
}

impl BotConfig {
    /// 재시도 대기 시간
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.error_retry_delay)
    }

    /// 처리 사이 대기 시간. 0이면 `None`.
    pub fn rate_limit(&self) -> Option<Duration> {
        (self.rate_limit > 0).then(|| Duration::from_secs(self.rate_limit))
    }

    /// 덤프를 켰을 때의 덤프 디렉토리
    pub fn dump_dir(&self) -> Option<PathBuf> {
        self.error_dump_message
            .then(|| PathBuf::from(&self.dump_path))
    }

    /// 봇 설정을 검증합니다.
    pub fn validate(&self) -> Result<(), FeedpipeError> {
        if self.error_dump_message && self.dump_path.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "bot.dump_path".to_owned(),
                reason: "must not be empty when error_dump_message is enabled".to_owned(),
            }
            .into());
        }
        Ok(())
    }
}

/// 한 역할의 브로커 연결 설정
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
    /// DB 번호 (네임스페이스)
    pub db: u32,
    /// 비밀번호
    pub password: Option<String>,
    /// 블로킹 호출 타임아웃
    pub socket_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        PipelineConfig::default().connection(PipelineRole::Source)
    }
}

// 비밀번호는 로그에 남기지 않음
impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("socket_timeout", &self.socket_timeout)
            .finish()
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_optional_string(target: &mut Option<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = if val.is_empty() { None } else { Some(val) };
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
