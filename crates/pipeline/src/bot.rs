//! 봇 러너 -- 수신 → 처리 → 송신 → 확인 루프
//!
//! [`BotRunner`]는 소스 역할과 목적지 역할의 [`Pipeline`]을 하나씩 소유하고
//! 호출자가 넘긴 [`Processor`]로 메시지를 처리합니다.
//!
//! - 처리 결과가 비어 있으면 메시지를 버리고 확인합니다.
//! - 송신이 실패하면 확인하지 않습니다. 메시지는 내부 큐에 남습니다.
//! - 처리 실패와 브로커 실패를 연속 에러로 셉니다. `error_retry_delay`만큼 쉰 뒤
//!   같은 메시지부터 다시 시도하며, 브로커 실패였다면 두 연결을 다시 맺습니다.
//! - 연속 에러가 `error_max_retries`를 넘으면 [`ErrorProcedure`]를 따릅니다.
//!   처리 실패였다면 그 전에 메시지를 덤프하고 확인합니다.
//! - 종료 토큰은 사이클 사이와 대기 중에 확인합니다. 수신 대기 중 취소되면
//!   대기를 버리고 소스 상태를 `Idle`로 되돌립니다.
//!
//! # 덤프 형식
//! `{dump_dir}/{bot_id}.dump`에 한 줄에 하나씩 JSON 레코드를 덧붙입니다.
//!
//! ```text
//! {"bot_id":"upper","timestamp":1760745600,"error":"malformed event","message":"bad"}
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use feedpipe_core::config::{BotConfig, PipelineConfig, PipelineRole};
pub use feedpipe_core::config::ErrorProcedure;
use feedpipe_core::metrics as m;
use metrics::{counter, histogram};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::factory::PipelineFactory;
use crate::pipeline::Pipeline;
use crate::queues::QueueResolver;

/// 처리기 에러
#[derive(Debug, thiserror::Error)]
#[error("{reason}")]
pub struct ProcessError {
    reason: String,
}

impl ProcessError {
    /// 사유로 생성합니다.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// 메시지 처리기
///
/// 결과 목록의 각 메시지가 목적지 큐로 보내집니다. 빈 목록은 메시지를 버린다는 뜻입니다.
pub trait Processor: Send {
    /// 메시지 하나를 처리합니다.
    fn process(
        &mut self,
        message: Bytes,
    ) -> impl Future<Output = Result<Vec<Bytes>, ProcessError>> + Send;
}

/// 러너 옵션
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// 재시도를 모두 쓴 뒤의 동작
    pub error_procedure: ErrorProcedure,
    /// 연속 에러 허용 횟수. 이 값을 넘으면 `error_procedure`를 따름
    pub error_max_retries: u32,
    /// 에러 후 재시도 전 대기 시간
    pub error_retry_delay: Duration,
    /// 포기한 메시지를 남길 디렉터리 (없으면 덤프하지 않음)
    pub dump_dir: Option<PathBuf>,
    /// 메시지를 하나 확인할 때마다 쉬는 시간
    pub rate_limit: Option<Duration>,
    /// 이 수만큼 확인하면 종료 (없으면 무한)
    pub max_messages: Option<u64>,
}

impl RunnerOptions {
    /// `[bot]` 설정 섹션에서 옵션을 만듭니다.
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            error_procedure: config.error_procedure,
            error_max_retries: config.error_max_retries,
            error_retry_delay: config.retry_delay(),
            dump_dir: config.dump_dir(),
            rate_limit: config.rate_limit(),
            max_messages: None,
        }
    }
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            dump_dir: None,
            ..Self::from_config(&BotConfig::default())
        }
    }
}

/// 실행 결과 요약
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// 확인한 메시지 수 (버린 것, 재시도를 모두 쓰고 포기한 것 포함)
    pub acknowledged: u64,
    /// 처리 결과로 보낸 메시지 수
    pub forwarded: u64,
    /// 처리기가 빈 결과를 돌려준 메시지 수
    pub filtered: u64,
    /// 처리 실패 수 (재시도 포함)
    pub failed: u64,
    /// 브로커 실패 수
    pub pipeline_failures: u64,
    /// 덤프 파일에 남긴 메시지 수
    pub dumped: u64,
}

/// 한 사이클의 정상 결과
enum Cycle {
    Completed,
    Idle,
    Cancelled,
}

/// 한 사이클의 실패
enum CycleError {
    /// 처리기 실패. 메시지는 내부 큐에 남아 있음
    Message { message: Bytes, error: ProcessError },
    /// 재연결로 복구를 시도할 브로커 실패
    Pipeline(PipelineError),
    /// 재시도해도 소용없는 실패
    Fatal(PipelineError),
}

impl From<PipelineError> for CycleError {
    fn from(e: PipelineError) -> Self {
        if e.is_broker_failure() || matches!(e, PipelineError::Connection { .. }) {
            Self::Pipeline(e)
        } else {
            Self::Fatal(e)
        }
    }
}

#[derive(Serialize)]
struct DumpRecord<'a> {
    bot_id: &'a str,
    timestamp: u64,
    error: String,
    message: String,
}

/// 봇 러너
pub struct BotRunner<P> {
    bot_id: String,
    source: Pipeline,
    destination: Pipeline,
    processor: P,
    options: RunnerOptions,
    needs_reconnect: bool,
}

impl<P: Processor> BotRunner<P> {
    /// 바인딩된 두 파이프라인으로 생성합니다.
    ///
    /// 소스 파이프라인에 소스 큐가 없으면 [`PipelineError::Configuration`]입니다.
    pub fn new(
        bot_id: impl Into<String>,
        source: Pipeline,
        destination: Pipeline,
        processor: P,
    ) -> Result<Self, PipelineError> {
        let bot_id = bot_id.into();
        if source.source().is_none() {
            return Err(PipelineError::Configuration(format!(
                "bot '{bot_id}' needs a source queue to run"
            )));
        }
        Ok(Self {
            bot_id,
            source,
            destination,
            processor,
            options: RunnerOptions::default(),
            needs_reconnect: false,
        })
    }

    /// 설정과 토폴로지로 두 역할의 연결을 만들고 봇의 큐를 바인딩합니다.
    pub async fn connect(
        bot_id: &str,
        factory: &PipelineFactory,
        config: &PipelineConfig,
        resolver: &QueueResolver,
        processor: P,
    ) -> Result<Self, PipelineError> {
        let binding = resolver.bind_source(bot_id)?;
        let destinations = resolver.bind_destinations_for(bot_id)?;

        let mut source = factory.connect(config, PipelineRole::Source).await?;
        source.set_source(binding);

        let mut destination = factory.connect(config, PipelineRole::Destination).await?;
        destination.set_destinations(destinations);
        destination.set_load_balance(resolver.load_balance_for(bot_id, config.load_balance));

        Self::new(bot_id, source, destination, processor)
    }

    /// 옵션을 설정합니다.
    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// 봇 ID
    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    /// 소스 파이프라인
    pub fn source(&self) -> &Pipeline {
        &self.source
    }

    /// 목적지 파이프라인
    pub fn destination(&self) -> &Pipeline {
        &self.destination
    }

    /// 처리기
    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// `shutdown`이 취소되거나 `max_messages`에 닿을 때까지 루프를 돕니다.
    ///
    /// 수신 대기 타임아웃은 유휴 상태로 보고 계속 기다립니다.
    /// `error_procedure`가 `Stop`이면 재시도를 모두 쓴 마지막 에러를 반환합니다.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();
        let mut retries: u32 = 0;
        info!(bot = %self.bot_id, "bot runner started");

        loop {
            if self
                .options
                .max_messages
                .is_some_and(|max| summary.acknowledged >= max)
            {
                debug!(bot = %self.bot_id, "message limit reached");
                break;
            }
            if shutdown.is_cancelled() {
                break;
            }

            let failure = match self.cycle(&shutdown, &mut summary).await {
                Ok(Cycle::Completed) => {
                    retries = 0;
                    if let Some(delay) = self.options.rate_limit {
                        debug!(bot = %self.bot_id, ?delay, "rate limit");
                        if !pause(&shutdown, delay).await {
                            break;
                        }
                    }
                    continue;
                }
                Ok(Cycle::Idle) => continue,
                Ok(Cycle::Cancelled) => break,
                Err(failure) => failure,
            };

            retries += 1;
            let exhausted = retries > self.options.error_max_retries;
            let mut wait = true;

            match failure {
                CycleError::Fatal(e) => {
                    error!(bot = %self.bot_id, error = %e, "bot runner cannot continue");
                    return Err(e);
                }
                CycleError::Pipeline(e) => {
                    summary.pipeline_failures += 1;
                    counter!(m::BOT_PIPELINE_FAILURES_TOTAL, m::LABEL_BOT => self.bot_id.clone())
                        .increment(1);
                    error!(bot = %self.bot_id, error = %e, retries, "pipeline failed");
                    self.source.disconnect().await;
                    self.destination.disconnect().await;
                    self.needs_reconnect = true;

                    if exhausted {
                        match self.options.error_procedure {
                            ErrorProcedure::Stop => {
                                error!(bot = %self.bot_id, "retries exhausted, stopping");
                                return Err(e);
                            }
                            ErrorProcedure::Pass => retries = 0,
                        }
                    }
                }
                CycleError::Message { message, error } => {
                    summary.failed += 1;
                    counter!(m::BOT_PROCESS_FAILURES_TOTAL, m::LABEL_BOT => self.bot_id.clone())
                        .increment(1);
                    warn!(bot = %self.bot_id, error = %error, retries, "processing failed");

                    if exhausted {
                        self.give_up(&message, &error, &mut summary).await?;
                        match self.options.error_procedure {
                            ErrorProcedure::Stop => {
                                error!(bot = %self.bot_id, "retries exhausted, stopping");
                                return Err(PipelineError::Processing {
                                    bot_id: self.bot_id.clone(),
                                    reason: error.to_string(),
                                });
                            }
                            ErrorProcedure::Pass => {
                                retries = 0;
                                // 확인까지 끝났으면 바로 다음 메시지로
                                wait = self.needs_reconnect;
                            }
                        }
                    }
                }
            }

            if wait && !pause(&shutdown, self.options.error_retry_delay).await {
                break;
            }
        }

        info!(
            bot = %self.bot_id,
            acknowledged = summary.acknowledged,
            forwarded = summary.forwarded,
            failed = summary.failed,
            pipeline_failures = summary.pipeline_failures,
            dumped = summary.dumped,
            "bot runner stopped"
        );
        Ok(summary)
    }

    /// 재연결 → 수신 → 처리 → 송신 → 확인 한 번
    async fn cycle(
        &mut self,
        shutdown: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<Cycle, CycleError> {
        if self.needs_reconnect {
            self.reconnect().await?;
        }

        let received = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            received = self.source.receive() => Some(received),
        };
        let Some(received) = received else {
            self.source.abandon_receive();
            return Ok(Cycle::Cancelled);
        };
        let message = match received {
            Ok(message) => message,
            Err(e) if e.is_timeout() => {
                debug!(bot = %self.bot_id, "source queue idle");
                return Ok(Cycle::Idle);
            }
            Err(e) => return Err(e.into()),
        };

        let started = Instant::now();
        let outcome = self.processor.process(message.clone()).await;
        histogram!(m::BOT_PROCESS_DURATION_SECONDS, m::LABEL_BOT => self.bot_id.clone())
            .record(started.elapsed().as_secs_f64());
        let outputs = outcome.map_err(|error| CycleError::Message { message, error })?;

        if outputs.is_empty() {
            summary.filtered += 1;
        }
        for output in outputs {
            // 실패하면 확인하지 않음
            self.destination.send(output).await?;
            summary.forwarded += 1;
        }
        self.source.acknowledge().await?;
        summary.acknowledged += 1;
        counter!(m::BOT_MESSAGES_PROCESSED_TOTAL, m::LABEL_BOT => self.bot_id.clone())
            .increment(1);
        Ok(Cycle::Completed)
    }

    async fn reconnect(&mut self) -> Result<(), PipelineError> {
        info!(bot = %self.bot_id, "reconnecting pipelines");
        self.source.disconnect().await;
        self.destination.disconnect().await;
        self.source.connect().await?;
        self.destination.connect().await?;
        self.needs_reconnect = false;
        Ok(())
    }

    /// 재시도를 모두 쓴 메시지를 덤프하고 확인합니다.
    ///
    /// 덤프에 실패하면 확인하지 않고 에러를 반환합니다. 메시지는 내부 큐에 남습니다.
    async fn give_up(
        &mut self,
        message: &Bytes,
        error: &ProcessError,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        if let Some(dir) = &self.options.dump_dir {
            match dump_message(dir, &self.bot_id, message, error).await {
                Ok(path) => {
                    summary.dumped += 1;
                    counter!(m::BOT_MESSAGES_DUMPED_TOTAL, m::LABEL_BOT => self.bot_id.clone())
                        .increment(1);
                    info!(bot = %self.bot_id, path = %path.display(), "message dumped");
                }
                Err(e) => {
                    error!(bot = %self.bot_id, error = %e, "dump failed, message kept in internal queue");
                    return Err(PipelineError::Processing {
                        bot_id: self.bot_id.clone(),
                        reason: format!("{error} (dump failed: {e})"),
                    });
                }
            }
        }

        match self.source.acknowledge().await {
            Ok(()) => summary.acknowledged += 1,
            Err(e) => {
                // 내부 큐에 남은 메시지는 재연결 후 다시 전달됨
                warn!(bot = %self.bot_id, error = %e, "acknowledge after giving up failed");
                summary.pipeline_failures += 1;
                self.source.disconnect().await;
                self.destination.disconnect().await;
                self.needs_reconnect = true;
            }
        }
        Ok(())
    }

    /// 두 연결을 해제합니다.
    pub async fn close(mut self) {
        self.source.disconnect().await;
        self.destination.disconnect().await;
    }
}

/// `delay`만큼 기다립니다. 그 사이 `shutdown`이 취소되면 false.
async fn pause(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// `{dir}/{bot_id}.dump`에 JSON 한 줄을 덧붙이고 파일 경로를 돌려줍니다.
async fn dump_message(
    dir: &Path,
    bot_id: &str,
    message: &Bytes,
    error: &ProcessError,
) -> std::io::Result<PathBuf> {
    let record = DumpRecord {
        bot_id,
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs()),
        error: error.to_string(),
        message: String::from_utf8_lossy(message).into_owned(),
    };
    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{bot_id}.dump"));
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(path)
}
