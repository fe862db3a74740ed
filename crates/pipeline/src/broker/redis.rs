//! redis 브로커 -- 영속 외부 브로커 백엔드
//!
//! 멀티플렉스 비동기 연결 하나를 사용합니다. 모든 연산은 소켓 타임아웃으로 제한되며,
//! 타이머가 먼저 끝나면 [`PipelineError::Timeout`]이 됩니다.
//! redis 에러는 이 모듈 밖으로 나가지 않고 [`PipelineError::Broker`]로 변환됩니다.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::Duration;

use ::redis::aio::MultiplexedConnection;
use ::redis::{IntoConnectionInfo, RedisError};
use bytes::Bytes;
use feedpipe_core::config::ConnectionSettings;
use tracing::{debug, warn};

use super::{Broker, BrokerOp};
use crate::error::PipelineError;

/// 서버 측 블로킹 대기가 끝난 뒤 응답을 받기까지의 여유 시간
const BLOCKING_GRACE: Duration = Duration::from_secs(1);

/// `SCAN` 한 번에 요청하는 키 수
const SCAN_BATCH: u64 = 500;

/// redis 연결
pub struct RedisBroker {
    settings: ConnectionSettings,
    conn: Option<MultiplexedConnection>,
}

impl RedisBroker {
    /// 연결 설정으로 생성합니다. 연결은 `connect`에서 수행합니다.
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            conn: None,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    fn connection(&mut self) -> Result<&mut MultiplexedConnection, PipelineError> {
        self.conn.as_mut().ok_or(PipelineError::NotConnected)
    }

    /// 연산을 소켓 타임아웃 안에서 실행하고 에러를 변환합니다.
    async fn bounded<T>(
        op: BrokerOp,
        limit: Duration,
        fut: impl Future<Output = Result<T, RedisError>>,
    ) -> Result<T, PipelineError> {
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) if e.is_timeout() => Err(PipelineError::Timeout {
                operation: op,
                timeout: limit,
            }),
            Ok(Err(e)) => Err(PipelineError::Broker {
                operation: op,
                reason: e.to_string(),
            }),
            Err(_) => Err(PipelineError::Timeout {
                operation: op,
                timeout: limit,
            }),
        }
    }
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("settings", &self.settings)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

impl Broker for RedisBroker {
    fn kind(&self) -> &'static str {
        "redis"
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&mut self) -> Result<(), PipelineError> {
        let address = self.address();
        let connection_error = |reason: String| PipelineError::Connection {
            broker: "redis".to_owned(),
            address: address.clone(),
            reason,
        };

        let mut info = (self.settings.host.as_str(), self.settings.port)
            .into_connection_info()
            .map_err(|e| connection_error(e.to_string()))?;
        info.redis.db = i64::from(self.settings.db);
        info.redis.password = self.settings.password.clone();

        let client = ::redis::Client::open(info).map_err(|e| connection_error(e.to_string()))?;
        let conn = match tokio::time::timeout(
            self.settings.socket_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(connection_error(e.to_string())),
            Err(_) => {
                return Err(connection_error(format!(
                    "timed out after {:?}",
                    self.settings.socket_timeout
                )));
            }
        };

        debug!(address = %address, db = self.settings.db, "redis broker connected");
        self.conn = Some(conn);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!(address = %self.address(), "redis broker disconnected");
        }
    }

    async fn push(&mut self, queue: &str, message: Bytes) -> Result<(), PipelineError> {
        let limit = self.settings.socket_timeout;
        let conn = self.connection()?;
        let _len: i64 = Self::bounded(
            BrokerOp::Push,
            limit,
            ::redis::cmd("LPUSH")
                .arg(queue)
                .arg(message.as_ref())
                .query_async(conn),
        )
        .await?;
        Ok(())
    }

    async fn blocking_move(
        &mut self,
        source: &str,
        destination: &str,
    ) -> Result<Bytes, PipelineError> {
        let limit = self.settings.socket_timeout;
        // 서버 측 대기는 초 단위이며 0은 무한 대기
        let server_wait = limit.as_secs().max(1);
        let conn = self.connection()?;
        let moved: Option<Vec<u8>> = Self::bounded(
            BrokerOp::BlockingMove,
            limit + BLOCKING_GRACE,
            ::redis::cmd("BRPOPLPUSH")
                .arg(source)
                .arg(destination)
                .arg(server_wait)
                .query_async(conn),
        )
        .await?;

        match moved {
            Some(payload) => Ok(Bytes::from(payload)),
            None => Err(PipelineError::Timeout {
                operation: BrokerOp::BlockingMove,
                timeout: limit,
            }),
        }
    }

    async fn peek_tail(&mut self, queue: &str) -> Result<Option<Bytes>, PipelineError> {
        let limit = self.settings.socket_timeout;
        let conn = self.connection()?;
        let tail: Option<Vec<u8>> = Self::bounded(
            BrokerOp::PeekTail,
            limit,
            ::redis::cmd("LINDEX").arg(queue).arg(-1).query_async(conn),
        )
        .await?;
        Ok(tail.map(Bytes::from))
    }

    async fn pop_tail(&mut self, queue: &str) -> Result<Option<Bytes>, PipelineError> {
        let limit = self.settings.socket_timeout;
        let conn = self.connection()?;
        let tail: Option<Vec<u8>> = Self::bounded(
            BrokerOp::PopTail,
            limit,
            ::redis::cmd("RPOP").arg(queue).query_async(conn),
        )
        .await?;
        Ok(tail.map(Bytes::from))
    }

    async fn queue_len(&mut self, queue: &str) -> Result<u64, PipelineError> {
        let limit = self.settings.socket_timeout;
        let conn = self.connection()?;
        Self::bounded(
            BrokerOp::Length,
            limit,
            ::redis::cmd("LLEN").arg(queue).query_async(conn),
        )
        .await
    }

    async fn delete(&mut self, queue: &str) -> Result<(), PipelineError> {
        let limit = self.settings.socket_timeout;
        let conn = self.connection()?;
        let removed: i64 = Self::bounded(
            BrokerOp::Delete,
            limit,
            ::redis::cmd("DEL").arg(queue).query_async(conn),
        )
        .await?;
        if removed == 0 {
            warn!(queue, "delete requested for a queue that does not exist");
        }
        Ok(())
    }

    async fn nonempty_queues(&mut self) -> Result<BTreeMap<String, u64>, PipelineError> {
        let limit = self.settings.socket_timeout;
        let conn = self.connection()?;

        // SCAN은 같은 키를 여러 번 돌려줄 수 있음
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = Self::bounded(
                BrokerOp::Scan,
                limit,
                ::redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .arg("TYPE")
                    .arg("list")
                    .query_async(&mut *conn),
            )
            .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut queues = BTreeMap::new();
        for key in keys {
            let len: u64 = Self::bounded(
                BrokerOp::Length,
                limit,
                ::redis::cmd("LLEN").arg(&key).query_async(&mut *conn),
            )
            .await?;
            if len > 0 {
                queues.insert(key, len);
            }
        }
        debug!(count = queues.len(), "non-empty redis queues scanned");
        Ok(queues)
    }
}
