//! 메트릭 상수 및 설명 등록
//!
//! 파이프라인과 봇 러너가 기록하는 메트릭의 이름과 설명을 한곳에서 정의합니다.
//! 호출부는 이 상수로 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//! 레코더가 설치되지 않은 경우 매크로 호출은 아무 일도 하지 않습니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `feedpipe_`
//! - 영역: `pipeline_`, `admin_`, `bot_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(feedpipe_core::metrics::PIPELINE_MESSAGES_SENT_TOTAL,
//!     feedpipe_core::metrics::LABEL_QUEUE => "output-queue").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 큐 이름 레이블 키
pub const LABEL_QUEUE: &str = "queue";

/// 브로커 종류 레이블 키 (redis, memory)
pub const LABEL_BROKER: &str = "broker";

/// 브로커 연산 레이블 키 (push, blocking_move, pop_tail, ...)
pub const LABEL_OPERATION: &str = "operation";

/// 봇 ID 레이블 키
pub const LABEL_BOT: &str = "bot";

// ─── Pipeline 메트릭 ───────────────────────────────────────────────

/// Pipeline: 수신한 메시지 수 (counter, label: queue)
pub const PIPELINE_MESSAGES_RECEIVED_TOTAL: &str = "feedpipe_pipeline_messages_received_total";

/// Pipeline: 재전달된 메시지 수, 즉 내부 큐에서 다시 읽은 수 (counter, label: queue)
pub const PIPELINE_MESSAGES_REDELIVERED_TOTAL: &str =
    "feedpipe_pipeline_messages_redelivered_total";

/// Pipeline: 목적지 큐에 넣은 메시지 수 (counter, label: queue)
pub const PIPELINE_MESSAGES_SENT_TOTAL: &str = "feedpipe_pipeline_messages_sent_total";

/// Pipeline: 확인(ack)된 메시지 수 (counter, label: queue)
pub const PIPELINE_MESSAGES_ACKNOWLEDGED_TOTAL: &str =
    "feedpipe_pipeline_messages_acknowledged_total";

/// Pipeline: 타임아웃 후 재연결 횟수 (counter, label: broker)
pub const PIPELINE_RECONNECTS_TOTAL: &str = "feedpipe_pipeline_reconnects_total";

/// Pipeline: 브로커 연산 실패 수 (counter, labels: broker, operation)
pub const PIPELINE_BROKER_ERRORS_TOTAL: &str = "feedpipe_pipeline_broker_errors_total";

// ─── Admin 메트릭 ──────────────────────────────────────────────────

/// Admin: 비운 큐 수 (counter, label: queue)
pub const ADMIN_QUEUES_CLEARED_TOTAL: &str = "feedpipe_admin_queues_cleared_total";

/// Admin: 마지막으로 조회한 큐 길이 (gauge, label: queue)
pub const ADMIN_QUEUE_DEPTH: &str = "feedpipe_admin_queue_depth";

// ─── Bot 메트릭 ────────────────────────────────────────────────────

/// Bot: 처리 완료한 메시지 수 (counter, label: bot)
pub const BOT_MESSAGES_PROCESSED_TOTAL: &str = "feedpipe_bot_messages_processed_total";

/// Bot: 처리 실패 수 (counter, label: bot)
pub const BOT_PROCESS_FAILURES_TOTAL: &str = "feedpipe_bot_process_failures_total";

/// Bot: 러너가 재연결로 복구를 시도한 브로커 실패 수 (counter, label: bot)
pub const BOT_PIPELINE_FAILURES_TOTAL: &str = "feedpipe_bot_pipeline_failures_total";

/// Bot: 재시도를 포기하고 덤프 파일에 남긴 메시지 수 (counter, label: bot)
pub const BOT_MESSAGES_DUMPED_TOTAL: &str = "feedpipe_bot_messages_dumped_total";

/// Bot: 메시지 하나 처리 시간 (histogram, 초, label: bot)
pub const BOT_PROCESS_DURATION_SECONDS: &str = "feedpipe_bot_process_duration_seconds";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 메시지 처리 시간 히스토그램 버킷 (초)
///
/// 100us ~ 10s 범위
pub const PROCESS_DURATION_BUCKETS: [f64; 10] = [
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 10.0,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Pipeline
    describe_counter!(
        PIPELINE_MESSAGES_RECEIVED_TOTAL,
        "Total number of messages handed to a bot from its source queue"
    );
    describe_counter!(
        PIPELINE_MESSAGES_REDELIVERED_TOTAL,
        "Total number of messages re-read from the internal queue after a restart"
    );
    describe_counter!(
        PIPELINE_MESSAGES_SENT_TOTAL,
        "Total number of messages pushed onto destination queues"
    );
    describe_counter!(
        PIPELINE_MESSAGES_ACKNOWLEDGED_TOTAL,
        "Total number of in-flight messages acknowledged"
    );
    describe_counter!(
        PIPELINE_RECONNECTS_TOTAL,
        "Total number of reconnects after a blocking receive timed out"
    );
    describe_counter!(
        PIPELINE_BROKER_ERRORS_TOTAL,
        "Total number of failed broker operations"
    );

    // Admin
    describe_counter!(
        ADMIN_QUEUES_CLEARED_TOTAL,
        "Total number of queues cleared through the admin surface"
    );
    describe_gauge!(ADMIN_QUEUE_DEPTH, "Queue length observed by the last count");

    // Bot
    describe_counter!(
        BOT_MESSAGES_PROCESSED_TOTAL,
        "Total number of messages processed and acknowledged by a bot"
    );
    describe_counter!(
        BOT_PROCESS_FAILURES_TOTAL,
        "Total number of messages whose processing failed"
    );
    describe_counter!(
        BOT_PIPELINE_FAILURES_TOTAL,
        "Total number of broker failures a bot runner recovered from by reconnecting"
    );
    describe_counter!(
        BOT_MESSAGES_DUMPED_TOTAL,
        "Total number of messages written to a dump file after exhausting retries"
    );
    describe_histogram!(
        BOT_PROCESS_DURATION_SECONDS,
        "Time to process a single message in seconds"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        PIPELINE_MESSAGES_RECEIVED_TOTAL,
        PIPELINE_MESSAGES_REDELIVERED_TOTAL,
        PIPELINE_MESSAGES_SENT_TOTAL,
        PIPELINE_MESSAGES_ACKNOWLEDGED_TOTAL,
        PIPELINE_RECONNECTS_TOTAL,
        PIPELINE_BROKER_ERRORS_TOTAL,
        ADMIN_QUEUES_CLEARED_TOTAL,
        ADMIN_QUEUE_DEPTH,
        BOT_MESSAGES_PROCESSED_TOTAL,
        BOT_PROCESS_FAILURES_TOTAL,
        BOT_PIPELINE_FAILURES_TOTAL,
        BOT_MESSAGES_DUMPED_TOTAL,
        BOT_PROCESS_DURATION_SECONDS,
    ];

    #[test]
    fn all_metrics_start_with_feedpipe_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("feedpipe_"),
                "Metric '{}' does not start with 'feedpipe_' prefix",
                name
            );
        }
    }

    #[test]
    fn metric_names_are_unique() {
        let mut names = ALL_METRIC_NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL_METRIC_NAMES.len());
    }

    #[test]
    fn counters_end_with_total() {
        let counters = [
            PIPELINE_MESSAGES_RECEIVED_TOTAL,
            PIPELINE_MESSAGES_SENT_TOTAL,
            ADMIN_QUEUES_CLEARED_TOTAL,
            BOT_PROCESS_FAILURES_TOTAL,
            BOT_PIPELINE_FAILURES_TOTAL,
            BOT_MESSAGES_DUMPED_TOTAL,
        ];
        for name in counters {
            assert!(name.ends_with("_total"), "{name}");
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // 레코더 없이도 패닉하지 않아야 함
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_QUEUE, LABEL_BROKER, LABEL_OPERATION, LABEL_BOT] {
            assert_eq!(label.to_lowercase(), label);
        }
    }

    #[test]
    fn process_duration_buckets_are_sorted() {
        let buckets = PROCESS_DURATION_BUCKETS;
        for i in 1..buckets.len() {
            assert!(buckets[i] > buckets[i - 1]);
        }
    }
}
