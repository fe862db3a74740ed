//! feedpipectl 라이브러리 -- 인자 정의, 명령 처리기, 출력 형식
//!
//! 바이너리(`main.rs`)는 인자를 파싱하고 [`commands::dispatch`]에 넘기기만 합니다.
//! 통합 테스트는 [`commands::CommandContext`]에 인메모리 브로커 팩토리를 넣어
//! 같은 처리기를 실행합니다.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod output;
