use clap::Parser;
use colored::Colorize;

use feedpipe_cli::cli::Cli;
use feedpipe_cli::commands::{self, CommandContext};
use feedpipe_cli::error::CliError;
use feedpipe_cli::logging::init_tracing;
use feedpipe_cli::output::OutputWriter;
use feedpipe_core::config::{FeedpipeConfig, GeneralConfig};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            e.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    // 설정 파일이 깨져 있어도 `config validate`가 보고할 수 있도록 기본값으로 로깅을 시작
    let mut general = FeedpipeConfig::load(&cli.config)
        .await
        .map(|config| config.general)
        .unwrap_or_else(|_| GeneralConfig::default());
    if let Some(level) = &cli.log_level {
        general.log_level = level.clone();
    }
    init_tracing(&general)?;
    feedpipe_core::metrics::describe_all();

    tracing::debug!(config = %cli.config.display(), "feedpipectl starting");

    let ctx = CommandContext::new(cli.config).with_pipeline_file(cli.pipeline_file);
    let writer = OutputWriter::new(cli.output);
    commands::dispatch(cli.command, &ctx, &writer).await
}
