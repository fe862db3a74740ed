//! Command handlers -- one module per subcommand

pub mod bot;
pub mod config;
pub mod queues;

use std::path::{Path, PathBuf};

use tracing::debug;

use feedpipe_core::config::{FeedpipeConfig, PipelineRole};
use feedpipe_core::topology::PipelineTopology;
use feedpipe_pipeline::{PipelineFactory, QueueAdmin, QueueResolver};

use crate::cli::Commands;
use crate::error::CliError;
use crate::output::OutputWriter;

/// Shared state for command handlers: where to read configuration from and
/// how to construct brokers.
#[derive(Debug)]
pub struct CommandContext {
    config_path: PathBuf,
    pipeline_file: Option<PathBuf>,
    factory: PipelineFactory,
}

impl CommandContext {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            pipeline_file: None,
            factory: PipelineFactory::default(),
        }
    }

    /// Override `[general] pipeline_file`.
    pub fn with_pipeline_file(mut self, pipeline_file: Option<PathBuf>) -> Self {
        self.pipeline_file = pipeline_file;
        self
    }

    /// Replace the broker factory (used to point the CLI at an in-memory store).
    pub fn with_factory(mut self, factory: PipelineFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Effective topology file path.
    pub fn pipeline_file(&self, config: &FeedpipeConfig) -> PathBuf {
        self.pipeline_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.general.pipeline_file))
    }

    /// Load feedpipe.toml with environment overrides applied.
    pub async fn load_config(&self) -> Result<FeedpipeConfig, CliError> {
        Ok(FeedpipeConfig::load(&self.config_path).await?)
    }

    pub async fn load_topology(&self, config: &FeedpipeConfig) -> Result<PipelineTopology, CliError> {
        let path = self.pipeline_file(config);
        debug!(path = %path.display(), "loading pipeline topology");
        Ok(PipelineTopology::load(&path).await?)
    }

    /// Connect an administrative session for the given connection role.
    pub async fn open_admin(&self, role: PipelineRole) -> Result<QueueAdmin, CliError> {
        let config = self.load_config().await?;
        let topology = self.load_topology(&config).await?;
        let pipeline = self.factory.connect(&config.pipeline, role).await?;
        debug!(
            broker = pipeline.broker_kind(),
            role = %role,
            session = %pipeline.session_id(),
            "admin session connected"
        );
        Ok(QueueAdmin::new(pipeline, QueueResolver::new(topology)))
    }
}

/// Dispatch a parsed command to its handler.
pub async fn dispatch(
    command: Commands,
    ctx: &CommandContext,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match command {
        Commands::Queues(args) => queues::execute(args, ctx, writer).await,
        Commands::Bot(args) => bot::execute(args, ctx, writer).await,
        Commands::Config(args) => config::execute(args, ctx, writer).await,
    }
}
