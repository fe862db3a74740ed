//! `feedpipectl config` command handler

use std::io::Write;

use colored::Colorize;
use serde::Serialize;
use tracing::info;

use feedpipe_core::config::FeedpipeConfig;
use feedpipe_core::topology::PipelineTopology;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::commands::CommandContext;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

const REDACTED: &str = "***REDACTED***";

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    ctx: &CommandContext,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => {
            let report = validate(ctx).await;
            writer.render(&report)?;
            if !report.valid {
                return Err(CliError::Config("configuration is invalid".to_owned()));
            }
            Ok(())
        }
        ConfigAction::Show { section } => {
            let report = show(ctx, section.as_deref()).await?;
            writer.render(&report)
        }
    }
}

/// Load feedpipe.toml and the topology file, collecting every error.
pub async fn validate(ctx: &CommandContext) -> ConfigValidationReport {
    info!(path = %ctx.config_path().display(), "validating configuration");

    let mut errors = Vec::new();
    let mut pipeline_file = None;
    let mut bots = 0;

    match ctx.load_config().await {
        Ok(config) => {
            let path = ctx.pipeline_file(&config);
            pipeline_file = Some(path.display().to_string());
            match PipelineTopology::load(&path).await {
                Ok(topology) => bots = topology.bots.len(),
                Err(e) => errors.push(e.to_string()),
            }
        }
        Err(e) => errors.push(e.to_string()),
    }

    ConfigValidationReport {
        source: ctx.config_path().display().to_string(),
        pipeline_file,
        valid: errors.is_empty(),
        bots,
        errors,
    }
}

/// Effective configuration with passwords redacted.
pub async fn show(ctx: &CommandContext, section: Option<&str>) -> Result<ConfigReport, CliError> {
    info!(path = %ctx.config_path().display(), "loading configuration");

    let mut config = ctx.load_config().await?;
    redact_credentials(&mut config);

    let config_toml = match section {
        None => to_toml(&config),
        Some("general") => to_toml(&config.general),
        Some("pipeline") => to_toml(&config.pipeline),
        Some("bot") => to_toml(&config.bot),
        Some(other) => {
            return Err(CliError::Command(format!(
                "unknown section: {other} (expected: general, pipeline, bot)"
            )));
        }
    };

    Ok(ConfigReport {
        source: ctx.config_path().display().to_string(),
        section: section.map(str::to_owned),
        config_toml,
    })
}

fn to_toml<T: Serialize>(value: &T) -> String {
    toml::to_string_pretty(value).unwrap_or_else(|e| format!("(serialization error: {e})"))
}

fn redact_credentials(config: &mut FeedpipeConfig) {
    for password in [
        &mut config.pipeline.source_pipeline_password,
        &mut config.pipeline.destination_pipeline_password,
    ] {
        if password.is_some() {
            *password = Some(REDACTED.to_owned());
        }
    }
}

/// Configuration display report.
///
/// `config_toml` is only used for text rendering.
#[derive(Debug, Serialize)]
pub struct ConfigReport {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip)]
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if let Some(ref section) = self.section {
            let section_label = format!("[{section}]");
            writeln!(
                w,
                "Configuration {} (source: {})",
                section_label.bold(),
                self.source
            )?;
        } else {
            writeln!(w, "Configuration (source: {})", self.source.bold())?;
        }

        writeln!(w)?;
        write!(w, "{}", self.config_toml)?;
        Ok(())
    }
}

/// Configuration validation report.
#[derive(Debug, Serialize)]
pub struct ConfigValidationReport {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_file: Option<String>,
    pub valid: bool,
    /// Number of bots in the topology (0 when it failed to load)
    pub bots: usize,
    pub errors: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Config Validation: {}", self.source.bold())?;
        if let Some(ref pipeline_file) = self.pipeline_file {
            writeln!(w, "  Pipeline: {pipeline_file}")?;
        }

        if self.valid {
            writeln!(w, "  Result: {} ({} bots)", "VALID".green().bold(), self.bots)?;
        } else {
            writeln!(w, "  Result: {}", "INVALID".red().bold())?;
            for err in &self.errors {
                writeln!(w, "  Error: {}", err.red())?;
            }
        }
        Ok(())
    }
}
