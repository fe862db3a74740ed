//! `feedpipectl bot` command handler

use std::io::Write;

use bytes::Bytes;
use colored::Colorize;
use serde::Serialize;
use tracing::info;

use feedpipe_core::config::PipelineRole;
use feedpipe_core::types::QueueName;
use feedpipe_pipeline::QueueResolver;

use crate::cli::{BotAction, BotArgs, InspectAction};
use crate::commands::CommandContext;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `bot` command.
pub async fn execute(
    args: BotArgs,
    ctx: &CommandContext,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let BotAction::Inspect(inspect) = args.action;
    match inspect.action {
        InspectAction::Get => {
            let report = get_message(ctx, &inspect.bot_id).await?;
            writer.render(&report)
        }
        InspectAction::Pop => {
            let report = pop_message(ctx, &inspect.bot_id).await?;
            writer.render(&report)
        }
        InspectAction::Send { message } => {
            let report = send_message(ctx, &inspect.bot_id, message).await?;
            writer.render(&report)
        }
    }
}

/// Peek at the next message of a bot's source queue.
pub async fn get_message(ctx: &CommandContext, bot_id: &str) -> Result<MessageReport, CliError> {
    let mut admin = ctx.open_admin(PipelineRole::Source).await?;
    let queue = source_queue(admin.resolver(), bot_id)?;
    let result = admin.peek(bot_id).await;
    admin.close().await;
    Ok(MessageReport::new(bot_id, "get", queue, result?))
}

/// Remove the next message of a bot's source queue.
pub async fn pop_message(ctx: &CommandContext, bot_id: &str) -> Result<MessageReport, CliError> {
    let mut admin = ctx.open_admin(PipelineRole::Source).await?;
    let queue = source_queue(admin.resolver(), bot_id)?;
    let result = admin.pop(bot_id).await;
    admin.close().await;
    Ok(MessageReport::new(bot_id, "pop", queue, result?))
}

/// Send a message to a bot's destination queues.
pub async fn send_message(
    ctx: &CommandContext,
    bot_id: &str,
    message: String,
) -> Result<SendReport, CliError> {
    let mut admin = ctx.open_admin(PipelineRole::Destination).await?;
    ensure_bot(admin.resolver(), bot_id)?;
    let destinations = admin.resolver().bind_destinations_for(bot_id)?;
    let load_balance = admin
        .resolver()
        .load_balance_for(bot_id, admin.pipeline().load_balance());
    let result = admin.inject(bot_id, Bytes::from(message)).await;
    admin.close().await;
    result?;

    info!(bot = bot_id, "message sent from cli");
    Ok(SendReport {
        bot_id: bot_id.to_owned(),
        destinations: destinations.iter().cloned().collect(),
        load_balance,
    })
}

fn ensure_bot(resolver: &QueueResolver, bot_id: &str) -> Result<(), CliError> {
    match resolver.topology().bot(bot_id) {
        Some(_) => Ok(()),
        None => Err(CliError::NotFound(format!("bot '{bot_id}'"))),
    }
}

fn source_queue(resolver: &QueueResolver, bot_id: &str) -> Result<QueueName, CliError> {
    ensure_bot(resolver, bot_id)?;
    Ok(resolver.bind_source(bot_id)?.source)
}

/// Result of `bot inspect <id> get|pop`.
#[derive(Debug, Serialize)]
pub struct MessageReport {
    pub bot_id: String,
    pub action: String,
    pub queue: QueueName,
    /// Message body (lossy UTF-8); `None` when the queue is empty.
    pub message: Option<String>,
}

impl MessageReport {
    fn new(bot_id: &str, action: &str, queue: QueueName, message: Option<Bytes>) -> Self {
        Self {
            bot_id: bot_id.to_owned(),
            action: action.to_owned(),
            queue,
            message: message.map(|m| String::from_utf8_lossy(&m).into_owned()),
        }
    }
}

impl Render for MessageReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            w,
            "{} {} (queue: {})",
            self.action.to_uppercase().bold(),
            self.bot_id.bold(),
            self.queue.as_str()
        )?;
        match &self.message {
            None => writeln!(w, "  {}", "queue is empty".dimmed()),
            Some(body) => match serde_json::from_str::<serde_json::Value>(body) {
                // JSON 이벤트는 들여쓰기해서 출력
                Ok(value) => match serde_json::to_string_pretty(&value) {
                    Ok(pretty) => writeln!(w, "{pretty}"),
                    Err(_) => writeln!(w, "{body}"),
                },
                Err(_) => writeln!(w, "{body}"),
            },
        }
    }
}

/// Result of `bot inspect <id> send`.
#[derive(Debug, Serialize)]
pub struct SendReport {
    pub bot_id: String,
    pub destinations: Vec<QueueName>,
    pub load_balance: bool,
}

impl Render for SendReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if self.destinations.is_empty() {
            return writeln!(
                w,
                "Bot {} has no destination queues, nothing sent",
                self.bot_id.bold()
            );
        }
        let queues = self
            .destinations
            .iter()
            .map(QueueName::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if self.load_balance {
            // Every CLI call opens a fresh session, so the rotation starts over.
            return writeln!(
                w,
                "{} message to {} (load-balanced over [{queues}]; each send starts at the first queue)",
                "Sent".green().bold(),
                self.destinations[0].as_str().bold()
            );
        }
        writeln!(w, "{} message to all of [{queues}]", "Sent".green().bold())
    }
}
