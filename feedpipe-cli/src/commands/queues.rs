//! `feedpipectl queues` command handler

use std::io::Write;

use colored::Colorize;
use serde::Serialize;
use tracing::info;

use feedpipe_core::config::PipelineRole;
use feedpipe_pipeline::{OrphanedQueue, QueueCount, QueueReport};

use crate::cli::{QueuesAction, QueuesArgs};
use crate::commands::CommandContext;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `queues` command.
pub async fn execute(
    args: QueuesArgs,
    ctx: &CommandContext,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        QueuesAction::List { non_zero, count } => {
            let report = list_queues(ctx, non_zero).await?;
            if count {
                writer.render(&TotalReport {
                    total: report.total,
                })
            } else {
                writer.render(&report)
            }
        }
        QueuesAction::Clear { queue } => {
            let report = clear_queue(ctx, &queue).await?;
            writer.render(&report)
        }
        QueuesAction::Check { ignore } => {
            let report = check_queues(ctx, &ignore).await?;
            writer.render(&report)
        }
    }
}

/// Per-bot queue lengths from the broker.
pub async fn list_queues(ctx: &CommandContext, non_zero: bool) -> Result<QueueReport, CliError> {
    let mut admin = ctx.open_admin(PipelineRole::Source).await?;
    let result = admin.list_queues(non_zero).await;
    admin.close().await;
    Ok(result?)
}

/// Clear one queue and report how many messages were discarded.
pub async fn clear_queue(ctx: &CommandContext, queue: &str) -> Result<ClearReport, CliError> {
    let mut admin = ctx.open_admin(PipelineRole::Source).await?;
    let result = admin.clear_queue(queue).await;
    admin.close().await;
    let discarded = result?;
    info!(queue, discarded, "queue cleared from cli");
    Ok(ClearReport {
        queue: queue.to_owned(),
        discarded,
    })
}

/// Non-empty broker queues that are not part of the topology.
pub async fn check_queues(ctx: &CommandContext, ignore: &[String]) -> Result<CheckReport, CliError> {
    let mut admin = ctx.open_admin(PipelineRole::Source).await?;
    let result = admin.orphaned_queues(ignore).await;
    admin.close().await;
    let orphaned = result?;
    Ok(CheckReport {
        total: orphaned.iter().map(|q| q.count).sum(),
        orphaned,
    })
}

impl Render for QueueReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        for bot in &self.bots {
            writeln!(w, "{}", bot.bot_id.bold())?;
            if let Some(source) = &bot.source {
                render_count(w, "source", source)?;
            }
            if let Some(internal) = &bot.internal {
                render_count(w, "internal", internal)?;
            }
            for destination in &bot.destinations {
                render_count(w, "destination", destination)?;
            }
        }
        writeln!(w, "Total queued: {}", self.total.to_string().bold())?;
        Ok(())
    }
}

fn render_count(w: &mut dyn Write, kind: &str, count: &QueueCount) -> std::io::Result<()> {
    let value = if count.count > 0 {
        count.count.to_string().yellow()
    } else {
        count.count.to_string().normal()
    };
    writeln!(w, "  {kind:<12} {:<36} {value}", count.queue.as_str())
}

/// Result of `queues list --count`.
#[derive(Debug, Serialize)]
pub struct TotalReport {
    pub total: u64,
}

impl Render for TotalReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "{}", self.total)
    }
}

/// Result of `queues clear`.
#[derive(Debug, Serialize)]
pub struct ClearReport {
    pub queue: String,
    pub discarded: u64,
}

impl Render for ClearReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            w,
            "{} queue {} ({} messages discarded)",
            "Cleared".green().bold(),
            self.queue.bold(),
            self.discarded
        )
    }
}

/// Result of `queues check`.
#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub orphaned: Vec<OrphanedQueue>,
    /// Messages sitting in orphaned queues
    pub total: u64,
}

impl Render for CheckReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if self.orphaned.is_empty() {
            return writeln!(w, "{} no orphaned queues", "OK".green().bold());
        }
        writeln!(
            w,
            "{} {} orphaned queue(s) holding {} message(s):",
            "WARNING".yellow().bold(),
            self.orphaned.len(),
            self.total
        )?;
        for queue in &self.orphaned {
            writeln!(w, "  {:<36} {}", queue.queue, queue.count.to_string().yellow())?;
        }
        writeln!(
            w,
            "Possibly left over from an earlier pipeline layout. Inspect them, then delete or add them to the topology."
        )
    }
}

#[cfg(test)]
mod tests {
    use feedpipe_core::types::QueueName;
    use feedpipe_pipeline::BotQueueReport;

    use super::*;

    fn render(payload: &dyn Render) -> String {
        colored::control::set_override(false);
        let mut buffer = Vec::new();
        payload
            .render_text(&mut buffer)
            .expect("text rendering should succeed");
        String::from_utf8(buffer).expect("valid UTF-8")
    }

    #[test]
    fn test_total_report_is_bare_number() {
        assert_eq!(render(&TotalReport { total: 17 }), "17\n");
        let json = serde_json::to_value(TotalReport { total: 17 }).unwrap();
        assert_eq!(json["total"].as_u64(), Some(17));
    }

    #[test]
    fn test_count_report_render_text() {
        let report = QueueReport {
            bots: vec![BotQueueReport {
                bot_id: "parser".to_owned(),
                source: Some(QueueCount {
                    queue: QueueName::new("parser-queue").unwrap(),
                    count: 7,
                }),
                internal: Some(QueueCount {
                    queue: QueueName::new("parser-queue-internal").unwrap(),
                    count: 1,
                }),
                destinations: Vec::new(),
            }],
            total: 8,
        };
        let output = render(&report);
        assert!(output.contains("parser\n"));
        assert!(output.contains("parser-queue-internal"));
        assert!(output.contains("Total queued: 8"));
    }

    #[test]
    fn test_check_report_render() {
        let clean = render(&CheckReport {
            orphaned: Vec::new(),
            total: 0,
        });
        assert!(clean.contains("no orphaned queues"));

        let report = CheckReport {
            orphaned: vec![OrphanedQueue {
                queue: "old-parser-queue".to_owned(),
                count: 4,
            }],
            total: 4,
        };
        let output = render(&report);
        assert!(output.contains("1 orphaned queue(s) holding 4 message(s)"));
        assert!(output.contains("old-parser-queue"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["orphaned"][0]["queue"].as_str(), Some("old-parser-queue"));
        assert_eq!(json["total"].as_u64(), Some(4));
    }

    #[test]
    fn test_clear_report_render() {
        let output = render(&ClearReport {
            queue: "file-output-queue".to_owned(),
            discarded: 3,
        });
        assert!(output.contains("file-output-queue"));
        assert!(output.contains("3 messages discarded"));
    }
}
