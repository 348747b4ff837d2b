//! Console rendering of setup results and key schedules.

use crate::keys::KeySchedule;
use crate::pipeline::{DiscoveryOutcome, PersistOutcome, PipelineResult, StageReport};
use colored::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFormat {
    Table,
    Json,
    Compact,
}

impl StatusFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "table" => Some(StatusFormat::Table),
            "json" => Some(StatusFormat::Json),
            "compact" => Some(StatusFormat::Compact),
            _ => None,
        }
    }
}

fn mark(ok: bool) -> ColoredString {
    if ok {
        "✅".green()
    } else {
        "❌".red()
    }
}

fn discovery_line(label: &str, outcome: Option<&DiscoveryOutcome>) -> String {
    match outcome {
        Some(d) => format!(
            "{} {:<24} {} ({} attempt{})",
            mark(d.connected),
            label,
            d.device.to_string().bright_white(),
            d.attempts,
            if d.attempts == 1 { "" } else { "s" }
        ),
        None => format!("{} {:<24} {}", "·".dimmed(), label, "not reached".dimmed()),
    }
}

fn stage_lines(label: &str, report: Option<&StageReport>, lines: &mut Vec<String>) {
    match report {
        Some(r) => {
            let accepted = r.items.iter().filter(|i| i.accepted).count();
            lines.push(format!(
                "{} {:<24} {}/{} items accepted",
                mark(r.accepted()),
                label,
                accepted,
                r.items.len()
            ));
            for item in r.rejected() {
                lines.push(format!("     {} {} = {}", "rejected".bright_red(), item.key, item.value));
            }
        }
        None => lines.push(format!("{} {:<24} {}", "·".dimmed(), label, "not reached".dimmed())),
    }
}

/// Render a setup result for the console.
pub fn render_result(result: &PipelineResult, format: StatusFormat) -> String {
    match format {
        StatusFormat::Json => serde_json::to_string_pretty(result)
            .unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e)),
        StatusFormat::Compact => {
            let verdict = if result.is_success() {
                "OK".bright_green()
            } else {
                "DEGRADED".yellow()
            };
            match result.failed_stage() {
                Some(stage) => format!("{:?} {} ({} failed)", result.state, verdict, stage),
                None => format!("{:?} {}", result.state, verdict),
            }
        }
        StatusFormat::Table => {
            let mut lines = vec![format!("{}", "🛰️  Correction pipeline".bold())];
            lines.push(discovery_line("correction discovery", result.correction_discovery.as_ref()));
            lines.push(discovery_line("position discovery", result.position_discovery.as_ref()));
            stage_lines("correction config", result.correction_config.as_ref(), &mut lines);
            stage_lines("position config", result.position_config.as_ref(), &mut lines);

            let persist = match result.persist {
                PersistOutcome::NotAttempted => format!("{} {:<24} {}", "·".dimmed(), "persist", "not reached".dimmed()),
                PersistOutcome::Unsupported => format!("{} {:<24} {}", "·".dimmed(), "persist", "unsupported"),
                PersistOutcome::Saved => format!("{} {:<24} saved", mark(true), "persist"),
                PersistOutcome::Failed => format!("{} {:<24} failed", mark(false), "persist"),
            };
            lines.push(persist);

            lines.push(match result.keys_loaded {
                Some(ok) => format!("{} {:<24} {}", mark(ok), "key load", if ok { "accepted" } else { "rejected" }),
                None => format!("{} {:<24} {}", "·".dimmed(), "key load", "not reached".dimmed()),
            });

            let state = format!("{:?}", result.state);
            lines.push(format!(
                "   {:<24} {}",
                "state",
                if result.is_success() { state.bright_green() } else { state.yellow() }
            ));
            lines.join("\n")
        }
    }
}

pub fn render_schedule(schedule: &KeySchedule, format: StatusFormat) -> String {
    match format {
        StatusFormat::Json => serde_json::to_string_pretty(schedule)
            .unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e)),
        StatusFormat::Compact => format!(
            "{}/{} {}/{}",
            schedule.current_from.week, schedule.current_from.tow, schedule.next_from.week, schedule.next_from.tow
        ),
        StatusFormat::Table => format!(
            "{}\n   {:<8} {}\n   {:<8} {}",
            "🔑 Correction keys".bold(),
            "current",
            schedule.current_from.to_string().bright_cyan(),
            "next",
            schedule.next_from.to_string().bright_cyan()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::GpsTime;
    use crate::pipeline::PipelineState;

    #[test]
    fn test_compact_result() {
        colored::control::set_override(false);
        let result = PipelineResult {
            state: PipelineState::Ready,
            keys_loaded: Some(false),
            ..PipelineResult::default()
        };
        assert_eq!(render_result(&result, StatusFormat::Compact), "Ready DEGRADED (key load failed)");
    }

    #[test]
    fn test_json_schedule() {
        let schedule = KeySchedule {
            current_from: GpsTime::new(2224, 518_400),
            next_from: GpsTime::new(2228, 518_400),
        };
        let json: serde_json::Value =
            serde_json::from_str(&render_schedule(&schedule, StatusFormat::Json)).unwrap();
        assert_eq!(json["next_from"]["week"], 2228);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(StatusFormat::parse("json"), Some(StatusFormat::Json));
        assert_eq!(StatusFormat::parse("xml"), None);
    }
}
