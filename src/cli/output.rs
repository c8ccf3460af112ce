// Output formatting and display for CLI

use crate::config::{Frequency, GlobalSettings, RestartSchedule};
use crate::events::SupervisorEvent;
use crate::process::{EffectivePolicy, ProcessRecord, ProcessStatus, ScheduledRestart};
use crate::schedule::weekday;
use chrono::{DateTime, Local};
use colored::*;
use std::time::{Duration, SystemTime};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a formatted table of processes
pub fn print_process_table(processes: &[ProcessRecord], settings: &GlobalSettings) {
    if processes.is_empty() {
        println!("{}", "No processes are configured".yellow());
        return;
    }

    #[derive(Tabled)]
    struct ProcessRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Executable")]
        executable: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Auto")]
        auto_restart: String,
        #[tabled(rename = "Check")]
        check: String,
        #[tabled(rename = "Schedule")]
        schedule: String,
        #[tabled(rename = "Last Restart")]
        last_restart: String,
    }

    let rows: Vec<ProcessRow> = processes
        .iter()
        .map(|p| {
            let policy = EffectivePolicy::resolve(p, settings);
            ProcessRow {
                name: truncate(&p.name, 20),
                executable: truncate(&p.executable_path.display().to_string(), 32),
                status: format_status_colored(p.status()),
                pid: p
                    .pid
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                restarts: format!("{}/{}", p.restart_count, policy.max_restarts),
                auto_restart: format_flag(p.auto_restart_enabled),
                check: format!("{}s", policy.check_interval_secs),
                schedule: format_scheduled_restart(&p.scheduled_restart),
                last_restart: p
                    .last_restart_at
                    .map(format_time)
                    .unwrap_or_else(|| "-".to_string()),
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} process(es)", processes.len())
            .dimmed()
            .italic()
    );
}

/// Print the global settings
pub fn print_settings(settings: &GlobalSettings) {
    println!("\n{}", "Settings".bold().underline());
    println!();
    println!(
        "  {:<22} {}s",
        "Check interval:".bold(),
        settings.check_interval_secs
    );
    println!(
        "  {:<22} {}s",
        "Restart delay:".bold(),
        settings.restart_delay_secs
    );
    println!("  {:<22} {}s", "Boot delay:".bold(), settings.boot_delay_secs);
    println!("  {:<22} {}", "Max restarts:".bold(), settings.max_restarts);
    println!(
        "  {:<22} {}",
        "Hang detection:".bold(),
        format_flag(settings.check_for_hanging_process)
    );
    println!(
        "  {:<22} {}",
        "Auto start:".bold(),
        format_flag(settings.auto_start_on_launch)
    );

    let host = if settings.enable_system_restart {
        format_schedule(&settings.system_restart)
    } else {
        "disabled".bright_black().to_string()
    };
    println!("  {:<22} {}", "System restart:".bold(), host);
    println!();
}

/// Print an engine event while running in the foreground
pub fn print_event(event: &SupervisorEvent) {
    let now = Local::now();
    let stamp = format!("[{}]", now.format("%H:%M:%S")).dimmed();

    match event {
        SupervisorEvent::StatusChanged { name, status } => {
            println!("{} {} is {}", stamp, name.cyan(), format_status_colored(*status));
        }
        SupervisorEvent::Restarted { name, pid } => {
            println!(
                "{} {} {} (PID: {})",
                stamp,
                "↻".yellow().bold(),
                name.cyan(),
                pid
            );
        }
        SupervisorEvent::ScheduledRestartCompleted { name, pid } => {
            println!(
                "{} {} {} scheduled restart done (PID: {})",
                stamp,
                "⏰".bold(),
                name.cyan(),
                pid
            );
        }
        // Already written by the tracing subscriber
        SupervisorEvent::LogMessage { .. } => {}
    }
}

/// Format a process status with color coding
fn format_status_colored(status: ProcessStatus) -> String {
    match status {
        ProcessStatus::Running => status.to_string().green().to_string(),
        ProcessStatus::Stopped => status.to_string().red().to_string(),
    }
}

fn format_flag(enabled: bool) -> String {
    if enabled {
        "✓".green().to_string()
    } else {
        "✗".red().to_string()
    }
}

/// Short form of a schedule, e.g. `Daily 23:30` or `Weekly Sun 04:00`
fn format_schedule(schedule: &RestartSchedule) -> String {
    match schedule.frequency {
        Frequency::Daily => format!("Daily {:02}:{:02}", schedule.hour, schedule.minute),
        Frequency::Weekly => format!(
            "Weekly {} {:02}:{:02}",
            weekday(schedule.day_of_week)
                .map(|d| d.to_string())
                .unwrap_or_else(|| "?".to_string()),
            schedule.hour,
            schedule.minute
        ),
    }
}

fn format_scheduled_restart(scheduled: &ScheduledRestart) -> String {
    if scheduled.enabled {
        format_schedule(&scheduled.schedule)
    } else {
        "-".to_string()
    }
}

/// Format a timestamp as local time
fn format_time(time: SystemTime) -> String {
    let datetime: DateTime<Local> = time.into();
    let ago = SystemTime::now()
        .duration_since(time)
        .map(|elapsed| format!(" ({} ago)", format_duration(&elapsed)))
        .unwrap_or_default();
    format!("{}{}", datetime.format("%Y-%m-%d %H:%M:%S"), ago)
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else if secs < 86400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    } else {
        let days = secs / 86400;
        let hours = (secs % 86400) / 3600;
        if hours > 0 {
            format!("{}d {}h", days, hours)
        } else {
            format!("{}d", days)
        }
    }
}

/// Truncate a string to a maximum number of characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(&Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(&Duration::from_secs(3700)), "1h 1m");
        assert_eq!(format_duration(&Duration::from_secs(90000)), "1d 1h");
    }

    #[test]
    fn test_format_schedule() {
        assert_eq!(format_schedule(&RestartSchedule::daily(23, 30)), "Daily 23:30");
        assert_eq!(
            format_schedule(&RestartSchedule::weekly(0, 4, 5)),
            "Weekly Sun 04:05"
        );
    }

    #[test]
    fn test_disabled_schedule_is_dash() {
        assert_eq!(format_scheduled_restart(&ScheduledRestart::default()), "-");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a very long string", 10), "this is...");
        assert_eq!(truncate("größenwahnsinnig", 8), "größe...");
    }
}
