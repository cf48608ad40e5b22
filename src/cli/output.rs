// Output formatting and display for CLI

use crate::control::HealthReport;
use crate::ipc::ResponseData;
use crate::logs::SearchMatch;
use crate::service::{HealthStatus, ServiceInfo, ServiceState};
use colored::*;
use std::path::Path;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print a success response to stdout
pub fn print_response(data: &ResponseData) {
    match data {
        ResponseData::ServiceList(services) => {
            if services.is_empty() {
                println!("{}", "No services are configured".yellow());
            } else {
                print_service_table(services);
            }
        }

        ResponseData::Service(service) => print_service_detail(service, None),

        ResponseData::Health(report) => print_health_report(report),

        ResponseData::Logs(lines) => print_logs(lines),

        ResponseData::Matches(matches) => print_matches(matches),

        ResponseData::Done { name, action } => {
            println!(
                "{} {} requested for {}",
                "✓".green().bold(),
                action.to_string().bold(),
                name.cyan()
            );
        }
    }
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

pub fn print_watch_header(socket: &Path) {
    println!(
        "{} {}",
        "devhub".bold(),
        format!("({})", socket.display()).dimmed()
    );
}

/// Print a formatted table of services
pub fn print_service_table(services: &[ServiceInfo]) {
    #[derive(Tabled)]
    struct ServiceRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "Health")]
        health: String,
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Port")]
        port: String,
        #[tabled(rename = "CPU")]
        cpu: String,
        #[tabled(rename = "Memory")]
        memory: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Error")]
        error: String,
    }

    let rows: Vec<ServiceRow> = services
        .iter()
        .map(|s| ServiceRow {
            name: truncate(&s.name, 20),
            state: format_state_colored(s.state),
            health: format_health_colored(s.health),
            pid: or_dash(s.pid),
            port: or_dash(s.port),
            cpu: format!("{:.1}%", s.cpu_percent),
            memory: format_memory_mb(s.memory_mb),
            uptime: format_uptime(s),
            error: s
                .error_msg
                .as_deref()
                .map(|e| truncate(e, 40))
                .unwrap_or_default(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} service(s)", services.len())
            .dimmed()
            .italic()
    );
}

fn print_health_report(report: &HealthReport) {
    let uptime = report
        .uptime_secs
        .map(|secs| format_duration(&Duration::from_secs(secs.max(0) as u64)));
    print_service_detail(&report.service, uptime);
}

/// Print detailed status view for a single service
fn print_service_detail(service: &ServiceInfo, uptime: Option<String>) {
    println!("\n{}", "Service Details".bold().underline());
    println!();
    println!("  {:<15} {}", "Name:".bold(), service.name.cyan());
    println!(
        "  {:<15} {}",
        "State:".bold(),
        format_state_colored(service.state)
    );
    println!(
        "  {:<15} {}",
        "Health:".bold(),
        format_health_colored(service.health)
    );

    if let Some(port) = service.port {
        println!("  {:<15} {}", "Port:".bold(), port);
    }

    if let Some(pid) = service.pid {
        println!("  {:<15} {}", "PID:".bold(), pid);
    }

    if let Some(started_at) = service.started_at {
        println!(
            "  {:<15} {}",
            "Started:".bold(),
            started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    let uptime = uptime.unwrap_or_else(|| format_uptime(service));
    println!("  {:<15} {}", "Uptime:".bold(), uptime);
    println!("  {:<15} {:.1}%", "CPU Usage:".bold(), service.cpu_percent);
    println!(
        "  {:<15} {}",
        "Memory:".bold(),
        format_memory_mb(service.memory_mb)
    );
    println!("  {:<15} {}", "Kill Scope:".bold(), service.kill_scope);

    if let Some(ref error) = service.error_msg {
        println!("  {:<15} {}", "Error:".bold(), error.red());
    }

    println!();
}

fn print_logs(lines: &[String]) {
    if lines.is_empty() {
        println!("{}", "No logs available".yellow());
        return;
    }

    for line in lines {
        println!("{}", line);
    }
}

fn print_matches(matches: &[SearchMatch]) {
    if matches.is_empty() {
        println!("{}", "No matches".yellow());
        return;
    }

    for (i, found) in matches.iter().enumerate() {
        if i > 0 {
            println!("{}", "--".dimmed());
        }
        for (idx, entry) in found.lines.iter().enumerate() {
            let seq = format!("{:>6}", entry.seq).dimmed();
            if idx == found.match_index {
                println!("{} {}", seq, entry.line.bold());
            } else {
                println!("{} {}", seq, entry.line);
            }
        }
    }

    println!(
        "\n{}",
        format!("{} match(es)", matches.len()).dimmed().italic()
    );
}

/// Format a service state with color coding
fn format_state_colored(state: ServiceState) -> String {
    match state {
        ServiceState::Running => state.to_string().green().to_string(),
        ServiceState::Starting => state.to_string().yellow().to_string(),
        ServiceState::Stopping => state.to_string().yellow().to_string(),
        ServiceState::Stopped => state.to_string().bright_black().to_string(),
        ServiceState::Crashed => state.to_string().red().bold().to_string(),
    }
}

fn format_health_colored(health: HealthStatus) -> String {
    match health {
        HealthStatus::Healthy => health.to_string().green().to_string(),
        HealthStatus::Unhealthy => health.to_string().red().to_string(),
        HealthStatus::Unknown => health.to_string().bright_black().to_string(),
    }
}

fn format_uptime(service: &ServiceInfo) -> String {
    match service.uptime() {
        Some(uptime) => format_duration(&Duration::from_secs(uptime.num_seconds().max(0) as u64)),
        None => "-".to_string(),
    }
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
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

/// Format memory given in megabytes
fn format_memory_mb(mb: f64) -> String {
    if mb <= 0.0 {
        "-".to_string()
    } else if mb < 1.0 {
        format!("{:.1}KB", mb * 1024.0)
    } else if mb < 1024.0 {
        format!("{:.1}MB", mb)
    } else {
        format!("{:.2}GB", mb / 1024.0)
    }
}

/// Truncate a string to at most `max_len` characters
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
    fn test_format_memory_mb() {
        assert_eq!(format_memory_mb(0.0), "-");
        assert_eq!(format_memory_mb(0.5), "512.0KB");
        assert_eq!(format_memory_mb(12.34), "12.3MB");
        assert_eq!(format_memory_mb(3072.0), "3.00GB");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a very long string", 10), "this is...");
        assert_eq!(truncate("überlange zeile", 8), "überl...");
    }

    #[test]
    fn test_or_dash() {
        assert_eq!(or_dash(Some(3000u16)), "3000");
        assert_eq!(or_dash::<u32>(None), "-");
    }
}
