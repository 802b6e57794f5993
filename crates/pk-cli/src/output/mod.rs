//! Output formatting utilities for the CLI
//!
//! Tables for tunnels and profile services, plus coloured status lines.

use crossterm::style::Color;
use tabled::{settings::Style, Table, Tabled};

use pk_core::config::ServiceSpec;
use pk_core::types::current_time_secs;
use pk_core::TunnelRecord;

/// Format tunnel records as a table
///
/// Returns "No active tunnels" for an empty slice.
pub fn format_tunnels(records: &[TunnelRecord]) -> String {
    if records.is_empty() {
        return "No active tunnels".to_string();
    }

    #[derive(Tabled)]
    struct TunnelRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "NAMESPACE")]
        namespace: String,
        #[tabled(rename = "LOCAL")]
        local: String,
        #[tabled(rename = "REMOTE")]
        remote: u16,
        #[tabled(rename = "TARGET")]
        target: String,
        #[tabled(rename = "PID")]
        pid: u32,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "UPTIME")]
        uptime: String,
    }

    let now = current_time_secs();
    let rows: Vec<TunnelRow> = records
        .iter()
        .map(|r| TunnelRow {
            name: r.name.clone(),
            namespace: r.namespace.clone(),
            local: r.local_port.clone(),
            remote: r.remote_port,
            target: truncate(&r.target, 24),
            pid: r.pid,
            status: r.status.to_string(),
            uptime: match (r.is_active(), r.started_at) {
                (true, started) if started > 0 => format_duration(now.saturating_sub(started)),
                _ => "-".to_string(),
            },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format the services of a profile as a table
pub fn format_services<'a>(services: impl IntoIterator<Item = &'a ServiceSpec>) -> String {
    #[derive(Tabled)]
    struct ServiceRow {
        #[tabled(rename = "SERVICE")]
        name: String,
        #[tabled(rename = "NAMESPACE")]
        namespace: String,
        #[tabled(rename = "PORTS")]
        ports: String,
        #[tabled(rename = "TARGETS")]
        targets: String,
    }

    let rows: Vec<ServiceRow> = services
        .into_iter()
        .map(|s| ServiceRow {
            name: s.name.clone(),
            namespace: s.namespace.clone(),
            ports: join_or_dash(s.ports.iter().map(|p| p.to_string())),
            targets: join_or_dash(s.targets.iter().map(|t| t.name.clone())),
        })
        .collect();

    if rows.is_empty() {
        return "No services".to_string();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

fn join_or_dash(items: impl Iterator<Item = String>) -> String {
    let joined = items.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined
    }
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m {}s", secs / 60, secs % 60),
        3600..=86399 => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
        _ => format!("{}d {}h", secs / 86400, (secs % 86400) / 3600),
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_prefixed(std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    print_prefixed(std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    print_prefixed(std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_prefixed(std::io::stdout(), Color::Cyan, "ℹ ", msg);
}

fn print_prefixed(mut out: impl std::io::Write, color: Color, prefix: &str, msg: &str) {
    use crossterm::style::{Print, ResetColor, SetForegroundColor};

    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(prefix),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pk_core::config::TargetSpec;
    use pk_core::TunnelStatus;

    fn record(name: &str, status: TunnelStatus) -> TunnelRecord {
        TunnelRecord {
            pid: 4242,
            name: name.to_string(),
            namespace: "prod".to_string(),
            local_port: "3307".to_string(),
            remote_port: 3306,
            target: "db-0".to_string(),
            profile: "/tmp/profile.toml".into(),
            status,
            started_at: 0,
        }
    }

    #[test]
    fn test_format_tunnels_empty() {
        assert_eq!(format_tunnels(&[]), "No active tunnels");
    }

    #[test]
    fn test_format_tunnels_rows() {
        let table = format_tunnels(&[
            record("db", TunnelStatus::Active),
            record("cache", TunnelStatus::Stopped),
        ]);
        assert!(table.contains("NAMESPACE"));
        assert!(table.contains("db-0"));
        assert!(table.contains("active"));
        assert!(table.contains("stopped"));
        assert!(table.contains("4242"));
    }

    #[test]
    fn test_format_services() {
        let service = ServiceSpec {
            name: "db".to_string(),
            namespace: "prod".to_string(),
            ports: vec![5432, 9187],
            targets: vec![TargetSpec {
                name: "db-0".to_string(),
                address: "10.0.0.12".to_string(),
            }],
        };
        let table = format_services([&service]);
        assert!(table.contains("5432, 9187"));
        assert!(table.contains("db-0"));
        assert_eq!(format_services(std::iter::empty()), "No services");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(7260), "2h 1m");
        assert_eq!(format_duration(90000), "1d 1h");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-target-name", 10), "a-very-...");
    }
}
