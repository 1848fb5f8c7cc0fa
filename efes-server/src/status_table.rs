//! Thin text renderer for the cluster status report. The data model and the
//! aggregation rules live in efes-core; this only lays out columns.

use chrono::Utc;
use efes_core::{DeviceStatusRow, StatusReport};

const G: i64 = 1 << 30;

const HEADERS: [&str; 10] = [
    "Host",
    "Status",
    "Device",
    "Status",
    "Size (G)",
    "Used (G)",
    "Free (G)",
    "Use %",
    "IO %",
    "Last update",
];

pub fn render(report: &StatusReport) -> String {
    let now = Utc::now();
    let mut table: Vec<Vec<String>> = Vec::with_capacity(report.rows.len() + 2);
    table.push(HEADERS.iter().map(|h| h.to_string()).collect());

    for row in &report.rows {
        table.push(render_row(row, now));
    }

    let totals = report.totals();
    table.push(vec![
        String::new(),
        String::new(),
        String::new(),
        "Total:".to_string(),
        (totals.bytes_total / G).to_string(),
        (totals.bytes_used / G).to_string(),
        (totals.bytes_free / G).to_string(),
        totals.use_percent.to_string(),
        String::new(),
        String::new(),
    ]);

    layout(&table)
}

fn render_row(row: &DeviceStatusRow, now: chrono::DateTime<Utc>) -> Vec<String> {
    let device = &row.device;
    let age = (now - device.updated_at).num_seconds().max(0);
    vec![
        row.hostname.clone(),
        row.host_status
            .map(|status| status.to_string())
            .unwrap_or_default(),
        device.devid.to_string(),
        device.status.to_string(),
        opt_gb(device.bytes_total),
        opt_gb(device.bytes_used),
        opt_gb(device.bytes_free),
        opt_value(device.usage_percent()),
        opt_value(device.io_utilization),
        format!("{}s", age),
    ]
}

/// Unknown values render blank; they are never shown as zero.
fn opt_gb(bytes: Option<i64>) -> String {
    bytes.map(|b| (b / G).to_string()).unwrap_or_default()
}

fn opt_value(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn layout(table: &[Vec<String>]) -> String {
    let columns = table.first().map(|row| row.len()).unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in table {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut out = String::new();
    for row in table {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:>width$}", cell, width = widths[i]))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}
