//! Network flow records and raw-log parsing.
//!
//! Raw input is a text blob mixing prose and CSV flow records. Record lines
//! start with a numeric timestamp; everything else (headers, preamble) is
//! skipped. Field order:
//! `timestamp,src_ip,dst_ip,src_port,dst_port,protocol,bytes,packets,duration,cell_id,user_hash`

use anyhow::{Context, Result};
use chrono::{TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// One parsed network flow record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: String,
    pub bytes: u64,
    pub packets: u64,
    /// Flow duration in seconds
    pub duration: f64,
    pub cell_id: String,
    pub user_hash: String,
    /// UTC hour of day, derived from the timestamp
    pub hour: u32,
}

impl FlowRecord {
    /// Bytes per second over the flow duration (duration floored to avoid
    /// division by zero on instantaneous flows)
    pub fn byte_rate(&self) -> f64 {
        self.bytes as f64 / self.duration.max(0.001)
    }
}

/// Parse a raw log blob into flow records, skipping non-record lines.
pub fn parse_raw_logs(raw: &str) -> Result<Vec<FlowRecord>> {
    let mut records = Vec::new();

    for (line_no, line) in raw.lines().enumerate() {
        let line = line.trim();
        if !line.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }
        let record = parse_line(line)
            .with_context(|| format!("malformed flow record at line {}", line_no + 1))?;
        records.push(record);
    }

    Ok(records)
}

fn parse_line(line: &str) -> Result<FlowRecord> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 11 {
        anyhow::bail!("expected 11 fields, got {}", fields.len());
    }

    let timestamp: i64 = fields[0].parse().context("timestamp")?;
    let hour = Utc
        .timestamp_opt(timestamp, 0)
        .single()
        .context("timestamp out of range")?
        .hour();

    Ok(FlowRecord {
        timestamp,
        src_ip: fields[1].to_string(),
        dst_ip: fields[2].to_string(),
        src_port: fields[3].parse().context("src_port")?,
        dst_port: fields[4].parse().context("dst_port")?,
        protocol: fields[5].to_string(),
        bytes: fields[6].parse().context("bytes")?,
        packets: fields[7].parse().context("packets")?,
        duration: fields[8].parse().context("duration")?,
        cell_id: fields[9].to_string(),
        user_hash: fields[10].to_string(),
        hour,
    })
}
