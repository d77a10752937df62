use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use linkprims_frame::BinaryMessage;
use linkprims_link::{LinkStats, LinkStatus};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct TextOutput<'a> {
    kind: &'static str,
    target: &'a str,
    size: usize,
    text: String,
    timestamp: String,
}

#[derive(Serialize)]
struct ValuesOutput<'a> {
    kind: &'static str,
    target: &'a str,
    header: u16,
    values: &'a [f32],
    timestamp: String,
}

#[derive(Serialize)]
struct StatsOutput<'a> {
    kind: &'static str,
    target: &'a str,
    status: &'a LinkStatus,
    stats: &'a LinkStats,
}

/// Print one received text message.
pub fn print_text(message: &Bytes, target: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = TextOutput {
                kind: "text",
                target,
                size: message.len(),
                text: payload_preview(message),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FROM", "SIZE", "TEXT"])
                .add_row(vec![
                    target.to_string(),
                    message.len().to_string(),
                    payload_preview(message),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{}", payload_preview(message));
        }
        OutputFormat::Raw => {
            let mut line = message.to_vec();
            line.push(b'\n');
            print_raw(&line);
        }
    }
}

/// Print one received binary message.
pub fn print_values(message: &BinaryMessage, target: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ValuesOutput {
                kind: "values",
                target,
                header: message.header(),
                values: message.floats(),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut header = vec!["HEADER".to_string()];
            header.extend((0..message.floats().len()).map(|i| format!("V{i}")));
            let mut row = vec![message.header().to_string()];
            row.extend(message.floats().iter().map(|v| v.to_string()));

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(header)
                .add_row(row);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{}", values_line(message));
        }
        OutputFormat::Raw => {
            let mut wire = BytesMut::with_capacity(message.wire_size());
            message.encode(&mut wire);
            print_raw(&wire);
        }
    }
}

/// Print the final status and counters of a link.
pub fn print_stats(status: &LinkStatus, stats: &LinkStats, target: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = StatsOutput {
                kind: "stats",
                target,
                status,
                stats,
            };
            print_json(&out);
        }
        OutputFormat::Table | OutputFormat::Pretty | OutputFormat::Raw => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COUNTER", "VALUE"]);
            for (name, value) in stats_rows(stats) {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            eprintln!("{target} ({:?})", status.phase);
            eprintln!("{table}");
        }
    }
}

/// `header : v0 , v1 , ...` as the serial test firmware prints it.
pub fn values_line(message: &BinaryMessage) -> String {
    let mut line = format!("{} :", message.header());
    for value in message.floats() {
        line.push_str(&format!(" {value} ,"));
    }
    line
}

fn stats_rows(stats: &LinkStats) -> [(&'static str, u64); 9] {
    [
        ("frames_in", stats.frames_in),
        ("frames_out", stats.frames_out),
        ("heartbeats_in", stats.heartbeats_in),
        ("heartbeats_out", stats.heartbeats_out),
        ("corrupt_frames", stats.corrupt_frames),
        ("resyncs", stats.resyncs),
        ("connects", stats.connects),
        ("connect_failures", stats.connect_failures),
        ("disconnects", stats.disconnects),
    ]
}

fn print_json(value: &impl Serialize) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
    let _ = std::io::stdout().flush();
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
