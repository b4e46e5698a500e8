use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use rcm_packet::Packet;
use serde::Serialize;

use crate::builtins::decode_int;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One reply as shown to the user.
#[derive(Debug, Serialize)]
pub struct ReplyRow {
    pub msg_id: u16,
    pub kind: &'static str,
    pub status: &'static str,
    pub pool_id: u16,
    pub job_id: u16,
    pub result: i32,
    pub payload: String,
}

impl ReplyRow {
    pub fn from_packet(packet: &Packet) -> Self {
        Self {
            msg_id: packet.msg_id,
            kind: packet.kind.name(),
            status: packet.status.name(),
            pool_id: packet.pool_id,
            job_id: packet.job_id,
            result: packet.result,
            payload: payload_preview(&packet.payload),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SymbolRow {
    pub name: String,
    pub index: String,
}

pub fn print_replies(rows: &[ReplyRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for row in rows {
                println!(
                    "{}",
                    serde_json::to_string(row).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "MSG", "KIND", "STATUS", "POOL", "JOB", "RESULT", "PAYLOAD",
                ]);
            for row in rows {
                table.add_row(vec![
                    row.msg_id.to_string(),
                    row.kind.to_string(),
                    row.status.to_string(),
                    format!("{:#06x}", row.pool_id),
                    row.job_id.to_string(),
                    row.result.to_string(),
                    row.payload.clone(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                println!(
                    "msg={} kind={} status={} pool={:#06x} job={} result={} payload={}",
                    row.msg_id,
                    row.kind,
                    row.status,
                    row.pool_id,
                    row.job_id,
                    row.result,
                    row.payload
                );
            }
        }
    }
}

pub fn print_symbols(rows: &[SymbolRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SYMBOL", "INDEX"]);
            for row in rows {
                table.add_row(vec![row.name.clone(), row.index.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for row in rows {
                println!("{} {}", row.index, row.name);
            }
        }
    }
}

/// Integers for 4-byte payloads, text when printable, otherwise a size.
fn payload_preview(payload: &[u8]) -> String {
    if payload.len() == 4 {
        if let Some(value) = decode_int(payload) {
            return value.to_string();
        }
    }
    match std::str::from_utf8(payload) {
        Ok(text) if !text.chars().any(char::is_control) => text.to_string(),
        _ => format!("<binary {} bytes>", payload.len()),
    }
}
