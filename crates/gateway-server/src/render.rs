//! Rendering a composite response into the requested `fmt` and assembling
//! the `show`-selected output blocks (§6).

use std::collections::BTreeSet;

use gateway_core::{Record, SubqueryDiagnostics};
use serde_json::{json, Value};

use crate::error::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Csv,
    Tsv,
    Txt,
}

impl Format {
    pub fn parse(ext: &str) -> Option<Format> {
        match ext {
            "json" => Some(Format::Json),
            "csv" => Some(Format::Csv),
            "tsv" => Some(Format::Tsv),
            "txt" => Some(Format::Txt),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Csv => "text/csv",
            Format::Tsv => "text/tab-separated-values",
            Format::Txt => "text/plain",
        }
    }
}

pub struct Blocks<'a> {
    pub records: Vec<&'a Record>,
    pub warnings: Vec<String>,
    pub diagnostics: Option<Vec<SubqueryDiagnostics>>,
    pub urls: Option<Vec<String>>,
}

pub fn render(fmt: Format, blocks: Blocks) -> Result<String, RenderError> {
    match fmt {
        Format::Json => Ok(render_json(blocks)),
        Format::Csv => render_delimited(&blocks.records, b','),
        Format::Tsv => render_delimited(&blocks.records, b'\t'),
        Format::Txt => Ok(render_txt(&blocks)),
    }
}

fn render_json(blocks: Blocks) -> String {
    let mut body = json!({
        "records": blocks.records.iter().map(|r| Value::Object(r.fields.clone())).collect::<Vec<_>>(),
        "warnings": blocks.warnings,
    });
    if let Some(diag) = blocks.diagnostics {
        body["diagnostics"] = json!(diag
            .iter()
            .map(|d| json!({
                "label": d.label,
                "http_status": d.http_status,
                "retry_count": d.retry_count,
                "removed": d.removed,
                "record_count": d.record_count,
            }))
            .collect::<Vec<_>>());
    }
    if let Some(urls) = blocks.urls {
        body["urls"] = json!(urls);
    }
    body.to_string()
}

fn header_columns(records: &[&Record]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut cols = Vec::new();
    for r in records {
        for k in r.fields.keys() {
            if seen.insert(k.clone()) {
                cols.push(k.clone());
            }
        }
    }
    cols
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn render_delimited(records: &[&Record], delimiter: u8) -> Result<String, RenderError> {
    let columns = header_columns(records);
    let mut writer = csv::WriterBuilder::new().delimiter(delimiter).from_writer(Vec::new());
    writer.write_record(&columns)?;
    for r in records {
        let row: Vec<String> = columns.iter().map(|c| cell(r.fields.get(c))).collect();
        writer.write_record(&row)?;
    }
    let bytes = writer.into_inner().map_err(|e| RenderError::Io(e.into_error()))?;
    Ok(String::from_utf8(bytes)?)
}

fn render_txt(blocks: &Blocks) -> String {
    let mut out = String::new();
    for w in &blocks.warnings {
        out.push_str("WARNING: ");
        out.push_str(w);
        out.push('\n');
    }
    if !blocks.warnings.is_empty() {
        out.push('\n');
    }
    for (i, r) in blocks.records.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        for (k, v) in &r.fields {
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&cell(Some(v)));
            out.push('\n');
        }
    }
    out
}
