//! Command execution. Every command yields a JSON value for stdout.

use serde_json::{json, Value};
use tracing::info;
use trellis_core::Record;
use trellis_storage::{RecordCache, RefreshReport};

use crate::args::Command;
use crate::error::CliError;

pub async fn run(command: &Command, cache: &RecordCache) -> Result<Value, CliError> {
    match command {
        Command::Refresh => {
            let report = cache.refresh_detailed().await?;
            Ok(report_json(&report)?)
        }
        Command::Clear => {
            cache.clear_all().await?;
            info!("Cache cleared");
            Ok(json!({ "cleared": true }))
        }
        Command::Show { table } => {
            let records = cache
                .read_table(table)
                .ok_or_else(|| CliError::NotCached {
                    table: table.clone(),
                })?;
            Ok(records_json(&records))
        }
        Command::Get { table } => {
            let records = cache.get(table).await?;
            Ok(records_json(&records))
        }
        Command::Lookup { path } => {
            cache.ensure_warm().await?;
            cache
                .lookup(path)?
                .ok_or_else(|| CliError::NoValue(path.clone()))
        }
        Command::Record { table, id } => {
            let record = cache.resolved_record(table, id).await?.ok_or_else(|| {
                CliError::RecordNotFound {
                    table: table.clone(),
                    id: id.clone(),
                }
            })?;
            Ok(record.to_json())
        }
        Command::Stats => Ok(json!({
            "anchor_table": cache.config().anchor_table,
            "tables": cache.tables(),
            "restore": serde_json::to_value(cache.restore_outcome())?,
            "fetch": serde_json::to_value(cache.fetch_stats())?,
            "persist_failures": cache.persist_failures(),
        })),
    }
}

fn records_json(records: &[Record]) -> Value {
    Value::Array(records.iter().map(Record::to_json).collect())
}

fn report_json(report: &RefreshReport) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(report)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("records".to_string(), records_json(&report.records));
    }
    Ok(value)
}
