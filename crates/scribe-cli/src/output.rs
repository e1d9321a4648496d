//! Output renderers for CLI commands.

use std::io::{self, Write};
use std::path::Path;

use anyhow::anyhow;
use scribe_config::EngineConfig;
use scribe_io::{LoadedText, SaveOutcome, StreamEvent, Strategy};
use serde_json::{Value, json};

use crate::cli::OutputFormat;
use crate::error::{CliError, CliResult};

fn print_json(value: &Value) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
    println!("{text}");
    Ok(())
}

fn print_json_line(value: &Value) -> CliResult<()> {
    let text = serde_json::to_string(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
    println!("{text}");
    Ok(())
}

pub(crate) fn render_loaded(path: &Path, loaded: &LoadedText, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(&json!({
            "path": path.display().to_string(),
            "encoding": loaded.encoding.name(),
            "lossy": loaded.lossy,
            "size": loaded.size,
            "text": loaded.text,
        })),
        OutputFormat::Table => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(loaded.text.as_bytes())
                .and_then(|()| stdout.flush())
                .map_err(CliError::failure)
        }
    }
}

pub(crate) fn render_stream_event(event: &StreamEvent, format: OutputFormat) -> CliResult<()> {
    let (current, total) = event.position();
    match format {
        OutputFormat::Json => {
            let value = match event {
                StreamEvent::Chunk { text, .. } => json!({
                    "event": "chunk",
                    "offset": current,
                    "total": total,
                    "chars": text.chars().count(),
                }),
                StreamEvent::Restarted { encoding, .. } => json!({
                    "event": "restarted",
                    "offset": current,
                    "total": total,
                    "encoding": encoding.name(),
                }),
                StreamEvent::Finished {
                    remainder,
                    encoding,
                    lossy,
                } => json!({
                    "event": "finished",
                    "offset": current,
                    "total": total,
                    "chars": remainder.chars().count(),
                    "encoding": encoding.name(),
                    "lossy": lossy,
                }),
            };
            print_json_line(&value)
        }
        OutputFormat::Table => {
            match event {
                StreamEvent::Chunk { text, .. } => {
                    println!("chunk     {current:>12}/{total:<12} {:>8} chars", text.chars().count());
                }
                StreamEvent::Restarted { encoding, .. } => {
                    println!("restarted {current:>12}/{total:<12} as {encoding}");
                }
                StreamEvent::Finished {
                    remainder,
                    encoding,
                    lossy,
                } => {
                    let note = if *lossy { " (lossy)" } else { "" };
                    println!(
                        "finished  {:>8} trailing chars, {encoding}{note}",
                        remainder.chars().count()
                    );
                }
            }
            Ok(())
        }
    }
}

pub(crate) fn render_saved(path: &Path, outcome: &SaveOutcome, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(&json!({
            "path": path.display().to_string(),
            "bytes_written": outcome.bytes_written,
            "chunked": outcome.chunked,
            "backed_up": outcome.backed_up,
        })),
        OutputFormat::Table => {
            println!("saved {} ({} bytes)", path.display(), outcome.bytes_written);
            Ok(())
        }
    }
}

pub(crate) fn render_created(path: &Path, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => print_json(&json!({ "path": path.display().to_string() })),
        OutputFormat::Table => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

pub(crate) fn render_size(
    path: &Path,
    size: Option<u64>,
    strategy: Strategy,
    format: OutputFormat,
) -> CliResult<()> {
    let strategy = strategy_to_str(strategy);
    match format {
        OutputFormat::Json => print_json(&json!({
            "path": path.display().to_string(),
            "size": size,
            "strategy": strategy,
        })),
        OutputFormat::Table => {
            let size = size.map_or_else(|| "-".to_string(), |size| size.to_string());
            println!("{size:>12} {strategy:<9} {}", path.display());
            Ok(())
        }
    }
}

pub(crate) fn render_config(config: &EngineConfig, format: OutputFormat) -> CliResult<()> {
    let value = serde_json::to_value(config)
        .map_err(|err| CliError::failure(anyhow!("failed to serialise configuration: {err}")))?;
    match format {
        OutputFormat::Json => print_json(&value),
        OutputFormat::Table => {
            for (key, value) in flatten("", &value) {
                println!("{key} = {value}");
            }
            Ok(())
        }
    }
}

pub(crate) const fn strategy_to_str(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::Absent => "absent",
        Strategy::Sync => "sync",
        Strategy::Async => "async",
        Strategy::Streaming => "streaming",
    }
}

/// Dotted `key = value` pairs for nested configuration sections.
fn flatten(prefix: &str, value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(map) => map
            .iter()
            .flat_map(|(key, value)| {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&key, value)
            })
            .collect(),
        other => vec![(prefix.to_string(), other.to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_sections_flatten_to_dotted_keys() {
        let value = json!({ "a": 1, "chunks": { "min_bytes": 2 }, "label": "x" });
        let pairs = flatten("", &value);
        assert!(pairs.contains(&("a".to_string(), "1".to_string())));
        assert!(pairs.contains(&("chunks.min_bytes".to_string(), "2".to_string())));
        assert!(pairs.contains(&("label".to_string(), "\"x\"".to_string())));
    }

    #[test]
    fn effective_config_flattens_every_field() -> CliResult<()> {
        let value = serde_json::to_value(EngineConfig::default()).map_err(CliError::failure)?;
        let keys: Vec<String> = flatten("", &value).into_iter().map(|(key, _)| key).collect();
        assert!(keys.iter().any(|key| key == "chunks.max_bytes"));
        assert!(keys.iter().any(|key| key == "legacy_encoding"));
        Ok(())
    }

    #[test]
    fn strategies_have_stable_labels() {
        assert_eq!(strategy_to_str(Strategy::Streaming), "streaming");
        assert_eq!(strategy_to_str(Strategy::Absent), "absent");
    }
}
