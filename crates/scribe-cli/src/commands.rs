//! Command handlers, one per subcommand.

use std::path::Path;

use anyhow::Context;
use scribe_io::{FileSystem, StreamEvent};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::OutputFormat;
use crate::error::{CliError, CliResult};
use crate::output;

pub(crate) async fn cat(fs: &FileSystem, path: &Path, format: OutputFormat) -> CliResult<()> {
    let loaded = fs.load(path).await?;
    info!(
        path = %path.display(),
        encoding = loaded.encoding.name(),
        lossy = loaded.lossy,
        size = loaded.size,
        "file loaded"
    );
    output::render_loaded(path, &loaded, format)
}

pub(crate) async fn stream(fs: &FileSystem, path: &Path, format: OutputFormat) -> CliResult<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    fs.stream_load(path, move |event| {
        let _ = tx.send(event);
    });
    while let Some(event) = rx.recv().await {
        let event = event?;
        output::render_stream_event(&event, format)?;
        if event.is_finished() {
            break;
        }
        if let StreamEvent::Restarted { encoding, .. } = &event {
            debug!(path = %path.display(), %encoding, "stream restarted");
        }
    }
    Ok(())
}

pub(crate) async fn save(
    fs: &FileSystem,
    path: &Path,
    input: Option<&Path>,
    format: OutputFormat,
) -> CliResult<()> {
    let content = read_input(input).await?;
    let outcome = fs.save(path, content).await?;
    output::render_saved(path, &outcome, format)
}

async fn read_input(input: Option<&Path>) -> CliResult<String> {
    match input {
        Some(input) => tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("failed to read {}", input.display()))
            .map_err(CliError::failure),
        None => {
            let mut content = String::new();
            tokio::io::stdin()
                .read_to_string(&mut content)
                .await
                .context("failed to read standard input")
                .map_err(CliError::failure)?;
            Ok(content)
        }
    }
}

pub(crate) async fn touch(fs: &FileSystem, path: &Path, format: OutputFormat) -> CliResult<()> {
    fs.create_empty(path).await?;
    output::render_created(path, format)
}

pub(crate) async fn new_note(
    fs: &FileSystem,
    folder: &Path,
    name: &str,
    format: OutputFormat,
) -> CliResult<()> {
    let path = fs.create_note(folder, name).await?;
    output::render_created(&path, format)
}

pub(crate) fn size(fs: &FileSystem, path: &Path, format: OutputFormat) -> CliResult<()> {
    let size = fs.file_size(path);
    let strategy = fs.strategy_for(path);
    output::render_size(path, size, strategy, format)?;
    if size.is_none() {
        return Err(CliError::validation(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    Ok(())
}

pub(crate) fn show_config(fs: &FileSystem, format: OutputFormat) -> CliResult<()> {
    output::render_config(fs.config(), format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_config::EngineConfig;
    use scribe_events::EventBus;
    use scribe_telemetry::Metrics;
    use scribe_test_support::fixtures::{scratch_dir, write_fixture};

    fn engine() -> anyhow::Result<FileSystem> {
        Ok(FileSystem::start(
            EngineConfig::default(),
            EventBus::new(),
            Metrics::new()?,
        )?)
    }

    #[tokio::test]
    async fn save_reads_content_from_input_file() -> anyhow::Result<()> {
        let dir = scratch_dir()?;
        let input = write_fixture(dir.path(), "draft.txt", "from draft")?;
        let target = dir.path().join("out").join("note.txt");
        let fs = engine()?;

        save(&fs, &target, Some(&input), OutputFormat::Json)
            .await
            .map_err(|err| anyhow::anyhow!(err.display_message()))?;
        assert_eq!(fs.load(&target).await?.text, "from draft");
        fs.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn touch_twice_reports_already_exists() -> anyhow::Result<()> {
        let dir = scratch_dir()?;
        let target = dir.path().join("empty.txt");
        let fs = engine()?;

        assert!(touch(&fs, &target, OutputFormat::Json).await.is_ok());
        let err = touch(&fs, &target, OutputFormat::Json)
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("second touch succeeded"))?;
        assert_eq!(err.exit_code(), 5);
        fs.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn size_of_missing_file_is_a_validation_error() -> anyhow::Result<()> {
        let dir = scratch_dir()?;
        let fs = engine()?;
        let err = size(&fs, &dir.path().join("none.txt"), OutputFormat::Table)
            .err()
            .ok_or_else(|| anyhow::anyhow!("size of missing file succeeded"))?;
        assert_eq!(err.exit_code(), 2);
        fs.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn new_note_rejects_reserved_names() -> anyhow::Result<()> {
        let dir = scratch_dir()?;
        let fs = engine()?;
        let err = new_note(&fs, dir.path(), "aux", OutputFormat::Table)
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("reserved name accepted"))?;
        assert_eq!(err.exit_code(), 2);
        fs.shutdown().await;
        Ok(())
    }
}
