// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use chunkvault::{
    Backend, ChunkLayout, ChunkPlanner, ChunkedObject, FileTransport, HttpTransport, LocalDirStore,
    Manifest, MemoryMetadataStore, RangeRequest, RetryPolicy, StagedSource, UrlTemplateResolver,
    VaultConfig, requires_chunking,
};
use chunkvault_base::readable_size::ReadableSize;
use chunkvault_common_telemetry::{init_global_logging, set_panic_hook};
use chunkvault_error::ErrorExt;
use clap::{ArgGroup, Args, Parser, Subcommand};
use snafu::ResultExt;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{
    EncodeManifestSnafu, InterruptedSnafu, JsonSnafu, ReadFileSnafu, Result, WriteFileSnafu,
};

mod build_info;
mod error;

#[derive(Debug, Parser)]
#[clap(
name = "chunkvault",
about = "Store very large files as bounded chunks and read byte ranges back",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    /// JSON configuration file; defaults apply when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Plan(PlanArgs),
    Put(PutArgs),
    Get(GetArgs),
}

impl Commands {
    /// Whether the command streams payload bytes to stdout.
    const fn writes_stdout(&self) -> bool { matches!(self, Self::Get(args) if args.output.is_none()) }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print how a file of the given size would be chunked.
Examples:

chunkvault plan --size 10GiB
chunkvault plan --size 10000000000 --chunk-size 4.5GB

")]
struct PlanArgs {
    /// File size, plain bytes or with a unit (`10GiB`)
    #[arg(long)]
    size: ReadableSize,

    /// Chunk size; defaults to the configured `max_chunk_size`
    #[arg(long)]
    chunk_size: Option<ReadableSize>,
}

impl PlanArgs {
    fn run(&self, config: &VaultConfig) -> Result<()> {
        for line in self.render(config)? {
            println!("{line}");
        }
        Ok(())
    }

    fn render(&self, config: &VaultConfig) -> Result<Vec<String>> {
        let size = self.size.as_bytes();
        let threshold = config.chunking.chunk_threshold.as_bytes();
        let chunk_size = self
            .chunk_size
            .unwrap_or(config.chunking.max_chunk_size)
            .as_bytes();

        let mut lines = vec![format!(
            "size: {size} bytes, chunk size: {chunk_size} bytes, threshold: {threshold} bytes"
        )];
        if !requires_chunking(size, threshold) {
            lines.push("below threshold: stored as a single object".to_string());
            return Ok(lines);
        }

        let layout = ChunkLayout::new(size, chunk_size)?;
        lines.push(format!("chunks: {}", layout.chunk_count()));
        lines.extend(layout.bounds().map(|b| {
            format!(
                "chunk {:>4}  {:>15}..{:<15}  {} bytes",
                b.index,
                b.start,
                b.end,
                b.len()
            )
        }));
        Ok(lines)
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Store a file in a local object directory and write its manifest.
Ctrl-C stops the upload between chunks.
Examples:

chunkvault put ./disk.img --store ./objects --manifest disk.json

")]
struct PutArgs {
    /// File to store
    file: PathBuf,

    /// Directory holding the stored objects
    #[arg(long)]
    store: PathBuf,

    /// Where to write the JSON manifest
    #[arg(long)]
    manifest: PathBuf,

    /// Logical file name; defaults to the input's file name
    #[arg(long)]
    name: Option<String>,
}

impl PutArgs {
    async fn run(&self, config: &VaultConfig, cancel: &CancellationToken) -> Result<()> {
        let name = self.name.clone().unwrap_or_else(|| {
            self.file
                .file_name()
                .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().into_owned())
        });

        let source = StagedSource::from_path(self.file.clone()).await?;
        let planner = ChunkPlanner::new(
            Arc::new(LocalDirStore::new(&self.store)),
            Arc::new(MemoryMetadataStore::new()),
            config.chunking.clone(),
        )
        .with_progress(Arc::new(|percent| debug!(percent, "upload progress")));
        let uploaded = planner.upload_staged(&name, &source, cancel).await?;

        let chunk_count = uploaded.chunks.len();
        let manifest = Manifest {
            file:   uploaded.file,
            chunks: uploaded.chunks,
        };
        let json = serde_json::to_vec_pretty(&manifest).context(EncodeManifestSnafu)?;
        tokio::fs::write(&self.manifest, json)
            .await
            .context(WriteFileSnafu {
                path: &self.manifest,
            })?;

        info!(
            name,
            size = manifest.file.total_size,
            chunks = chunk_count,
            duration = %uploaded.duration,
            manifest = %self.manifest.display(),
            "file stored"
        );
        println!(
            "stored {name}: {} bytes in {chunk_count} object(s), manifest {}",
            manifest.file.total_size,
            self.manifest.display()
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(group(ArgGroup::new("source").required(true).args(["url_template", "store"])))]
#[command(long_about = r"

Read a byte range of a stored file.
Examples:

chunkvault get --manifest disk.json --url-template 'https://cdn.example.com/o/{ref}' --range bytes=0-1023
chunkvault get --manifest disk.json --store ./objects --output disk.img

")]
struct GetArgs {
    /// Manifest written by `put`
    #[arg(long)]
    manifest: PathBuf,

    /// Location template with a `{ref}` placeholder, fetched over HTTP
    #[arg(long)]
    url_template: Option<String>,

    /// Local object directory to read from instead of HTTP
    #[arg(long)]
    store: Option<PathBuf>,

    /// HTTP style range, e.g. `bytes=0-1023`, `bytes=512-` or `bytes=-100`
    #[arg(long)]
    range: Option<String>,

    /// Output file; stdout when absent
    #[arg(long, short)]
    output: Option<PathBuf>,
}

impl GetArgs {
    async fn run(&self, config: &VaultConfig, cancel: &CancellationToken) -> Result<()> {
        let raw = tokio::fs::read(&self.manifest)
            .await
            .context(ReadFileSnafu {
                path: &self.manifest,
            })?;
        let manifest: Manifest = serde_json::from_slice(&raw).context(JsonSnafu {
            path: &self.manifest,
        })?;
        let total_size = manifest.file.total_size;
        let object = ChunkedObject::new(total_size, manifest.chunks, self.backend(config)?)?;

        // An empty file without a range still produces an empty output
        let request = match &self.range {
            Some(header) => Some(RangeRequest::from_header(header, total_size)?),
            None if total_size == 0 => None,
            None => Some(RangeRequest::to_end(0)),
        };
        let reader = request.map(|r| object.range_read(r)).transpose()?;

        let mut writer: Box<dyn AsyncWrite + Unpin + Send> = match &self.output {
            Some(path) => Box::new(
                tokio::fs::File::create(path)
                    .await
                    .context(WriteFileSnafu { path })?,
            ),
            None => Box::new(tokio::io::stdout()),
        };
        let (Some(request), Some(mut reader)) = (request, reader) else {
            return Ok(());
        };
        let written = tokio::select! {
            written = reader.copy_to(&mut writer) => written?,
            () = cancel.cancelled() => {
                object.close();
                return InterruptedSnafu.fail();
            }
        };
        info!(name = %manifest.file.name, %request, bytes = written, "range delivered");
        Ok(())
    }

    fn backend(&self, config: &VaultConfig) -> Result<Backend> {
        let retry = RetryPolicy::from(&config.retry);
        let backend = match (&self.url_template, &self.store) {
            (Some(template), _) => Backend::new(
                Arc::new(UrlTemplateResolver::new(template.clone())?),
                Arc::new(HttpTransport::new(&config.transport)?),
                retry,
            ),
            (None, Some(dir)) => Backend::new(
                Arc::new(LocalDirStore::new(dir)),
                Arc::new(FileTransport),
                retry,
            ),
            (None, None) => {
                return Err(chunkvault::Error::Configuration {
                    message: "either --url-template or --store is required".to_string(),
                }
                .into());
            }
        };
        Ok(backend)
    }
}

fn load_config(path: Option<&Path>) -> Result<VaultConfig> {
    let Some(path) = path else {
        return Ok(VaultConfig::default());
    };
    let raw = std::fs::read(path).context(ReadFileSnafu { path })?;
    let config: VaultConfig = serde_json::from_slice(&raw).context(JsonSnafu { path })?;
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let mut logging = config.logging.clone();
    if cli.commands.writes_stdout() {
        logging.append_stdout = false;
    }
    let _guards = init_global_logging("chunkvault", &logging);
    set_panic_hook();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let result = match &cli.commands {
        Commands::Plan(args) => args.run(&config),
        Commands::Put(args) => args.run(&config, &cancel).await,
        Commands::Get(args) => args.run(&config, &cancel).await,
    };
    if let Err(err) = &result {
        error!(error = %err, status = %err.status_code(), "command failed");
    }
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err.output_msg());
            ExitCode::from(u8::try_from(err.status_code().exit_code()).unwrap_or(1))
        }
    }
}
