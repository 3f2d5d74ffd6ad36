// 命令行上传工具
//
// 读取本地文件 / 远程 URL，通过 UploadQueue 按并发上限上传，结算后打印结果

use anyhow::{bail, Context, Result};
use clap::Parser;
use filebed_rust::config::{AppConfig, LogConfig, DEFAULT_CONFIG_PATH};
use filebed_rust::logging;
use filebed_rust::telegram::mime_from_name;
use filebed_rust::uploader::{
    HttpTransport, QueueOptions, TaskOutcome, UploadDisk, UploadPayload, UploadQueue,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "filebed-upload")]
#[command(about = "Upload files to a filebed gateway or content-addressed store")]
struct Args {
    /// Gateway base URL (overrides upload.gateway_url)
    #[arg(long)]
    gateway: Option<String>,

    /// Storage disk: telegram, ipfs, pinme
    #[arg(long, default_value = "telegram")]
    disk: UploadDisk,

    /// Maximum concurrent uploads
    #[arg(long)]
    concurrency: Option<usize>,

    /// Telegram chat id (defaults to the gateway's configured chat)
    #[arg(long)]
    chat_id: Option<String>,

    /// Remote URL to relay, may be repeated
    #[arg(long = "url")]
    urls: Vec<String>,

    /// Config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Local files to upload
    files: Vec<PathBuf>,
}

async fn read_payloads(files: &[PathBuf], urls: &[String]) -> Result<Vec<UploadPayload>> {
    let mut payloads = Vec::with_capacity(files.len() + urls.len());
    for path in files {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("无法读取文件: {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let mime = mime_from_name(&name).map(str::to_string);
        payloads.push(UploadPayload::bytes(name, mime, data));
    }
    payloads.extend(urls.iter().map(|url| UploadPayload::url(url.clone())));
    Ok(payloads)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 命令行工具只输出到控制台
    let _log_guard = logging::init_logging(&LogConfig {
        enabled: false,
        level: "warn".to_string(),
        ..Default::default()
    });

    if args.files.is_empty() && args.urls.is_empty() {
        bail!("没有需要上传的文件，请指定文件路径或 --url");
    }

    let mut config = AppConfig::load_from_file(&args.config)
        .await
        .unwrap_or_default();
    config.apply_env_overrides(|key| std::env::var(key).ok());
    if let Some(gateway) = args.gateway {
        config.upload.gateway_url = gateway;
    }
    if let Some(concurrency) = args.concurrency {
        config.upload.concurrency = concurrency;
    }
    config.validate()?;

    let payloads = read_payloads(&args.files, &args.urls).await?;
    let transport = Arc::new(HttpTransport::new(&config, args.chat_id)?);
    let queue = UploadQueue::new(
        transport,
        QueueOptions {
            concurrency: config.upload.concurrency,
            disk: args.disk,
            on_uploaded: None,
        },
    );

    info!(
        "开始上传 {} 个任务: disk={}, concurrency={}",
        payloads.len(),
        args.disk,
        config.upload.concurrency
    );
    let report = queue.add_files(payloads).wait().await;

    let tasks = queue.tasks();
    println!("{:<34} {:<10} {:<32} RESULT", "ID", "STATUS", "NAME");
    for (id, outcome) in &report.outcomes {
        let name = tasks
            .iter()
            .find(|t| &t.id == id)
            .map(|t| t.name.as_str())
            .unwrap_or("-");
        let (status, detail) = match outcome {
            TaskOutcome::Done(result) => ("done", result.preview_path()),
            TaskOutcome::Failed(e) => ("error", e.to_string()),
            TaskOutcome::Discarded => ("discarded", String::new()),
        };
        println!("{:<34} {:<10} {:<32} {}", id, status, name, detail);
    }

    let stats = queue.stats();
    println!(
        "\n合计 {}: 成功 {}, 失败 {}, 未完成 {}",
        stats.total, stats.success, stats.error, stats.pending
    );

    if report.failed() > 0 || report.discarded() > 0 {
        std::process::exit(1);
    }
    Ok(())
}
