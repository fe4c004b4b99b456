//! RDT 클라이언트 - 서버 파일 목록 조회 및 다운로드
//!
//! 사용법:
//!   cargo run --release --bin rdt-client -- [OPTIONS] [FILES]...
//!
//! 예시:
//!   # 목록만 출력
//!   cargo run --release --bin rdt-client -- --server 127.0.0.1:12345
//!
//!   # 파일 두 개를 4개 범위로 병렬 다운로드
//!   cargo run --release --bin rdt-client -- -s 127.0.0.1:12345 -j 4 a.bin b.bin

mod common;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use rdt::{Client, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "rdt-client", about = "UDP 신뢰 전송 파일 클라이언트")]
struct Args {
    /// 서버 주소
    #[arg(short, long, default_value = "127.0.0.1:12345")]
    server: SocketAddr,

    /// 받을 파일 이름 (없으면 목록만 출력)
    files: Vec<String>,

    /// 목록의 모든 파일 다운로드
    #[arg(long)]
    all: bool,

    /// 저장 폴더
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 파일당 병렬 범위 수
    #[arg(short = 'j', long)]
    parallel: Option<usize>,

    /// 서버에 등록할 이름
    #[arg(long)]
    handle: Option<String>,

    #[command(flatten)]
    protocol: common::ConfigArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    common::init_tracing();
    let args = Args::parse();

    let mut config = args.protocol.build()?;
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(parallel) = args.parallel {
        config.parallel_chunks = parallel;
    }
    config.validate()?;

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            signal.trigger();
        }
    });

    info!("Connecting to {}...", args.server);
    let mut client = Client::connect(args.server, config, shutdown.clone()).await?;

    if let Some(handle) = &args.handle {
        client.register(Some(handle)).await?;
        info!("Registered as {}", handle);
    }

    let listing = client.file_list().await?;
    info!("Available files ({}):", listing.len());
    for name in &listing {
        info!("  {}", name);
    }

    let targets = if args.all { listing } else { args.files };
    for name in &targets {
        if shutdown.is_triggered() {
            break;
        }
        match client.fetch(name).await {
            Ok(path) => info!("Downloaded {} -> {}", name, path.display()),
            Err(e) => warn!("Download failed: {}: {}", name, e),
        }
    }

    info!("Client stats: {}", client.stats().summary());

    if let Err(e) = client.exit().await {
        warn!("EXIT not acknowledged: {}", e);
    }

    Ok(())
}
