//! RDT 서버 - 폴더의 파일을 UDP 신뢰 전송으로 제공
//!
//! 사용법:
//!   cargo run --release --bin rdt-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 포트로 files/ 제공
//!   cargo run --release --bin rdt-server -- --folder files
//!
//!   # 손실 많은 네트워크용 설정 + CRC32
//!   cargo run --release --bin rdt-server -- -f files --preset unstable --crc32

mod common;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use rdt::Server;

#[derive(Debug, Parser)]
#[command(name = "rdt-server", about = "UDP 신뢰 전송 파일 서버")]
struct Args {
    /// 바인드 주소
    #[arg(short, long, default_value = "0.0.0.0:12345")]
    bind: SocketAddr,

    /// 제공할 파일 폴더
    #[arg(short, long, default_value = "files")]
    folder: PathBuf,

    /// 시작 시 파일 목록을 기록할 경로
    #[arg(long)]
    manifest: Option<PathBuf>,

    #[command(flatten)]
    protocol: common::ConfigArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    common::init_tracing();
    let args = Args::parse();
    let config = args.protocol.build()?;

    info!("RDT Server starting...");
    info!("Folder: {}", args.folder.display());
    info!(
        "Digest: {:?}, max datagram: {} bytes, window: {}..{}",
        config.digest, config.max_datagram_size, config.min_window, config.max_window
    );

    let server = Server::bind(args.bind, &args.folder, config).await?;

    if let Some(path) = &args.manifest {
        let count = server.catalog().write_manifest(path).await?;
        info!("Manifest written: {} ({} files)", path.display(), count);
    }

    info!("Server listening on {}", server.local_addr()?);

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, waiting for workers...");
            shutdown.trigger();
        }
    });

    let stats = server.run().await?;
    info!("Final stats: {}", stats.summary());

    Ok(())
}
