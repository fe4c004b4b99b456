//! 서버/클라이언트 공통 CLI 옵션

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use rdt::{Config, Digest, DuplicatePolicy};

/// 설정 프리셋
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Preset {
    Default,
    Unstable,
    LowLatency,
}

/// 프로토콜 설정 옵션
///
/// 적용 순서: 프리셋 → `--config` 파일 → 개별 플래그
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// JSON 설정 파일 (누락 필드는 기본값)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 설정 프리셋
    #[arg(long, value_enum, default_value_t = Preset::Default)]
    pub preset: Preset,

    /// MD5 대신 CRC32 다이제스트 사용 (양측 동일해야 함)
    #[arg(long)]
    pub crc32: bool,

    /// 최대 데이터그램 크기 (바이트)
    #[arg(long)]
    pub max_datagram_size: Option<usize>,

    /// 최대 윈도우 크기 (패킷)
    #[arg(long)]
    pub max_window: Option<usize>,

    /// 초기 타임아웃 (밀리초)
    #[arg(long)]
    pub initial_timeout_ms: Option<u64>,

    /// 재시도 횟수
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// 중복 요청 시 해당 클라이언트의 남은 명령도 버림 (서버)
    #[arg(long)]
    pub drop_pending: bool,
}

impl ConfigArgs {
    pub fn build(&self) -> rdt::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => match self.preset {
                Preset::Default => Config::default(),
                Preset::Unstable => Config::unstable_network(),
                Preset::LowLatency => Config::low_latency(),
            },
        };

        if self.crc32 {
            config.digest = Digest::Crc32;
        }
        if let Some(size) = self.max_datagram_size {
            config.max_datagram_size = size;
        }
        if let Some(window) = self.max_window {
            config.max_window = window;
            config.initial_window = config.initial_window.min(window);
        }
        if let Some(ms) = self.initial_timeout_ms {
            config.initial_timeout_ms = ms;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if self.drop_pending {
            config.duplicate_policy = DuplicatePolicy::DropPending;
        }

        config.validate()?;
        Ok(config)
    }
}

/// 로깅 설정 (`RUST_LOG`, 기본 info)
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}
