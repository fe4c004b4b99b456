//! 프로토콜 설정

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::packet::Digest;
use crate::server::DuplicatePolicy;
use crate::{Error, Result, ACK_LEN, DEFAULT_MAX_DATAGRAM_SIZE, SEQ_LEN};

/// 수신 버퍼 선할당 상한 (윈도우 단위)
const PREALLOC_WINDOWS: usize = 4;

/// RDT 계층 설정
///
/// 타이밍과 윈도우 동작이 모두 여기서 결정되므로 테스트에서는
/// 값을 직접 조정해서 사용한다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 최대 데이터그램 크기 (헤더 포함, 바이트)
    pub max_datagram_size: usize,

    /// 패킷 무결성 다이제스트 종류
    pub digest: Digest,

    /// 초기 재전송 타임아웃 (밀리초)
    pub initial_timeout_ms: u64,

    /// RTT 평활 계수
    pub alpha: f64,

    /// 편차 평활 계수
    pub beta: f64,

    /// 타임아웃 하한 (밀리초)
    pub min_timeout_ms: u64,

    /// 타임아웃 상한 (밀리초)
    pub max_timeout_ms: u64,

    /// 초기 윈도우 크기 (패킷 수)
    pub initial_window: usize,

    /// 최소 윈도우 크기
    pub min_window: usize,

    /// 최대 윈도우 크기
    /// 수신측 재정렬 버퍼 보존 범위도 이 값을 따른다
    pub max_window: usize,

    /// 청크 요청 재시도 횟수 (오케스트레이터)
    pub max_retries: u32,

    /// 패킷당 최대 전송 횟수
    /// None이면 취소될 때까지 무제한 재전송
    pub max_transmissions: Option<u32>,

    /// 수신 대기 중 연속 타임아웃 허용 횟수
    /// None이면 수신자는 무기한 대기
    pub max_idle_polls: Option<u32>,

    /// 소켓 수신 버퍼 크기
    pub recv_buffer_size: usize,

    /// 중복 요청 처리 정책 (서버)
    pub duplicate_policy: DuplicatePolicy,

    /// 파일당 병렬 청크 수 (클라이언트)
    pub parallel_chunks: usize,

    /// 다운로드 저장 디렉터리 (클라이언트)
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            digest: Digest::Md5,
            initial_timeout_ms: 1000,  // 1초
            alpha: 0.125,
            beta: 0.25,
            min_timeout_ms: 1000,
            max_timeout_ms: 10_000,
            initial_window: 4,
            min_window: 1,
            max_window: 32,
            max_retries: 3,
            max_transmissions: Some(10),
            max_idle_polls: Some(10),
            recv_buffer_size: 64 * 1024,
            duplicate_policy: DuplicatePolicy::Ignore,
            parallel_chunks: 1,
            output_dir: PathBuf::from("output"),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// JSON 파일에서 설정 로드 (누락 필드는 기본값)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            max_datagram_size: 1200,
            initial_timeout_ms: 1500,
            min_timeout_ms: 500,
            max_timeout_ms: 15_000,
            initial_window: 2,
            max_window: 16,
            max_retries: 5,
            max_transmissions: Some(20),
            max_idle_polls: Some(20),
            ..Self::default()
        }
    }

    /// 저지연 환경 (LAN, 루프백)
    pub fn low_latency() -> Self {
        Self {
            digest: Digest::Crc32,
            initial_timeout_ms: 200,
            min_timeout_ms: 50,
            max_timeout_ms: 2000,
            initial_window: 8,
            max_window: 64,
            ..Self::default()
        }
    }

    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_timeout_ms)
    }

    pub fn min_timeout(&self) -> Duration {
        Duration::from_millis(self.min_timeout_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }

    /// 패킷 헤더 길이 (다이제스트 + 시퀀스)
    pub fn header_len(&self) -> usize {
        self.digest.hex_len() + SEQ_LEN
    }

    /// 패킷당 최대 페이로드
    pub fn max_payload(&self) -> usize {
        self.max_datagram_size.saturating_sub(self.header_len())
    }

    /// 수신 버퍼 선할당 크기
    ///
    /// 상대가 알려준 길이를 그대로 쓰지 않고 윈도우 몇 개 분량으로 제한한다.
    /// 나머지는 데이터가 도착하면서 늘어난다.
    pub fn capacity_hint(&self, length: u64) -> usize {
        let limit = self
            .max_payload()
            .saturating_mul(self.max_window)
            .saturating_mul(PREALLOC_WINDOWS);
        usize::try_from(length).map_or(limit, |length| length.min(limit))
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::InvalidConfig(msg));

        if self.max_datagram_size <= self.header_len() {
            return fail(format!(
                "max_datagram_size {} must exceed header length {}",
                self.max_datagram_size,
                self.header_len()
            ));
        }
        if self.max_datagram_size < ACK_LEN {
            return fail("max_datagram_size smaller than an ACK".into());
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return fail(format!("alpha {} outside (0, 1]", self.alpha));
        }
        if !(self.beta > 0.0 && self.beta <= 1.0) {
            return fail(format!("beta {} outside (0, 1]", self.beta));
        }
        if self.min_timeout_ms == 0 || self.min_timeout_ms > self.max_timeout_ms {
            return fail(format!(
                "timeout bounds [{}, {}] ms invalid",
                self.min_timeout_ms, self.max_timeout_ms
            ));
        }
        if self.min_window == 0 || self.min_window > self.max_window {
            return fail(format!(
                "window bounds [{}, {}] invalid",
                self.min_window, self.max_window
            ));
        }
        if !(self.min_window..=self.max_window).contains(&self.initial_window) {
            return fail(format!(
                "initial_window {} outside [{}, {}]",
                self.initial_window, self.min_window, self.max_window
            ));
        }
        if self.max_transmissions == Some(0) {
            return fail("max_transmissions must be at least 1".into());
        }
        if self.parallel_chunks == 0 {
            return fail("parallel_chunks must be at least 1".into());
        }
        Ok(())
    }
}
