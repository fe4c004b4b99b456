//! 에러 타입 정의

use std::fmt;
use std::io;

use thiserror::Error;

/// 전송 실패 원인 (사용자에게 노출)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// 재시도 횟수 소진
    Timeout,
    /// 소켓 종료, 주소 불가 등 복구 불가능한 전송 계층 문제
    Transport,
    /// 종료 요청으로 중단
    Cancelled,
    /// 상대가 예상 밖의 응답을 보냄
    Protocol,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Transport => "transport",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Protocol => "protocol",
        };
        f.write_str(s)
    }
}

/// RDT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] io::Error),

    #[error("설정 파싱 에러: {0}")]
    Json(#[from] serde_json::Error),

    #[error("손상된 패킷: {reason}")]
    CorruptPacket { reason: &'static str },

    #[error("페이로드 초과: {len} bytes (최대 {max} bytes)")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("응답 없음: {attempts}회 시도")]
    Timeout { attempts: u32 },

    #[error("주소에 도달할 수 없음: {0}")]
    AddressUnreachable(io::Error),

    #[error("전송 계층 종료")]
    TransportClosed,

    #[error("종료 요청으로 중단")]
    Cancelled,

    #[error("부분 전송: {acknowledged}/{total} 패킷 확인")]
    PartialTransfer {
        acknowledged: usize,
        total: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("전송 실패: {name} ({reason})")]
    TransferFailed { name: String, reason: FailureReason },

    #[error("프로토콜 에러: {0}")]
    Protocol(String),

    #[error("파일 없음: {0}")]
    FileNotFound(String),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// 소켓 에러를 분류
    ///
    /// 도달 불가 계열은 [`Error::AddressUnreachable`], 나머지는 [`Error::Io`].
    pub fn from_socket(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::InvalidInput => Error::AddressUnreachable(err),
            io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe => Error::TransportClosed,
            _ => Error::Io(err),
        }
    }

    /// 재시도가 무의미한 에러 여부
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Timeout { .. } | Error::CorruptPacket { .. } => false,
            Error::PartialTransfer { source, .. } => source.is_fatal(),
            _ => true,
        }
    }

    /// 오케스트레이터가 사용자에게 보고할 실패 원인
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Error::Timeout { .. } => FailureReason::Timeout,
            Error::Cancelled => FailureReason::Cancelled,
            Error::Protocol(_) | Error::FileNotFound(_) => FailureReason::Protocol,
            Error::PartialTransfer { source, .. } => source.failure_reason(),
            Error::TransferFailed { reason, .. } => *reason,
            _ => FailureReason::Transport,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
