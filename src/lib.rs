//! # RDT (Reliable Data Transfer over UDP)
//!
//! UDP 위의 신뢰 전송 계층과 청크 단위 파일 전송
//!
//! ## 핵심 특징
//! - **무결성 검증**: 패킷마다 `seq || payload` 다이제스트 (MD5 또는 CRC32)
//! - **ACK/NAK**: 4바이트 누적 ACK, 검증 실패 시 NAK
//! - **적응형 타임아웃**: 평활 RTT + 4·편차, [min, max]로 제한
//! - **슬라이딩 윈도우**: 손실 시 절반, 안정 시 1씩 증가
//! - **재정렬**: 앞서 도착한 패킷 보관 후 순서대로 전달
//! - **병렬 청크**: 파일을 범위로 나눠 워커별 소켓으로 동시 전송

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod packet;
pub mod receiver;
pub mod reorder;
pub mod rtt;
pub mod sender;
pub mod server;
pub mod session;
pub mod stats;
pub mod window;

pub use catalog::Catalog;
pub use client::Client;
pub use config::Config;
pub use error::{Error, FailureReason, Result};
pub use message::{Command, Reply};
pub use packet::{AckFrame, Digest, Packet, PacketCodec};
pub use receiver::SlidingWindowReceiver;
pub use reorder::ReorderBuffer;
pub use rtt::RttEstimator;
pub use sender::{SendSummary, SlidingWindowSender};
pub use server::{ActiveRequests, DuplicatePolicy, RequestGuard, RequestId, Server};
pub use session::{Received, Session, Shutdown};
pub use stats::TransferStats;
pub use window::AdaptiveWindow;

/// 시퀀스 번호 필드 길이
pub const SEQ_LEN: usize = 4;

/// ACK/NAK 데이터그램 길이
pub const ACK_LEN: usize = 4;

/// NAK 값 (검증 실패)
pub const NAK: u32 = 0xFFFF_FFFF;

/// 기본 최대 데이터그램 크기
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 48 * 1024; // 48KB

/// 기본 서버 포트
pub const DEFAULT_PORT: u16 = 12345;

/// CONNECT 응답
pub const WELCOME_MESSAGE: &str = "Welcome to the server!\n";
