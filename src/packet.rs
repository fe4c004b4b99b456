//! 패킷 코덱
//!
//! 와이어 포맷:
//!
//! ```text
//! offset 0..D     : 다이제스트 (ASCII hex, D = Digest::hex_len)
//! offset D..D+4   : 시퀀스 번호 (u32 big-endian)
//! offset D+4..N   : 페이로드
//! ```
//!
//! 다이제스트는 `seq || payload`에 대해 계산한다. MD5(32바이트 hex)가 기본이고
//! CRC32(8바이트 hex)를 선택하면 헤더가 12바이트로 줄어든다. 양측 설정이 같아야 한다.
//!
//! ACK/NAK는 다이제스트 없는 4바이트 u32 big-endian 데이터그램이며
//! [`NAK`] 값은 "검증 실패"를 뜻한다.

use bytes::{BufMut, Bytes, BytesMut};
use md5::Digest as _;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, ACK_LEN, NAK, SEQ_LEN};

/// 무결성 다이제스트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Digest {
    /// MD5 128비트, 32바이트 hex
    Md5,
    /// CRC32, 8바이트 hex
    Crc32,
}

impl Digest {
    /// 와이어 상의 다이제스트 필드 길이
    pub const fn hex_len(self) -> usize {
        match self {
            Digest::Md5 => 32,
            Digest::Crc32 => 8,
        }
    }

    /// `seq || payload`의 hex 다이제스트
    fn compute(self, seq: u32, payload: &[u8]) -> String {
        let seq_bytes = seq.to_be_bytes();
        match self {
            Digest::Md5 => {
                let mut hasher = md5::Md5::new();
                hasher.update(seq_bytes);
                hasher.update(payload);
                hex::encode(hasher.finalize())
            }
            Digest::Crc32 => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(&seq_bytes);
                hasher.update(payload);
                hex::encode(hasher.finalize().to_be_bytes())
            }
        }
    }
}

/// 디코딩된 패킷
///
/// 시퀀스 번호는 32비트이며 랩어라운드는 처리하지 않는다.
/// 요청 하나로 보낼 수 있는 크기는 `2^32 × max_payload` 바이트로 제한된다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(seq: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }

    /// 데이터를 `max_payload` 단위로 분할해 `start_seq`부터 연속 번호 부여
    ///
    /// 빈 데이터는 빈 목록이 된다.
    pub fn split(start_seq: u32, data: &Bytes, max_payload: usize) -> Vec<Packet> {
        let max_payload = max_payload.max(1);
        (0..data.len())
            .step_by(max_payload)
            .enumerate()
            .map(|(idx, offset)| {
                let end = (offset + max_payload).min(data.len());
                Packet::new(start_seq.wrapping_add(idx as u32), data.slice(offset..end))
            })
            .collect()
    }
}

/// ACK 데이터그램 해석 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckFrame {
    /// 누적 ACK (다음 기대 시퀀스)
    Ack(u32),
    /// 검증 실패
    Nak,
}

/// ACK 인코딩
pub fn encode_ack(value: u32) -> [u8; ACK_LEN] {
    value.to_be_bytes()
}

/// NAK 인코딩
pub fn encode_nak() -> [u8; ACK_LEN] {
    NAK.to_be_bytes()
}

/// ACK 디코딩
///
/// 정확히 4바이트가 아니면 `None` (ACK가 아님).
pub fn decode_ack(buf: &[u8]) -> Option<AckFrame> {
    let bytes: [u8; ACK_LEN] = buf.try_into().ok()?;
    match u32::from_be_bytes(bytes) {
        NAK => Some(AckFrame::Nak),
        value => Some(AckFrame::Ack(value)),
    }
}

/// 패킷 인코더/디코더
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    digest: Digest,
    max_datagram_size: usize,
}

impl PacketCodec {
    pub fn new(digest: Digest, max_datagram_size: usize) -> Self {
        Self {
            digest,
            max_datagram_size,
        }
    }

    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// 고정 헤더 길이
    pub fn header_len(&self) -> usize {
        self.digest.hex_len() + SEQ_LEN
    }

    /// 패킷당 최대 페이로드
    pub fn max_payload(&self) -> usize {
        self.max_datagram_size.saturating_sub(self.header_len())
    }

    /// `digest || seq || payload` 생성
    pub fn encode(&self, seq: u32, payload: &[u8]) -> Result<Bytes> {
        if payload.len() > self.max_payload() {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: self.max_payload(),
            });
        }

        let digest = self.digest.compute(seq, payload);
        let mut buf = BytesMut::with_capacity(self.header_len() + payload.len());
        buf.put_slice(digest.as_bytes());
        buf.put_u32(seq);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// 패킷 파싱 및 검증
    ///
    /// 헤더보다 짧거나 다이제스트가 맞지 않으면 [`Error::CorruptPacket`].
    pub fn decode(&self, buf: &[u8]) -> Result<Packet> {
        let digest_len = self.digest.hex_len();
        if buf.len() < self.header_len() {
            return Err(Error::CorruptPacket {
                reason: "truncated header",
            });
        }

        let (stored, rest) = buf.split_at(digest_len);
        let (seq_bytes, payload) = rest.split_at(SEQ_LEN);
        let seq = u32::from_be_bytes([seq_bytes[0], seq_bytes[1], seq_bytes[2], seq_bytes[3]]);

        if self.digest.compute(seq, payload).as_bytes() != stored {
            return Err(Error::CorruptPacket {
                reason: "digest mismatch",
            });
        }

        Ok(Packet::new(seq, Bytes::copy_from_slice(payload)))
    }
}
