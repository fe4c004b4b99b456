//! 전송 통계

use std::time::{Duration, Instant};

/// 세션/전송 단위 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 송신한 데이터 패킷 수 (재전송 포함)
    pub packets_sent: u64,

    /// 재전송 패킷 수
    pub retransmissions: u64,

    /// ACK 대기 타임아웃 수
    pub timeouts: u64,

    /// 수신한 ACK 수
    pub acks_received: u64,

    /// 수신한 NAK 수
    pub naks_received: u64,

    /// 송신한 ACK 수 (재확인 포함)
    pub acks_sent: u64,

    /// 송신한 NAK 수
    pub naks_sent: u64,

    /// 손상/잘린 패킷 수
    pub corrupt_received: u64,

    /// 순서 밖 수신 패킷 수
    pub out_of_order_received: u64,

    /// 중복 수신 패킷 수
    pub duplicates_received: u64,

    /// 송신 페이로드 바이트 (재전송 포함)
    pub bytes_sent: u64,

    /// 순서대로 전달된 페이로드 바이트
    pub bytes_delivered: u64,

    /// 반영된 RTT 샘플 수
    pub rtt_samples: u64,

    /// 마지막 RTT 샘플
    pub last_rtt: Option<Duration>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            packets_sent: 0,
            retransmissions: 0,
            timeouts: 0,
            acks_received: 0,
            naks_received: 0,
            acks_sent: 0,
            naks_sent: 0,
            corrupt_received: 0,
            out_of_order_received: 0,
            duplicates_received: 0,
            bytes_sent: 0,
            bytes_delivered: 0,
            rtt_samples: 0,
            last_rtt: None,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전달 처리율 (bytes/sec)
    pub fn goodput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_delivered as f64 / elapsed
    }

    /// 재전송 비율
    pub fn retransmission_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.retransmissions as f64 / self.packets_sent as f64
    }

    /// 다른 세션 통계 합산 (시작 시간은 더 이른 쪽)
    pub fn merge(&mut self, other: &TransferStats) {
        self.start_time = self.start_time.min(other.start_time);
        self.packets_sent += other.packets_sent;
        self.retransmissions += other.retransmissions;
        self.timeouts += other.timeouts;
        self.acks_received += other.acks_received;
        self.naks_received += other.naks_received;
        self.acks_sent += other.acks_sent;
        self.naks_sent += other.naks_sent;
        self.corrupt_received += other.corrupt_received;
        self.out_of_order_received += other.out_of_order_received;
        self.duplicates_received += other.duplicates_received;
        self.bytes_sent += other.bytes_sent;
        self.bytes_delivered += other.bytes_delivered;
        self.rtt_samples += other.rtt_samples;
        if other.last_rtt.is_some() {
            self.last_rtt = other.last_rtt;
        }
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} pkts ({} retx, {:.1}%) | Timeouts: {} | NAKs: {}/{} | Delivered: {} bytes ({:.2} MB/s) | OOO: {} | Dup: {}",
            self.elapsed().as_secs_f64(),
            self.packets_sent,
            self.retransmissions,
            self.retransmission_rate() * 100.0,
            self.timeouts,
            self.naks_received,
            self.naks_sent,
            self.bytes_delivered,
            self.goodput() / 1_000_000.0,
            self.out_of_order_received,
            self.duplicates_received,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
