//! 전송 세션
//!
//! 워커 하나가 소유하는 소켓과 RTT 추정기, 통계, 취소 플래그를 묶는다.
//! 신뢰 송신(send-and-wait)과 신뢰 수신(receive-and-ack) 기본 동작이 여기 있다.
//!
//! - 송신: `SEND → WAIT_ACK → {ACKED | TIMEOUT→SEND | NAK→SEND}`
//! - 수신: 검증 실패 → NAK, 순서대로 → ACK 후 반환, 앞선 패킷 → 보관 후 재확인 ACK,
//!   지난 패킷 → 재확인 ACK

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::packet::{decode_ack, encode_ack, encode_nak, AckFrame, PacketCodec};
use crate::reorder::ReorderBuffer;
use crate::rtt::RttEstimator;
use crate::stats::TransferStats;
use crate::{Config, Error, Result, ACK_LEN};

/// 보관하는 대기 데이터 패킷 수
const BACKLOG_LIMIT: usize = 64;

/// 기억하는 종료된 송신자 수
const RETIRED_LIMIT: usize = 32;

/// 협력적 취소 플래그
///
/// 대기 중인 기본 동작은 타임아웃이 만료될 때마다 이 값을 확인한다.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// 종료 요청
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 순서대로 수신된 페이로드
#[derive(Debug, Clone)]
pub struct Received {
    pub payload: Bytes,
    pub peer: SocketAddr,
    pub next_expected: u32,
}

/// ACK 대기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Response {
    Ack(u32),
    Nak,
    /// 4바이트 미만 응답
    Noise,
    Timeout,
}

/// 세션 (워커당 하나)
pub struct Session {
    socket: UdpSocket,
    config: Config,
    codec: PacketCodec,
    rtt: RttEstimator,
    stats: TransferStats,
    shutdown: Shutdown,

    /// 연속 빈 대기 허용 횟수
    idle_limit: Option<u32>,

    /// ACK 대기 중 도착한 데이터 패킷
    backlog: VecDeque<(Bytes, SocketAddr)>,

    /// 이미 처리가 끝난 송신자 (늦게 온 중복은 확인만 하고 버림)
    retired: VecDeque<SocketAddr>,

    buf: Vec<u8>,
}

impl Session {
    /// 소켓 바인딩 후 세션 생성
    pub async fn bind(addr: SocketAddr, config: Config, shutdown: Shutdown) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::new(socket, config, shutdown))
    }

    pub fn new(socket: UdpSocket, config: Config, shutdown: Shutdown) -> Self {
        let buf_len = config.max_datagram_size.max(config.recv_buffer_size).max(ACK_LEN);
        Self {
            codec: PacketCodec::new(config.digest, config.max_datagram_size),
            rtt: RttEstimator::new(&config),
            stats: TransferStats::new(),
            idle_limit: config.max_idle_polls,
            backlog: VecDeque::new(),
            retired: VecDeque::new(),
            buf: vec![0u8; buf_len],
            socket,
            config,
            shutdown,
        }
    }

    /// 수신 대기 한도 변경 (None = 무기한)
    pub fn with_idle_limit(mut self, limit: Option<u32>) -> Self {
        self.idle_limit = limit;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut TransferStats {
        &mut self.stats
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.shutdown.is_triggered() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// 시간 제한 수신, 시간 초과 시 None
    async fn recv_timeout(&mut self, wait: Duration) -> Result<Option<(usize, SocketAddr)>> {
        match tokio::time::timeout(wait, self.socket.recv_from(&mut self.buf)).await {
            Ok(Ok((len, from))) => Ok(Some((len, from))),
            Ok(Err(e)) => Err(Error::from_socket(e)),
            Err(_) => Ok(None),
        }
    }

    /// 대기 중 보관된 패킷을 먼저, 없으면 소켓에서 수신
    async fn next_datagram(&mut self, wait: Duration) -> Result<Option<(Bytes, SocketAddr)>> {
        if let Some(entry) = self.backlog.pop_front() {
            return Ok(Some(entry));
        }
        let received = self.recv_timeout(wait).await?;
        Ok(received.map(|(len, from)| (Bytes::copy_from_slice(&self.buf[..len]), from)))
    }

    fn stash(&mut self, len: usize, from: SocketAddr) {
        if self.backlog.len() >= BACKLOG_LIMIT {
            debug!("대기 패킷 보관소 가득 참, {} 패킷 폐기", from);
            return;
        }
        self.backlog
            .push_back((Bytes::copy_from_slice(&self.buf[..len]), from));
    }

    /// 송신자 종료 처리
    ///
    /// 이후 이 주소에서 오는 패킷은 전달하지 않고 `seq + 1`로 확인만 한다.
    pub fn retire_peer(&mut self, peer: SocketAddr) {
        if self.retired.contains(&peer) {
            return;
        }
        if self.retired.len() >= RETIRED_LIMIT {
            self.retired.pop_front();
        }
        self.retired.push_back(peer);
    }

    /// 원시 데이터그램 전송
    pub(crate) async fn transmit(&mut self, dest: SocketAddr, datagram: &[u8]) -> Result<()> {
        self.socket
            .send_to(datagram, dest)
            .await
            .map_err(Error::from_socket)?;
        Ok(())
    }

    /// 데이터 패킷 송신 통계 기록
    pub(crate) fn record_send(&mut self, datagram_len: usize, retransmission: bool) {
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += datagram_len.saturating_sub(self.codec.header_len()) as u64;
        if retransmission {
            self.stats.retransmissions += 1;
        }
    }

    /// RTT 샘플 반영
    pub(crate) fn record_rtt(&mut self, sample: Duration) {
        if self.rtt.on_sample(sample) {
            self.stats.rtt_samples += 1;
            self.stats.last_rtt = Some(sample);
        }
    }

    async fn send_ack(&mut self, peer: SocketAddr, value: u32) -> Result<()> {
        self.transmit(peer, &encode_ack(value)).await?;
        self.stats.acks_sent += 1;
        Ok(())
    }

    async fn send_nak(&mut self, peer: SocketAddr) -> Result<()> {
        self.transmit(peer, &encode_nak()).await?;
        self.stats.naks_sent += 1;
        Ok(())
    }

    /// `dest`로부터 ACK/NAK 대기 (마감 시각까지)
    ///
    /// 4바이트를 넘는 데이터그램은 다음 수신을 위해 보관하고,
    /// 다른 주소의 ACK는 무시한다.
    pub(crate) async fn wait_response(
        &mut self,
        dest: SocketAddr,
        deadline: Instant,
    ) -> Result<Response> {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(Response::Timeout);
            }

            let (len, from) = match self.recv_timeout(deadline - now).await? {
                Some(received) => received,
                None => return Ok(Response::Timeout),
            };

            if len > ACK_LEN {
                self.stash(len, from);
                continue;
            }
            if from != dest {
                debug!("예상 밖 주소의 응답 무시: {}", from);
                continue;
            }

            match decode_ack(&self.buf[..len]) {
                Some(AckFrame::Nak) => {
                    self.stats.naks_received += 1;
                    return Ok(Response::Nak);
                }
                Some(AckFrame::Ack(value)) => {
                    self.stats.acks_received += 1;
                    return Ok(Response::Ack(value));
                }
                None => return Ok(Response::Noise),
            }
        }
    }

    /// 신뢰 송신 (설정의 `max_transmissions` 적용)
    pub async fn send_reliable(&mut self, dest: SocketAddr, packet: &[u8]) -> Result<u32> {
        let max_attempts = self.config.max_transmissions;
        self.send_reliable_with(dest, packet, max_attempts).await
    }

    /// 신뢰 송신
    ///
    /// 유효한 ACK를 받을 때까지 타임아웃·NAK·잡음마다 같은 패킷을 재전송하고
    /// ACK 값을 반환한다. `max_attempts`가 None이면 취소될 때까지 반복한다.
    pub async fn send_reliable_with(
        &mut self,
        dest: SocketAddr,
        packet: &[u8],
        max_attempts: Option<u32>,
    ) -> Result<u32> {
        let mut attempts = 0u32;

        loop {
            self.check_cancelled()?;
            if let Some(max) = max_attempts {
                if attempts >= max {
                    return Err(Error::Timeout { attempts });
                }
            }
            attempts += 1;

            self.transmit(dest, packet).await?;
            self.record_send(packet.len(), attempts > 1);

            let sent_at = Instant::now();
            let deadline = sent_at + self.rtt.current_timeout();

            match self.wait_response(dest, deadline).await? {
                Response::Ack(value) => {
                    self.record_rtt(sent_at.elapsed());
                    return Ok(value);
                }
                Response::Nak => debug!("NAK 수신, 재전송 (시도 {})", attempts),
                Response::Noise => debug!("잡음 응답, 재전송 (시도 {})", attempts),
                Response::Timeout => {
                    self.stats.timeouts += 1;
                    debug!(
                        "타임아웃 {:?}, 재전송 (시도 {})",
                        self.rtt.current_timeout(),
                        attempts
                    );
                }
            }
        }
    }

    /// 종료 알림용 송신
    ///
    /// 취소 플래그를 보지 않고 최대 `attempts`회 시도한다. ACK를 받으면 true.
    pub async fn send_best_effort(&mut self, dest: SocketAddr, packet: &[u8], attempts: u32) -> bool {
        for attempt in 0..attempts {
            if self.transmit(dest, packet).await.is_err() {
                return false;
            }
            self.record_send(packet.len(), attempt > 0);

            let deadline = Instant::now() + self.rtt.current_timeout();
            match self.wait_response(dest, deadline).await {
                Ok(Response::Ack(_)) => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
        false
    }

    /// 페이로드를 패킷으로 만들어 신뢰 송신
    pub async fn send_payload(&mut self, dest: SocketAddr, seq: u32, payload: &[u8]) -> Result<u32> {
        let packet = self.codec.encode(seq, payload)?;
        self.send_reliable(dest, &packet).await
    }

    /// 신뢰 수신
    ///
    /// `expected` 시퀀스가 도착할 때까지 반복한다. 수신 타임아웃은 실패가 아니며
    /// 유휴 한도가 설정된 경우에만 [`Error::Timeout`]이 된다.
    pub async fn recv_reliable(
        &mut self,
        expected: u32,
        reorder: &mut ReorderBuffer,
    ) -> Result<Received> {
        let mut idle = 0u32;

        loop {
            self.check_cancelled()?;

            let wait = self.rtt.current_timeout();
            let (datagram, peer) = match self.next_datagram(wait).await? {
                Some(received) => received,
                None => {
                    idle += 1;
                    if let Some(limit) = self.idle_limit {
                        if idle >= limit {
                            return Err(Error::Timeout { attempts: idle });
                        }
                    }
                    continue;
                }
            };
            idle = 0;

            // ACK/NAK 길이(4바이트)에는 NAK하지 않는다. 수신자끼리 NAK 루프 방지,
            // DESIGN.md "Stray ACKs" 참고. 더 짧은 데이터그램은 디코딩 실패로 NAK.
            if datagram.len() == ACK_LEN {
                debug!("수신 대기 중 ACK 데이터그램 무시: {}", peer);
                continue;
            }

            let packet = match self.codec.decode(&datagram) {
                Ok(packet) => packet,
                Err(e) => {
                    self.stats.corrupt_received += 1;
                    debug!("{} 패킷 거부 ({}), NAK 전송", peer, e);
                    self.send_nak(peer).await?;
                    continue;
                }
            };

            if self.retired.contains(&peer) {
                self.stats.duplicates_received += 1;
                debug!("종료된 송신자 {}의 seq={} 확인 후 폐기", peer, packet.seq);
                self.send_ack(peer, packet.seq.wrapping_add(1)).await?;
                continue;
            }

            if packet.seq == expected {
                let next_expected = expected.wrapping_add(1);
                // 이미 보관된 연속 구간까지 누적 확인
                let ack = reorder.next_missing(next_expected);
                self.send_ack(peer, ack).await?;
                self.stats.bytes_delivered += packet.payload.len() as u64;
                return Ok(Received {
                    payload: packet.payload,
                    peer,
                    next_expected,
                });
            }

            if packet.seq > expected {
                if reorder.insert(expected, packet.seq, packet.payload) {
                    self.stats.out_of_order_received += 1;
                    debug!("순서 밖 패킷 seq={} 보관 (기대 {})", packet.seq, expected);
                } else {
                    // 이미 보관 중이거나 보관 범위 밖
                    self.stats.duplicates_received += 1;
                    debug!("seq={} 보관 안 함 (기대 {})", packet.seq, expected);
                }
            } else {
                self.stats.duplicates_received += 1;
                debug!("중복 패킷 seq={} (기대 {})", packet.seq, expected);
            }
            self.send_ack(peer, expected).await?;
        }
    }
}
