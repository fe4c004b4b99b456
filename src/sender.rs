//! 슬라이딩 윈도우 송신자
//!
//! - 윈도우 크기만큼 패킷을 연속 송신 (파이프라인)
//! - 누적 ACK로 base 전진
//! - 타임아웃/NAK 시 base 패킷만 재전송하고 윈도우 절반
//! - 재전송된 패킷의 RTT는 추정에 사용하지 않음

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::packet::Packet;
use crate::session::{Response, Session};
use crate::window::AdaptiveWindow;
use crate::{Error, Result};

/// 전송 결과 요약
#[derive(Debug, Clone)]
pub struct SendSummary {
    /// 확인된 패킷 수
    pub packets: usize,

    /// 확인된 페이로드 바이트
    pub bytes: u64,

    /// 이번 전송의 재전송 수
    pub retransmissions: u64,

    /// 종료 시점 윈도우 크기
    pub final_window: usize,

    pub elapsed: Duration,
}

/// 송신 중인 패킷 상태
#[derive(Debug, Clone, Copy)]
struct InFlight {
    sent_at: Instant,
    transmissions: u32,
}

/// 송신자 (워커당 하나, 세션을 빌려 사용)
pub struct SlidingWindowSender<'a> {
    session: &'a mut Session,
    dest: SocketAddr,
    window: AdaptiveWindow,
}

impl<'a> SlidingWindowSender<'a> {
    /// 새 송신자 생성
    pub fn new(session: &'a mut Session, dest: SocketAddr) -> Self {
        let window = AdaptiveWindow::from_config(session.config());
        Self {
            session,
            dest,
            window,
        }
    }

    pub fn window(&self) -> &AdaptiveWindow {
        &self.window
    }

    pub fn dest(&self) -> SocketAddr {
        self.dest
    }

    /// 패킷 목록 전송
    ///
    /// 패킷 시퀀스는 연속이어야 한다 ([`Packet::split`] 결과).
    /// 모든 패킷이 확인되면 요약을 반환하고, 중간에 실패하면
    /// 확인된 개수를 담은 [`Error::PartialTransfer`]를 반환한다.
    pub async fn send_all(&mut self, packets: &[Packet]) -> Result<SendSummary> {
        let started = Instant::now();
        let retransmissions_before = self.session.stats().retransmissions;
        let total = packets.len();

        // 인코딩 실패는 아무것도 보내기 전에 보고
        let encoded = packets
            .iter()
            .map(|p| self.session.codec().encode(p.seq, &p.payload))
            .collect::<Result<Vec<Bytes>>>()?;

        let first_seq = match packets.first() {
            Some(packet) => packet.seq,
            None => {
                return Ok(SendSummary {
                    packets: 0,
                    bytes: 0,
                    retransmissions: 0,
                    final_window: self.window.size(),
                    elapsed: started.elapsed(),
                })
            }
        };

        let mut in_flight = vec![
            InFlight {
                sent_at: started,
                transmissions: 0,
            };
            total
        ];
        let mut base = 0usize;
        let mut next = 0usize;
        let mut last_progress = Instant::now();

        debug!(
            "{} 패킷 전송 시작 → {} (seq {}부터, 윈도우 {})",
            total,
            self.dest,
            first_seq,
            self.window.size()
        );

        while base < total {
            if let Err(e) = self.session.check_cancelled() {
                return Err(partial(base, total, e));
            }

            // 윈도우 채우기
            let limit = (base + self.window.size()).min(total);
            while next < limit {
                if let Err(e) = self.transmit(&encoded[next], &mut in_flight[next]).await {
                    return Err(partial(base, total, e));
                }
                next += 1;
            }

            let deadline = last_progress + self.session.rtt().current_timeout();
            let response = match self.session.wait_response(self.dest, deadline).await {
                Ok(response) => response,
                Err(e) => return Err(partial(base, total, e)),
            };

            match response {
                Response::Ack(ack) => {
                    let acked = ack.wrapping_sub(first_seq) as usize;
                    if acked <= base || acked > next {
                        debug!("중복 ACK {} 무시 (base {})", ack, base);
                        continue;
                    }

                    let newest = in_flight[acked - 1];
                    let sample = newest.sent_at.elapsed();
                    if newest.transmissions == 1 {
                        self.session.record_rtt(sample);
                    }
                    self.window.update(sample, false);
                    base = acked;
                    last_progress = Instant::now();
                }
                Response::Nak | Response::Noise | Response::Timeout => {
                    if response == Response::Timeout {
                        self.session.stats_mut().timeouts += 1;
                    }
                    let timeout = self.session.rtt().current_timeout();
                    let size = self.window.update(timeout, true);

                    let attempts = in_flight[base].transmissions;
                    if let Some(max) = self.session.config().max_transmissions {
                        if attempts >= max {
                            warn!(
                                "seq {} 재전송 한도 초과 ({}회), 전송 중단",
                                first_seq.wrapping_add(base as u32),
                                attempts
                            );
                            return Err(partial(base, total, Error::Timeout { attempts }));
                        }
                    }

                    debug!(
                        "{:?}: seq {} 재전송, 윈도우 {}",
                        response,
                        first_seq.wrapping_add(base as u32),
                        size
                    );
                    if let Err(e) = self.transmit(&encoded[base], &mut in_flight[base]).await {
                        return Err(partial(base, total, e));
                    }
                    last_progress = Instant::now();
                }
            }
        }

        let bytes = packets.iter().map(|p| p.payload.len() as u64).sum();
        let summary = SendSummary {
            packets: total,
            bytes,
            retransmissions: self.session.stats().retransmissions - retransmissions_before,
            final_window: self.window.size(),
            elapsed: started.elapsed(),
        };

        info!(
            "전송 완료 → {}: {} 패킷, {} bytes, 재전송 {}, 윈도우 {}",
            self.dest, summary.packets, summary.bytes, summary.retransmissions, summary.final_window
        );

        Ok(summary)
    }

    async fn transmit(&mut self, datagram: &Bytes, state: &mut InFlight) -> Result<()> {
        self.session.transmit(self.dest, datagram).await?;
        self.session
            .record_send(datagram.len(), state.transmissions > 0);
        state.sent_at = Instant::now();
        state.transmissions += 1;
        Ok(())
    }
}

fn partial(acknowledged: usize, total: usize, source: Error) -> Error {
    Error::PartialTransfer {
        acknowledged,
        total,
        source: Box::new(source),
    }
}
