//! 슬라이딩 윈도우 수신자
//!
//! - 도착 순서와 무관하게 시퀀스 순서대로 페이로드 전달
//! - 순서 밖 패킷은 윈도우 범위 안에서만 보관
//! - 목표 바이트 수에 도달하면 종료

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::reorder::ReorderBuffer;
use crate::session::Session;
use crate::Result;

/// 수신자 (워커당 하나, 세션을 빌려 사용)
pub struct SlidingWindowReceiver<'a> {
    session: &'a mut Session,

    /// 다음 기대 시퀀스
    expected: u32,

    reorder: ReorderBuffer,

    /// 전달 목표 (바이트)
    goal: Option<u64>,

    /// 전달한 바이트
    delivered: u64,

    /// 첫 패킷을 보낸 주소
    peer: Option<SocketAddr>,
}

impl<'a> SlidingWindowReceiver<'a> {
    /// 새 수신자 생성
    ///
    /// 재정렬 보관 범위는 송신측 윈도우 상한(`max_window`)과 같다.
    pub fn new(session: &'a mut Session, expected: u32) -> Self {
        let horizon = u32::try_from(session.config().max_window).unwrap_or(u32::MAX);
        Self {
            session,
            expected,
            reorder: ReorderBuffer::with_horizon(horizon),
            goal: None,
            delivered: 0,
            peer: None,
        }
    }

    /// 전달 목표 설정
    pub fn with_goal(mut self, bytes: u64) -> Self {
        self.goal = Some(bytes);
        self
    }

    /// 다음 기대 시퀀스
    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn buffered(&self) -> usize {
        self.reorder.len()
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.goal, Some(goal) if self.delivered >= goal)
    }

    /// 다음 순서의 `(seq, payload)`
    ///
    /// 목표에 도달하면 None. 목표가 없으면 에러가 날 때까지 계속된다.
    pub async fn next(&mut self) -> Option<Result<(u32, Bytes)>> {
        if self.is_complete() {
            return None;
        }

        // 보관된 후속 패킷 먼저 전달
        if let Some(payload) = self.reorder.take(self.expected) {
            let seq = self.expected;
            self.expected = seq.wrapping_add(1);
            self.delivered += payload.len() as u64;
            self.session.stats_mut().bytes_delivered += payload.len() as u64;
            debug!("보관 패킷 전달 seq={} ({} bytes 누적)", seq, self.delivered);
            return Some(Ok((seq, payload)));
        }

        match self.session.recv_reliable(self.expected, &mut self.reorder).await {
            Ok(received) => {
                let seq = self.expected;
                self.expected = received.next_expected;
                self.delivered += received.payload.len() as u64;
                self.peer.get_or_insert(received.peer);
                debug!("seq={} 수신 ({} bytes 누적)", seq, self.delivered);
                Some(Ok((seq, received.payload)))
            }
            Err(e) => Some(Err(e)),
        }
    }

    /// 목표까지 모두 받아 이어 붙이기
    pub async fn collect_bytes(&mut self) -> Result<BytesMut> {
        let capacity = self.session.config().capacity_hint(self.goal.unwrap_or(0));
        let mut buf = BytesMut::with_capacity(capacity);
        while let Some(item) = self.next().await {
            let (_, payload) = item?;
            buf.extend_from_slice(&payload);
        }
        Ok(buf)
    }
}
