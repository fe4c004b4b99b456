//! 재정렬 버퍼
//!
//! 기대 시퀀스보다 앞서 도착한 페이로드를 보관한다.

use std::collections::BTreeMap;

use bytes::Bytes;

/// 시퀀스 → 페이로드 보관소
#[derive(Debug, Clone)]
pub struct ReorderBuffer {
    entries: BTreeMap<u32, Bytes>,

    /// 기대 시퀀스 기준 보관 범위 (`expected < seq < expected + horizon`)
    horizon: u32,
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReorderBuffer {
    /// 범위 제한 없는 버퍼
    pub fn new() -> Self {
        Self::with_horizon(u32::MAX)
    }

    pub fn with_horizon(horizon: u32) -> Self {
        Self {
            entries: BTreeMap::new(),
            horizon: horizon.max(1),
        }
    }

    pub fn horizon(&self) -> u32 {
        self.horizon
    }

    /// 순서 밖 페이로드 보관
    ///
    /// 범위 밖이거나 이미 있으면 false.
    pub fn insert(&mut self, expected: u32, seq: u32, payload: Bytes) -> bool {
        if seq <= expected || seq - expected >= self.horizon {
            return false;
        }
        if self.entries.contains_key(&seq) {
            return false;
        }
        self.entries.insert(seq, payload);
        true
    }

    /// 해당 시퀀스 꺼내기
    pub fn take(&mut self, seq: u32) -> Option<Bytes> {
        self.entries.remove(&seq)
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.entries.contains_key(&seq)
    }

    /// `from`부터 연속으로 보관된 구간 다음의 첫 빈 시퀀스
    pub fn next_missing(&self, from: u32) -> u32 {
        let mut seq = from;
        while self.entries.contains_key(&seq) {
            match seq.checked_add(1) {
                Some(next) => seq = next,
                None => break,
            }
        }
        seq
    }

    /// 기대 시퀀스 이하이거나 범위를 벗어난 항목 제거, 제거 수 반환
    pub fn prune(&mut self, expected: u32) -> usize {
        let before = self.entries.len();
        let horizon = self.horizon;
        self.entries
            .retain(|&seq, _| seq > expected && seq - expected < horizon);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
