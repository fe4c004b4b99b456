//! 적응형 윈도우 (AIMD-lite)
//!
//! 손실 시 윈도우를 절반으로 줄이고, 손실률이 낮게 유지되면
//! 업데이트마다 최대 1씩 늘린다. 표준 혼잡제어 알고리즘은 아니다.

use std::collections::VecDeque;
use std::time::Duration;

/// 보관하는 최근 RTT 샘플 수
pub const RTT_HISTORY: usize = 10;

/// 윈도우 증가를 허용하는 손실률 상한
pub const GROWTH_LOSS_THRESHOLD: f64 = 0.05;

/// 전송별 적응형 윈도우 상태
#[derive(Debug, Clone)]
pub struct AdaptiveWindow {
    window_size: usize,
    min_size: usize,
    max_size: usize,

    /// 최근 RTT 샘플 (초)
    rtt_samples: VecDeque<f64>,

    successful_transmissions: u64,
    failed_transmissions: u64,
}

impl AdaptiveWindow {
    /// 새 윈도우 생성 (초기값은 [min, max]로 보정)
    pub fn new(initial: usize, min_size: usize, max_size: usize) -> Self {
        let min_size = min_size.max(1);
        let max_size = max_size.max(min_size);
        Self {
            window_size: initial.clamp(min_size, max_size),
            min_size,
            max_size,
            rtt_samples: VecDeque::with_capacity(RTT_HISTORY),
            successful_transmissions: 0,
            failed_transmissions: 0,
        }
    }

    pub fn from_config(config: &crate::Config) -> Self {
        Self::new(config.initial_window, config.min_window, config.max_window)
    }

    /// 전송 결과 반영, 새 윈도우 크기 반환
    pub fn update(&mut self, rtt_sample: Duration, packet_loss: bool) -> usize {
        if packet_loss {
            self.failed_transmissions += 1;
            self.window_size = (self.window_size / 2).max(self.min_size);
            return self.window_size;
        }

        self.successful_transmissions += 1;
        let rtt = rtt_sample.as_secs_f64();
        if rtt > 0.0 {
            if self.rtt_samples.len() >= RTT_HISTORY {
                self.rtt_samples.pop_front();
            }
            self.rtt_samples.push_back(rtt);
        }

        if self.loss_rate() < GROWTH_LOSS_THRESHOLD {
            // 대역폭-지연 곱 추정치가 증가 목표의 상한
            let target = match self.average_rtt_secs() {
                Some(avg) if rtt > 0.0 => {
                    (self.successful_transmissions as f64 / avg * rtt).floor() as usize
                }
                _ => self.window_size + 1,
            };
            if target > self.window_size {
                self.window_size = (self.window_size + 1).min(self.max_size);
            }
        }

        self.window_size
    }

    /// 현재 윈도우 크기
    pub fn size(&self) -> usize {
        self.window_size
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// 손실률
    pub fn loss_rate(&self) -> f64 {
        let total = self.successful_transmissions + self.failed_transmissions;
        if total == 0 {
            return 0.0;
        }
        self.failed_transmissions as f64 / total as f64
    }

    /// 최근 샘플 평균 RTT
    pub fn average_rtt(&self) -> Option<Duration> {
        self.average_rtt_secs().map(Duration::from_secs_f64)
    }

    fn average_rtt_secs(&self) -> Option<f64> {
        if self.rtt_samples.is_empty() {
            return None;
        }
        Some(self.rtt_samples.iter().sum::<f64>() / self.rtt_samples.len() as f64)
    }

    pub fn rtt_sample_count(&self) -> usize {
        self.rtt_samples.len()
    }

    pub fn successes(&self) -> u64 {
        self.successful_transmissions
    }

    pub fn failures(&self) -> u64 {
        self.failed_transmissions
    }
}
