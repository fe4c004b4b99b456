//! RTT 추정기
//!
//! 지수 평활 RTT와 편차로 재전송 타임아웃을 계산한다.
//!
//! ```text
//! estimated' = (1 - α)·estimated + α·sample
//! deviation' = (1 - β)·deviation + β·|sample - estimated'|
//! timeout    = clamp(estimated' + 4·deviation', min, max)
//! ```
//!
//! 세션마다 하나씩 생성하며 세션 간 공유하지 않는다.

use std::time::Duration;

use crate::Config;

/// 세션별 RTT/타임아웃 상태
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// 평활 RTT (초)
    estimated_rtt: f64,

    /// RTT 편차 (초)
    deviation: f64,

    /// 현재 재전송 타임아웃 (초)
    timeout_interval: f64,

    alpha: f64,
    beta: f64,
    min_timeout: f64,
    max_timeout: f64,

    /// 반영된 샘플 수
    samples: u64,
}

impl RttEstimator {
    pub fn new(config: &Config) -> Self {
        let initial = config.initial_timeout().as_secs_f64();
        Self {
            estimated_rtt: initial,
            deviation: 0.0,
            timeout_interval: initial,
            alpha: config.alpha,
            beta: config.beta,
            min_timeout: config.min_timeout().as_secs_f64(),
            max_timeout: config.max_timeout().as_secs_f64(),
            samples: 0,
        }
    }

    /// RTT 샘플 반영
    ///
    /// 0 샘플은 시계 이상으로 보고 무시한다. 반영 여부를 반환.
    pub fn on_sample(&mut self, sample_rtt: Duration) -> bool {
        let sample = sample_rtt.as_secs_f64();
        if !(sample > 0.0) {
            return false;
        }

        self.estimated_rtt = (1.0 - self.alpha) * self.estimated_rtt + self.alpha * sample;
        self.deviation = (1.0 - self.beta) * self.deviation
            + self.beta * (sample - self.estimated_rtt).abs();
        self.timeout_interval = (self.estimated_rtt + 4.0 * self.deviation)
            .clamp(self.min_timeout, self.max_timeout);
        self.samples += 1;
        true
    }

    /// 현재 재전송 타임아웃
    pub fn current_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_interval)
    }

    pub fn estimated_rtt(&self) -> Duration {
        Duration::from_secs_f64(self.estimated_rtt)
    }

    pub fn deviation(&self) -> Duration {
        Duration::from_secs_f64(self.deviation)
    }

    pub fn sample_count(&self) -> u64 {
        self.samples
    }
}
