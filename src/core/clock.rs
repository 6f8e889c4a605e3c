//! 帧计时与 FPS 统计

use std::time::{Duration, Instant};

/// 帧时钟
///
/// 每次 `tick` 返回距上一次调用的时间间隔。
#[derive(Debug)]
pub struct Clock {
    last: Instant,
    total: Duration,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
            total: Duration::ZERO,
        }
    }

    /// 推进时钟，返回本帧耗时
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now.duration_since(self.last);
        self.last = now;
        self.total += delta;
        delta
    }

    /// 从创建到最后一次 `tick` 的累计时间
    pub fn total(&self) -> Duration {
        self.total
    }

    /// 重置起点，丢弃期间流逝的时间
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// FPS 统计
///
/// 累积帧耗时和帧数，每跨过 1 秒计算一次帧率并清零。
/// 仅用于监控，不影响帧同步。
#[derive(Debug, Default)]
pub struct FpsCounter {
    elapsed: f64,
    frames: u32,
    last_fps: Option<f64>,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一帧，跨过 1 秒边界时返回帧率
    pub fn record(&mut self, delta_seconds: f64) -> Option<f64> {
        self.elapsed += delta_seconds;
        self.frames += 1;

        if self.elapsed >= 1.0 {
            let fps = self.frames as f64 / self.elapsed;
            self.elapsed = 0.0;
            self.frames = 0;
            self.last_fps = Some(fps);
            return Some(fps);
        }

        None
    }

    /// 最近一次计算出的帧率
    pub fn last_fps(&self) -> Option<f64> {
        self.last_fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_reported_once_per_second() {
        let mut fps = FpsCounter::new();

        for _ in 0..3 {
            assert_eq!(fps.record(0.25), None);
        }
        let reported = fps.record(0.25).unwrap();
        assert!((reported - 4.0).abs() < 1e-6);
        assert_eq!(fps.last_fps(), Some(reported));

        // 计数器已清零
        assert_eq!(fps.record(0.5), None);
    }

    #[test]
    fn test_slow_frame_reports_immediately() {
        let mut fps = FpsCounter::new();
        let reported = fps.record(2.0).unwrap();
        assert!((reported - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_clock_accumulates() {
        let mut clock = Clock::new();
        std::thread::sleep(Duration::from_millis(5));
        let delta = clock.tick();
        assert!(delta >= Duration::from_millis(5));
        assert_eq!(clock.total(), delta);
    }
}
