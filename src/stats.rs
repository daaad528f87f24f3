//! 수신 통계

use std::time::{Duration, Instant};

/// 수신자 통계
#[derive(Debug, Clone)]
pub struct ReceiverStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 마지막 데이터그램 수신 시간
    pub last_activity: Option<Instant>,

    /// 수신한 데이터그램 수
    pub datagrams: u64,

    /// 피어가 아닌 주소에서 온 데이터그램 수
    pub foreign_datagrams: u64,

    /// 윈도우에 버퍼링된 세그먼트 수
    pub segments_buffered: u64,

    /// 중복 세그먼트 수 (윈도우 안)
    pub duplicate_segments: u64,

    /// 이미 전달된 구간의 세그먼트 수 (seq < base)
    pub stale_segments: u64,

    /// 윈도우 앞쪽 밖 세그먼트 수 (seq >= limit)
    pub beyond_window_segments: u64,

    /// 손상된 세그먼트 수
    pub corrupt_segments: u64,

    /// 핸드셰이크 전이라 무시한 세그먼트 수
    pub ignored_segments: u64,

    /// 애플리케이션에 전달한 세그먼트 수
    pub delivered_segments: u64,

    /// 애플리케이션에 전달한 바이트
    pub delivered_bytes: u64,

    /// 전달 대기 큐에서 버린 세그먼트 수
    pub dropped_deliveries: u64,

    /// 보낸 ACK 수
    pub acks_sent: u64,

    /// 그 중 중복 ACK 수
    pub duplicate_acks: u64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            last_activity: None,
            datagrams: 0,
            foreign_datagrams: 0,
            segments_buffered: 0,
            duplicate_segments: 0,
            stale_segments: 0,
            beyond_window_segments: 0,
            corrupt_segments: 0,
            ignored_segments: 0,
            delivered_segments: 0,
            delivered_bytes: 0,
            dropped_deliveries: 0,
            acks_sent: 0,
            duplicate_acks: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 마지막 수신 이후 경과 시간
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .map(|t| t.elapsed())
            .unwrap_or_else(|| self.elapsed())
    }

    /// 윈도우 밖으로 버린 세그먼트 합계
    pub fn out_of_window_segments(&self) -> u64 {
        self.stale_segments + self.beyond_window_segments
    }

    /// 전달 처리율 (bytes/sec)
    pub fn goodput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.delivered_bytes as f64 / elapsed
    }

    /// 수신 데이터그램 중 버려진 비율
    pub fn discard_rate(&self) -> f64 {
        if self.datagrams == 0 {
            return 0.0;
        }
        let discarded = self.corrupt_segments
            + self.duplicate_segments
            + self.out_of_window_segments()
            + self.ignored_segments;
        discarded as f64 / self.datagrams as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Delivered: {} segs / {} bytes | Goodput: {:.2} MB/s | Dup: {} | OOW: {} | Corrupt: {} | ACKs: {} ({} dup)",
            self.elapsed().as_secs_f64(),
            self.delivered_segments,
            self.delivered_bytes,
            self.goodput() / 1_000_000.0,
            self.duplicate_segments,
            self.out_of_window_segments(),
            self.corrupt_segments,
            self.acks_sent,
            self.duplicate_acks,
        )
    }
}

impl Default for ReceiverStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_rate() {
        let mut stats = ReceiverStats::new();
        assert_eq!(stats.discard_rate(), 0.0);

        stats.datagrams = 10;
        stats.corrupt_segments = 1;
        stats.stale_segments = 2;
        stats.beyond_window_segments = 1;
        stats.duplicate_segments = 1;

        assert_eq!(stats.out_of_window_segments(), 3);
        assert!((stats.discard_rate() - 0.5).abs() < f64::EPSILON);
        assert!(stats.summary().contains("OOW: 3"));
    }
}
