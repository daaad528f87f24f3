//! 프로토콜 설정

use crate::segment::SeqNum;
use crate::{Error, Result, DEFAULT_PAYLOAD_SIZE, DEFAULT_WINDOW_SIZE};

/// 전달 대기 큐가 가득 찼을 때의 처리 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// 새로 이어진 세그먼트를 윈도우에 남겨 두고 base 전진을 멈춤 (무손실)
    #[default]
    RejectNewest,

    /// 가장 오래된 대기 항목을 버리고 자리를 만듦 (손실 허용)
    DropOldest,
}

/// SWR 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 수신 윈도우 크기 (세그먼트 수, rws)
    /// 송신측에서는 송신 윈도우 크기 (sws)
    pub window_size: u32,

    /// 세션의 첫 순서 번호 (SYN 없이 시작할 때)
    pub initial_sequence: SeqNum,

    /// 세그먼트 최대 페이로드 (바이트)
    pub max_payload_size: usize,

    /// 애플리케이션 전달 대기 큐 크기
    pub delivery_queue_capacity: usize,

    /// 전달 대기 큐 초과 시 정책
    pub overflow_policy: OverflowPolicy,

    /// ACK 에 SACK 비트맵 포함 여부
    pub selective_ack: bool,

    /// 손상된 세그먼트에 중복 ACK 로 응답할지
    pub ack_on_corrupt: bool,

    /// SYN 없이 들어온 데이터를 무시할지
    pub require_handshake: bool,

    /// 세션 유휴 타임아웃 (밀리초, 0이면 비활성)
    pub idle_timeout_ms: u64,

    /// 전달 재시도/타임아웃 검사 주기 (밀리초)
    pub tick_interval_ms: u64,

    /// 종료 후 재전송된 FIN 에 응답하며 머무는 시간 (밀리초)
    pub close_linger_ms: u64,

    /// 정지 시 대기 중인 전달을 비우는 최대 시간 (밀리초)
    pub shutdown_flush_ms: u64,

    /// 송신측 재전송 타임아웃 (밀리초)
    pub retransmit_timeout_ms: u64,

    /// 송신측 연속 타임아웃 허용 횟수
    pub max_retransmits: u32,

    /// 수신 버퍼 크기 (데이터그램 최대 크기)
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            initial_sequence: 0,
            max_payload_size: DEFAULT_PAYLOAD_SIZE,
            delivery_queue_capacity: 64,
            overflow_policy: OverflowPolicy::RejectNewest,
            selective_ack: true,
            ack_on_corrupt: true,
            require_handshake: false,
            idle_timeout_ms: 30_000,          // 30초
            tick_interval_ms: 20,
            close_linger_ms: 500,
            shutdown_flush_ms: 1000,
            retransmit_timeout_ms: 200,
            max_retransmits: 20,
            recv_buffer_size: 65535,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 윈도우 크기 지정
    pub fn with_window_size(mut self, window_size: u32) -> Self {
        self.window_size = window_size;
        self
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::InvalidConfig("window_size 는 1 이상".into()));
        }
        // 순환 산술에서 앞/뒤 구분이 가능하려면 번호 공간의 절반 미만이어야 함
        if self.window_size > u32::MAX / 2 {
            return Err(Error::InvalidConfig(format!(
                "window_size {} 가 너무 큼",
                self.window_size
            )));
        }
        if self.max_payload_size == 0 || self.max_payload_size > u16::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "max_payload_size 는 1..={} 범위",
                u16::MAX
            )));
        }
        if self.delivery_queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "delivery_queue_capacity 는 1 이상".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::InvalidConfig("tick_interval_ms 는 1 이상".into()));
        }
        if self.recv_buffer_size < crate::segment::HEADER_LEN + self.max_payload_size {
            return Err(Error::InvalidConfig(
                "recv_buffer_size 가 최대 세그먼트보다 작음".into(),
            ));
        }
        Ok(())
    }

    /// 저지연 설정 (작은 윈도우, 짧은 타이머)
    pub fn low_latency() -> Self {
        Self {
            window_size: 4,
            max_payload_size: 512,
            delivery_queue_capacity: 16,
            tick_interval_ms: 5,
            close_linger_ms: 100,
            retransmit_timeout_ms: 50,
            ..Self::default()
        }
    }

    /// 손실이 많은 네트워크용 설정
    pub fn lossy_network() -> Self {
        Self {
            window_size: 32,
            max_payload_size: 1000,           // 작은 세그먼트
            delivery_queue_capacity: 128,
            idle_timeout_ms: 60_000,
            close_linger_ms: 2000,
            retransmit_timeout_ms: 400,
            max_retransmits: 50,
            ..Self::default()
        }
    }

    /// 대용량 전송용 설정
    pub fn bulk_transfer() -> Self {
        Self {
            window_size: 256,
            max_payload_size: 1400,
            delivery_queue_capacity: 1024,
            retransmit_timeout_ms: 100,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for config in [
            Config::default(),
            Config::low_latency(),
            Config::lossy_network(),
            Config::bulk_transfer(),
        ] {
            config.validate().unwrap();
        }
    }

    #[test]
    fn test_invalid_window() {
        assert!(Config::new().with_window_size(0).validate().is_err());
        assert!(Config::new()
            .with_window_size(u32::MAX / 2 + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_invalid_payload_and_queue() {
        let mut config = Config::default();
        config.max_payload_size = 70_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.delivery_queue_capacity = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
