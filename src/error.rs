//! 에러 타입 정의

use thiserror::Error;

use crate::segment::SeqNum;

/// 세그먼트 손상 원인
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    #[error("헤더보다 짧은 데이터그램: {len} bytes")]
    Truncated { len: usize },

    #[error("유효하지 않은 매직 넘버: expected {expected:08X}, got {got:08X}")]
    BadMagic { expected: u32, got: u32 },

    #[error("유효하지 않은 프로토콜 버전: expected {expected}, got {got}")]
    BadVersion { expected: u8, got: u8 },

    #[error("예상하지 못한 메시지 타입: {got}")]
    UnexpectedType { got: u8 },

    #[error("길이 불일치: header={declared}, actual={actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("CRC 불일치: expected {expected:08X}, got {got:08X}")]
    ChecksumMismatch { expected: u32, got: u32 },
}

/// SWR 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("손상된 세그먼트: {0}")]
    CorruptSegment(#[from] Corruption),

    #[error("윈도우 밖 세그먼트: seq={seq}, base={base}, limit={limit}")]
    OutOfWindow {
        seq: SeqNum,
        base: SeqNum,
        limit: SeqNum,
        /// 이미 전달된 구간(seq < base)인지 여부
        stale: bool,
    },

    #[error("유휴 타임아웃: {idle_ms}ms 동안 수신 없음")]
    IdleTimeout { idle_ms: u64 },

    #[error("재전송 한도 초과: base={base}, attempts={attempts}")]
    RetransmitLimit { base: SeqNum, attempts: u32 },

    #[error("페이로드가 너무 큼: {len} bytes (최대 {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("애플리케이션 싱크 닫힘")]
    SinkClosed,

    #[error("채널 에러")]
    ChannelError,
}

impl Error {
    /// 체크섬/형식 오류 여부
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::CorruptSegment(_))
    }

    /// 윈도우 밖 세그먼트 여부
    pub fn is_out_of_window(&self) -> bool {
        matches!(self, Error::OutOfWindow { .. })
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
