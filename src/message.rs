//! 프로토콜 메시지 정의
//!
//! 데이터그램은 두 종류뿐: 데이터 세그먼트(송신자 → 수신자)와 ACK(수신자 → 송신자)

use serde::{Deserialize, Serialize};

use crate::error::Corruption;
use crate::segment::SeqNum;
use crate::{Result, MAGIC_NUMBER, PROTOCOL_VERSION};

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// 데이터 세그먼트 (SYN/FIN 포함)
    Data = 1,

    /// 누적 ACK (+ 선택적 SACK 비트맵)
    Ack = 2,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Data),
            2 => Some(Self::Ack),
            _ => None,
        }
    }
}

/// 공통 메시지 헤더 앞부분 (magic + version + type)
const PREFIX_LEN: usize = 6;

/// ACK 메시지 길이 (바이트)
pub const ACK_LEN: usize = 22;

/// 데이터그램 타입 판별 (전체 디코딩 없이)
pub fn peek_type(bytes: &[u8]) -> Option<MessageType> {
    if bytes.len() < PREFIX_LEN {
        return None;
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != MAGIC_NUMBER || bytes[4] != PROTOCOL_VERSION {
        return None;
    }
    MessageType::from_u8(bytes[5])
}

/// ACK 와이어 포맷
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AckWire {
    magic: u32,
    version: u8,
    msg_type: u8,
    cumulative: SeqNum,
    window: u32,
    sack: u64,
}

/// ACK 메시지 (수신자 → 송신자)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckMessage {
    /// 다음에 기대하는 순서 번호 (이 값 미만은 모두 수신됨)
    pub cumulative: SeqNum,

    /// 남은 수신 윈도우 슬롯 수
    pub window: u32,

    /// 선택적 ACK 비트맵 (bit i = cumulative + 1 + i 수신됨)
    pub sack: u64,
}

impl AckMessage {
    pub fn new(cumulative: SeqNum, window: u32, sack: u64) -> Self {
        Self {
            cumulative,
            window,
            sack,
        }
    }

    /// `seq` 가 이 ACK 로 확인되었는지 (누적 또는 SACK)
    pub fn acknowledges(&self, seq: SeqNum) -> bool {
        let behind = self.cumulative.wrapping_sub(seq);
        if behind != 0 && behind <= u32::MAX / 2 {
            return true;
        }
        let ahead = seq.wrapping_sub(self.cumulative);
        (1..=64).contains(&ahead) && self.sack & (1u64 << (ahead - 1)) != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let wire = AckWire {
            magic: MAGIC_NUMBER,
            version: PROTOCOL_VERSION,
            msg_type: MessageType::Ack as u8,
            cumulative: self.cumulative,
            window: self.window,
            sack: self.sack,
        };
        bincode::serialize(&wire).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ACK_LEN {
            return Err(Corruption::Truncated { len: bytes.len() }.into());
        }
        if bytes.len() != ACK_LEN {
            return Err(Corruption::LengthMismatch {
                declared: ACK_LEN,
                actual: bytes.len(),
            }
            .into());
        }

        let wire: AckWire = bincode::deserialize(bytes)?;
        if wire.magic != MAGIC_NUMBER {
            return Err(Corruption::BadMagic {
                expected: MAGIC_NUMBER,
                got: wire.magic,
            }
            .into());
        }
        if wire.version != PROTOCOL_VERSION {
            return Err(Corruption::BadVersion {
                expected: PROTOCOL_VERSION,
                got: wire.version,
            }
            .into());
        }
        if wire.msg_type != MessageType::Ack as u8 {
            return Err(Corruption::UnexpectedType { got: wire.msg_type }.into());
        }

        Ok(Self {
            cumulative: wire.cumulative,
            window: wire.window,
            sack: wire.sack,
        })
    }
}
