//! 데이터 세그먼트 정의와 코덱
//!
//! - Segment: 송신자가 보내는 순서 번호가 붙은 데이터그램 단위
//! - 헤더는 bincode 고정 길이 인코딩 (17 bytes), 뒤에 페이로드가 붙음

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Corruption;
use crate::Error;
use crate::message::MessageType;
use crate::{Result, MAGIC_NUMBER, PROTOCOL_VERSION};

/// 순서 번호 (32비트, 순환)
pub type SeqNum = u32;

/// 세그먼트 헤더 길이 (바이트)
pub const HEADER_LEN: usize = 17;

/// 헤더의 payload_len (u16) 로 표현 가능한 최대 페이로드
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// 세그먼트 플래그
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentFlags(u8);

impl SegmentFlags {
    pub const NONE: Self = Self(0);
    /// 세션 시작 (순서 번호를 소비하지 않음)
    pub const SYN: Self = Self(0b01);
    /// 스트림 끝 (순서 번호 하나를 소비)
    pub const FIN: Self = Self(0b10);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & (Self::SYN.0 | Self::FIN.0))
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl std::ops::BitOr for SegmentFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// 세그먼트 헤더 (와이어 포맷)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentHeader {
    /// 매직 넘버
    pub magic: u32,

    /// 프로토콜 버전
    pub version: u8,

    /// 메시지 타입 (항상 Data)
    pub msg_type: u8,

    /// 플래그 비트
    pub flags: u8,

    /// 순서 번호
    pub seq: SeqNum,

    /// 페이로드 길이
    pub payload_len: u16,

    /// CRC32 체크섬 (seq, flags, payload)
    pub checksum: u32,
}

/// 세그먼트 (수신 후 불변)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    seq: SeqNum,
    flags: SegmentFlags,
    payload: Bytes,
    checksum: u32,
}

impl Segment {
    /// 새 세그먼트 생성 (체크섬 자동 계산)
    ///
    /// 페이로드는 `MAX_PAYLOAD_LEN` 이하여야 한다. 외부 입력은 `try_data` 로 검사할 것
    pub fn new(seq: SeqNum, flags: SegmentFlags, payload: Bytes) -> Self {
        let checksum = compute_checksum(seq, flags, &payload);
        Self {
            seq,
            flags,
            payload,
            checksum,
        }
    }

    /// 데이터 세그먼트
    pub fn data(seq: SeqNum, payload: impl Into<Bytes>) -> Self {
        Self::new(seq, SegmentFlags::NONE, payload.into())
    }

    /// 길이를 검사하는 데이터 세그먼트 생성
    pub fn try_data(seq: SeqNum, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self::new(seq, SegmentFlags::NONE, payload))
    }

    /// 세션 시작 세그먼트
    pub fn syn(seq: SeqNum) -> Self {
        Self::new(seq, SegmentFlags::SYN, Bytes::new())
    }

    /// 스트림 종료 세그먼트
    pub fn fin(seq: SeqNum) -> Self {
        Self::new(seq, SegmentFlags::FIN, Bytes::new())
    }

    pub fn seq(&self) -> SeqNum {
        self.seq
    }

    pub fn flags(&self) -> SegmentFlags {
        self.flags
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn is_syn(&self) -> bool {
        self.flags.contains(SegmentFlags::SYN)
    }

    pub fn is_fin(&self) -> bool {
        self.flags.contains(SegmentFlags::FIN)
    }

    /// 페이로드 소유권 이전
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// 체크섬을 일부러 어긋나게 만든 사본 (손상 시뮬레이션용)
    pub fn corrupted(&self) -> Self {
        Self {
            checksum: !self.checksum,
            ..self.clone()
        }
    }

    /// 바이트로 직렬화
    pub fn encode(&self) -> Vec<u8> {
        let header = SegmentHeader {
            magic: MAGIC_NUMBER,
            version: PROTOCOL_VERSION,
            msg_type: MessageType::Data as u8,
            flags: self.flags.bits(),
            seq: self.seq,
            payload_len: self.payload.len() as u16,
            checksum: self.checksum,
        };
        let header_bytes = bincode::serialize(&header).unwrap_or_default();

        let mut buf = Vec::with_capacity(header_bytes.len() + self.payload.len());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// 바이트에서 역직렬화 + 검증
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Corruption::Truncated { len: bytes.len() }.into());
        }

        let header: SegmentHeader = bincode::deserialize(&bytes[..HEADER_LEN])?;

        if header.magic != MAGIC_NUMBER {
            return Err(Corruption::BadMagic {
                expected: MAGIC_NUMBER,
                got: header.magic,
            }
            .into());
        }
        if header.version != PROTOCOL_VERSION {
            return Err(Corruption::BadVersion {
                expected: PROTOCOL_VERSION,
                got: header.version,
            }
            .into());
        }
        if header.msg_type != MessageType::Data as u8 {
            return Err(Corruption::UnexpectedType {
                got: header.msg_type,
            }
            .into());
        }

        let payload = &bytes[HEADER_LEN..];
        if payload.len() != header.payload_len as usize {
            return Err(Corruption::LengthMismatch {
                declared: header.payload_len as usize,
                actual: payload.len(),
            }
            .into());
        }

        let flags = SegmentFlags::from_bits(header.flags);
        let actual = compute_checksum(header.seq, flags, payload);
        if actual != header.checksum {
            return Err(Corruption::ChecksumMismatch {
                expected: header.checksum,
                got: actual,
            }
            .into());
        }

        Ok(Self {
            seq: header.seq,
            flags,
            payload: Bytes::copy_from_slice(payload),
            checksum: header.checksum,
        })
    }
}

/// seq, flags, payload 에 대한 CRC32
fn compute_checksum(seq: SeqNum, flags: SegmentFlags, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&seq.to_le_bytes());
    hasher.update(&[flags.bits()]);
    hasher.update(payload);
    hasher.finalize()
}

/// 데이터를 세그먼트 목록으로 분할 (송신측)
pub fn split_into_segments(first_seq: SeqNum, data: &[u8], max_payload: usize) -> Vec<Segment> {
    data.chunks(max_payload.clamp(1, MAX_PAYLOAD_LEN))
        .enumerate()
        .map(|(idx, part)| {
            Segment::data(
                first_seq.wrapping_add(idx as SeqNum),
                Bytes::copy_from_slice(part),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_roundtrip() {
        let segment = Segment::data(7, Bytes::from_static(b"hello"));

        let bytes = segment.encode();
        assert_eq!(bytes.len(), HEADER_LEN + 5);

        let restored = Segment::decode(&bytes).unwrap();
        assert_eq!(restored, segment);
        assert!(!restored.is_fin());
    }

    #[test]
    fn test_fin_flag_survives_codec() {
        let restored = Segment::decode(&Segment::fin(42).encode()).unwrap();
        assert!(restored.is_fin());
        assert!(!restored.is_syn());
        assert_eq!(restored.seq(), 42);
        assert!(restored.payload().is_empty());
    }

    #[test]
    fn test_flipped_payload_bit_is_corrupt() {
        let mut bytes = Segment::data(1, Bytes::from_static(b"abcdef")).encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        match Segment::decode(&bytes) {
            Err(Error::CorruptSegment(Corruption::ChecksumMismatch { .. })) => {}
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_tampered_sequence_is_corrupt() {
        let mut bytes = Segment::data(1, Bytes::from_static(b"abc")).encode();
        // seq 필드는 magic(4) + version(1) + type(1) + flags(1) 뒤
        bytes[7] = 9;

        assert!(Segment::decode(&bytes).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_truncated_and_length_mismatch() {
        let bytes = Segment::data(3, Bytes::from_static(b"payload")).encode();

        match Segment::decode(&bytes[..10]) {
            Err(Error::CorruptSegment(Corruption::Truncated { len: 10 })) => {}
            other => panic!("expected truncated, got {:?}", other),
        }

        match Segment::decode(&bytes[..bytes.len() - 2]) {
            Err(Error::CorruptSegment(Corruption::LengthMismatch { declared: 7, actual: 5 })) => {}
            other => panic!("expected length mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_copy_fails_checksum() {
        let segment = Segment::data(5, Bytes::from_static(b"x"));
        assert!(Segment::decode(&segment.corrupted().encode())
            .unwrap_err()
            .is_corrupt());
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = Segment::data(0, Bytes::new()).encode();
        bytes[0] = 0;

        assert!(matches!(
            Segment::decode(&bytes),
            Err(Error::CorruptSegment(Corruption::BadMagic { .. }))
        ));
    }

    #[test]
    fn test_split_into_segments() {
        let data: Vec<u8> = (0..250).map(|i| i as u8).collect();
        let segments = split_into_segments(u32::MAX - 1, &data, 100);

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].seq(), u32::MAX - 1);
        assert_eq!(segments[1].seq(), u32::MAX);
        assert_eq!(segments[2].seq(), 0);
        assert_eq!(segments[2].payload().len(), 50);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let too_big = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            Segment::try_data(0, too_big),
            Err(Error::PayloadTooLarge { len, max }) if len == MAX_PAYLOAD_LEN + 1 && max == MAX_PAYLOAD_LEN
        ));

        let largest = Segment::try_data(0, vec![7u8; MAX_PAYLOAD_LEN]).unwrap();
        let decoded = Segment::decode(&largest.encode()).unwrap();
        assert_eq!(decoded.payload().len(), MAX_PAYLOAD_LEN);

        // 분할 시에도 헤더 한도를 넘지 않음
        let parts = split_into_segments(0, &vec![1u8; MAX_PAYLOAD_LEN + 10], usize::MAX);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].payload().len(), 10);
    }
}
