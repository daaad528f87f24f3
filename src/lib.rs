//! # SWR (Sliding Window Receiver)
//!
//! UDP 기반 슬라이딩 윈도우 신뢰 전송 수신자
//!
//! ## 핵심 특징
//! - **선택적 버퍼링**: 순서가 어긋난 세그먼트를 윈도우 안에 보관
//! - **순서 보장 전달**: base 부터 연속된 데이터만 애플리케이션으로 전달
//! - **누적 ACK + SACK**: 다음 기대 순서 번호와 선택적 수신 비트맵
//! - **CRC32 검증**: 손상된 세그먼트는 버리고 중복 ACK 로 응답
//! - **백프레셔**: 제한된 전달 큐와 초과 정책
//! - **Go-Back-N 송신자**: 종단 간 검증용 상대편

pub mod ack;
pub mod config;
pub mod delivery;
pub mod error;
pub mod message;
pub mod receiver;
pub mod segment;
pub mod sender;
pub mod session;
pub mod stats;
pub mod transport;
pub mod window;

pub use ack::{Ack, AckGenerator};
pub use config::{Config, OverflowPolicy};
pub use delivery::{
    ApplicationSink, ChannelSink, Delivery, DeliveryReceiver, DeliverySequencer, FileSink,
    MemorySink, Offer,
};
pub use error::{Corruption, Error, Result};
pub use message::{AckMessage, MessageType};
pub use receiver::{Receiver, StopHandle};
pub use segment::{Segment, SegmentFlags, SeqNum};
pub use sender::{SendReport, Sender};
pub use session::{Reaction, SegmentEvent, Session, SessionState};
pub use stats::ReceiverStats;
pub use transport::UdpTransport;
pub use window::{Admission, ReceiveWindow};

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 기본 수신 윈도우 크기 (세그먼트 수)
pub const DEFAULT_WINDOW_SIZE: u32 = 8;

/// 기본 세그먼트 페이로드 크기 (바이트)
pub const DEFAULT_PAYLOAD_SIZE: usize = 1024;

/// 매직 넘버 (패킷 식별용)
pub const MAGIC_NUMBER: u32 = 0x53575250; // "SWRP"
