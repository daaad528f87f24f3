//! ACK 생성기
//!
//! 매 세그먼트 처리 후 누적 ACK (= 다음에 기대하는 순서 번호) 를 만든다.
//! 기준 값(직전 ACK 또는 윈도우 시작 base)과 누적 값이 같으면 중복 ACK 로 표시한다.

use crate::message::AckMessage;
use crate::segment::SeqNum;
use crate::window::ReceiveWindow;

/// 생성된 ACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub message: AckMessage,

    /// base 가 전진하지 않았음
    pub duplicate: bool,
}

impl Ack {
    pub fn cumulative(&self) -> SeqNum {
        self.message.cumulative
    }

    pub fn encode(&self) -> Vec<u8> {
        self.message.encode()
    }
}

#[derive(Debug)]
pub struct AckGenerator {
    selective: bool,
    last_cumulative: Option<SeqNum>,
    acks_generated: u64,
    duplicate_acks: u64,
}

impl AckGenerator {
    pub fn new(selective: bool) -> Self {
        Self {
            selective,
            last_cumulative: None,
            acks_generated: 0,
            duplicate_acks: 0,
        }
    }

    /// 기준 누적 값 지정. 이후 base 가 그대로면 첫 ACK 도 중복으로 본다.
    /// `None` 이면 다음 ACK 는 중복이 아님 (SYN 으로 윈도우를 다시 잡은 경우)
    pub fn anchor(&mut self, base: Option<SeqNum>) {
        self.last_cumulative = base;
    }

    /// 현재 윈도우 상태로 ACK 생성
    pub fn generate(&mut self, window: &ReceiveWindow) -> Ack {
        let cumulative = window.base();
        let duplicate = self.last_cumulative == Some(cumulative);
        let sack = if self.selective {
            window.selective_bitmap()
        } else {
            0
        };

        self.last_cumulative = Some(cumulative);
        self.acks_generated += 1;
        if duplicate {
            self.duplicate_acks += 1;
        }

        Ack {
            message: AckMessage::new(cumulative, window.available(), sack),
            duplicate,
        }
    }

    /// 마지막으로 보낸 누적 값
    pub fn last_cumulative(&self) -> Option<SeqNum> {
        self.last_cumulative
    }

    pub fn acks_generated(&self) -> u64 {
        self.acks_generated
    }

    pub fn duplicate_acks(&self) -> u64 {
        self.duplicate_acks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;

    #[test]
    fn test_cumulative_and_duplicate() {
        let mut window = ReceiveWindow::new(0, 4);
        let mut acks = AckGenerator::new(true);

        let first = acks.generate(&window);
        assert_eq!(first.cumulative(), 0);
        assert!(!first.duplicate);

        // 순서가 어긋난 세그먼트: base 그대로 → 중복 ACK, SACK 비트 1
        window.accept(Segment::data(2, vec![2u8])).unwrap();
        let dup = acks.generate(&window);
        assert_eq!(dup.cumulative(), 0);
        assert!(dup.duplicate);
        assert_eq!(dup.message.sack, 0b10);
        assert_eq!(dup.message.window, 3);

        window.accept(Segment::data(0, vec![0u8])).unwrap();
        window.pop_next();
        let advanced = acks.generate(&window);
        assert_eq!(advanced.cumulative(), 1);
        assert!(!advanced.duplicate);
        assert_eq!(advanced.message.sack, 0b1);

        assert_eq!(acks.acks_generated(), 3);
        assert_eq!(acks.duplicate_acks(), 1);
    }

    #[test]
    fn test_anchored_first_ack_is_duplicate() {
        let mut window = ReceiveWindow::new(0, 4);
        let mut acks = AckGenerator::new(true);
        acks.anchor(Some(0));

        // 윈도우 밖 세그먼트가 먼저 와도 base 는 그대로
        assert!(window.accept(Segment::data(5, vec![5u8])).is_err());
        let ack = acks.generate(&window);
        assert_eq!(ack.cumulative(), 0);
        assert!(ack.duplicate);
        assert_eq!(acks.duplicate_acks(), 1);

        acks.anchor(None);
        assert!(!acks.generate(&window).duplicate);
    }

    #[test]
    fn test_selective_disabled() {
        let mut window = ReceiveWindow::new(0, 4);
        window.accept(Segment::data(3, vec![3u8])).unwrap();

        let ack = AckGenerator::new(false).generate(&window);
        assert_eq!(ack.message.sack, 0);
        assert_eq!(ack.message.window, 3);
    }
}
