//! 수신 윈도우 버퍼
//!
//! `[base, base + size)` 범위의 순서 번호만 받아들이고, 순서가 어긋난 세그먼트는
//! base 로부터의 오프셋 위치 슬롯에 보관한다. 순서 번호는 순환(serial) 산술로
//! 비교하므로 u32 경계를 넘어가도 동작한다.

use std::collections::VecDeque;

use crate::segment::{Segment, SeqNum};
use crate::{Error, Result};

/// SACK 비트맵이 덮는 슬롯 수
pub const SACK_SPAN: u32 = 64;

/// 세그먼트 수락 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// 새로 버퍼링됨. `contiguous` 면 base 에 위치해 즉시 전진 가능
    Buffered { contiguous: bool },

    /// 이미 버퍼에 있는 순서 번호 (상태 변화 없음)
    Duplicate,
}

/// 수신 윈도우
#[derive(Debug)]
pub struct ReceiveWindow {
    /// 다음에 전달할 순서 번호
    base: SeqNum,

    /// 윈도우 크기 (슬롯 수)
    size: u32,

    /// slot[i] = base + i
    slots: VecDeque<Option<Segment>>,

    /// 버퍼링된 세그먼트 수
    buffered: usize,

    /// 수신한 FIN 의 순서 번호 (이후 번호는 윈도우 밖)
    fin_seq: Option<SeqNum>,
}

impl ReceiveWindow {
    pub fn new(base: SeqNum, size: u32) -> Self {
        let size = size.max(1);
        Self {
            base,
            size,
            slots: (0..size).map(|_| None).collect(),
            buffered: 0,
            fin_seq: None,
        }
    }

    pub fn base(&self) -> SeqNum {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// 버퍼링된 세그먼트 수
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// 남은 빈 슬롯 수
    pub fn available(&self) -> u32 {
        self.size - self.buffered as u32
    }

    /// 받아들일 수 있는 순서 번호의 상한 (미포함)
    pub fn limit(&self) -> SeqNum {
        let end = self.base.wrapping_add(self.size);
        match self.fin_seq {
            Some(fin) => {
                let fin_end = fin.wrapping_add(1);
                if fin_end.wrapping_sub(self.base) < end.wrapping_sub(self.base) {
                    fin_end
                } else {
                    end
                }
            }
            None => end,
        }
    }

    /// FIN 이후로 더 받을 것이 없는지
    pub fn is_finished(&self) -> bool {
        self.fin_seq
            .map(|fin| fin.wrapping_add(1) == self.base)
            .unwrap_or(false)
    }

    /// 세그먼트 수락
    pub fn accept(&mut self, segment: Segment) -> Result<Admission> {
        let seq = segment.seq();
        let offset = seq.wrapping_sub(self.base);
        let span = self.limit().wrapping_sub(self.base);

        if offset >= span {
            let behind = self.base.wrapping_sub(seq);
            return Err(Error::OutOfWindow {
                seq,
                base: self.base,
                limit: self.limit(),
                stale: behind != 0 && behind <= u32::MAX / 2,
            });
        }

        let slot = &mut self.slots[offset as usize];
        if slot.is_some() {
            return Ok(Admission::Duplicate);
        }

        if segment.is_fin() {
            // FIN 이후로 이미 받아 둔 세그먼트가 있으면 모순이므로 FIN 을 무시
            let beyond = self
                .slots
                .iter()
                .skip(offset as usize + 1)
                .any(Option::is_some);
            if beyond {
                return Err(Error::OutOfWindow {
                    seq,
                    base: self.base,
                    limit: self.limit(),
                    stale: false,
                });
            }
            self.fin_seq = Some(seq);
        }

        self.slots[offset as usize] = Some(segment);
        self.buffered += 1;
        Ok(Admission::Buffered {
            contiguous: offset == 0,
        })
    }

    /// base 위치에 세그먼트가 있는지
    pub fn has_next(&self) -> bool {
        matches!(self.slots.front(), Some(Some(_)))
    }

    /// base 위치의 세그먼트를 꺼내고 base 를 한 칸 전진
    pub fn pop_next(&mut self) -> Option<Segment> {
        if !self.has_next() {
            return None;
        }
        let segment = self.slots.pop_front().flatten();
        self.slots.push_back(None);
        self.buffered -= 1;
        self.base = self.base.wrapping_add(1);
        segment
    }

    /// base 다음 슬롯들의 수신 여부 비트맵 (bit i = base + 1 + i)
    pub fn selective_bitmap(&self) -> u64 {
        self.slots
            .iter()
            .skip(1)
            .take(SACK_SPAN as usize)
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .fold(0u64, |bits, (i, _)| bits | (1u64 << i))
    }

    /// 버퍼링된 순서 번호 목록 (base 부터 오름차순)
    pub fn buffered_seqs(&self) -> Vec<SeqNum> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| self.base.wrapping_add(i as SeqNum))
            .collect()
    }

    /// 비어 있는 윈도우를 새 base 로 재설정 (SYN)
    pub fn reset(&mut self, base: SeqNum) {
        self.base = base;
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.buffered = 0;
        self.fin_seq = None;
    }
}
