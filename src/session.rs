//! 수신 세션
//!
//! 코덱, 윈도우, 전달 순서기, ACK 생성기를 묶는 단일 작성자 상태 기계.
//!
//! ```text
//! LISTENING ──SYN / 첫 데이터──▶ ESTABLISHED ──FIN 전달──▶ CLOSING ──전달 완료──▶ CLOSED
//! ```

use std::fmt;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::ack::{Ack, AckGenerator};
use crate::delivery::{ApplicationSink, DeliverySequencer};
use crate::segment::Segment;
use crate::stats::ReceiverStats;
use crate::window::{Admission, ReceiveWindow};
use crate::{Config, Error, Result};

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// 첫 세그먼트 대기
    #[default]
    Listening,
    /// 데이터 수신 중
    Established,
    /// FIN 까지 꺼냈고 남은 전달을 비우는 중
    Closing,
    /// 스트림 종료
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Listening => "LISTENING",
            SessionState::Established => "ESTABLISHED",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// 세그먼트 하나에 대한 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEvent {
    /// SYN 으로 윈도우가 설정됨
    Handshake,
    /// 윈도우에 새로 들어감
    Buffered,
    /// 이미 받은 세그먼트
    Duplicate,
    /// 윈도우 밖 (stale = 이미 전달된 구간)
    OutOfWindow { stale: bool },
    /// 체크섬/형식 오류
    Corrupt,
    /// 핸드셰이크 전 데이터
    Ignored,
}

/// 데이터그램 처리 후 호출자가 할 일
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaction {
    pub event: SegmentEvent,

    /// 이번에 애플리케이션으로 전달된 세그먼트 수
    pub delivered: usize,

    /// 송신자에게 보낼 ACK
    pub ack: Option<Ack>,
}

/// 수신 세션
pub struct Session<S: ApplicationSink> {
    config: Config,
    state: SessionState,
    window: ReceiveWindow,
    sequencer: DeliverySequencer,
    acks: AckGenerator,
    sink: S,
    stats: ReceiverStats,
}

impl<S: ApplicationSink> Session<S> {
    pub fn new(config: Config, sink: S) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            window: ReceiveWindow::new(config.initial_sequence, config.window_size),
            sequencer: DeliverySequencer::new(
                config.delivery_queue_capacity,
                config.overflow_policy,
            ),
            acks: {
                let mut acks = AckGenerator::new(config.selective_ack);
                acks.anchor(Some(config.initial_sequence));
                acks
            },
            sink,
            stats: ReceiverStats::new(),
            state: SessionState::Listening,
            config,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn window(&self) -> &ReceiveWindow {
        &self.window
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// 아직 싱크에 넘기지 못한 전달 수
    pub fn pending_deliveries(&self) -> usize {
        self.sequencer.pending()
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// 원시 데이터그램 처리 (유일한 변경 진입점)
    pub fn on_datagram(&mut self, datagram: &[u8]) -> Result<Reaction> {
        self.stats.datagrams += 1;
        self.stats.last_activity = Some(Instant::now());

        match Segment::decode(datagram) {
            Ok(segment) => self.on_segment(segment),
            Err(e) if e.is_corrupt() || matches!(e, Error::Serialization(_)) => {
                self.stats.corrupt_segments += 1;
                warn!("손상된 세그먼트 버림: {}", e);

                let ack = if self.config.ack_on_corrupt && self.state != SessionState::Listening {
                    Some(self.emit_ack())
                } else {
                    None
                };
                Ok(Reaction {
                    event: SegmentEvent::Corrupt,
                    delivered: 0,
                    ack,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// 디코딩된 세그먼트 처리
    pub fn on_segment(&mut self, segment: Segment) -> Result<Reaction> {
        match self.state {
            SessionState::Listening => {
                if segment.is_syn() {
                    self.window.reset(segment.seq());
                    self.acks.anchor(None);
                    self.transition(SessionState::Established);
                    return Ok(Reaction {
                        event: SegmentEvent::Handshake,
                        delivered: 0,
                        ack: Some(self.emit_ack()),
                    });
                }
                if self.config.require_handshake {
                    self.stats.ignored_segments += 1;
                    debug!("핸드셰이크 전 세그먼트 무시: seq={}", segment.seq());
                    return Ok(Reaction {
                        event: SegmentEvent::Ignored,
                        delivered: 0,
                        ack: None,
                    });
                }
                self.transition(SessionState::Established);
            }
            _ if segment.is_syn() => {
                // 재전송된 SYN: 현재 누적 값으로 응답
                self.stats.duplicate_segments += 1;
                return Ok(Reaction {
                    event: SegmentEvent::Duplicate,
                    delivered: 0,
                    ack: Some(self.emit_ack()),
                });
            }
            _ => {}
        }

        let seq = segment.seq();
        let event = match self.window.accept(segment) {
            Ok(Admission::Buffered { .. }) => {
                self.stats.segments_buffered += 1;
                debug!("세그먼트 {} 버퍼링 (base={})", seq, self.window.base());
                SegmentEvent::Buffered
            }
            Ok(Admission::Duplicate) => {
                self.stats.duplicate_segments += 1;
                debug!("중복 세그먼트 {}", seq);
                SegmentEvent::Duplicate
            }
            Err(Error::OutOfWindow {
                base, limit, stale, ..
            }) => {
                if stale {
                    self.stats.stale_segments += 1;
                } else {
                    self.stats.beyond_window_segments += 1;
                }
                debug!("윈도우 밖 세그먼트 {} (base={}, limit={})", seq, base, limit);
                SegmentEvent::OutOfWindow { stale }
            }
            Err(e) => return Err(e),
        };

        let delivered = self.advance()?;
        Ok(Reaction {
            event,
            delivered,
            ack: Some(self.emit_ack()),
        })
    }

    /// 막혀 있던 전달 재시도. base 가 움직였으면 윈도우 갱신 ACK 반환
    pub fn pump(&mut self) -> Result<Option<Ack>> {
        if matches!(self.state, SessionState::Listening | SessionState::Closed) {
            return Ok(None);
        }

        let before = self.window.base();
        self.advance()?;

        if self.window.base() != before {
            Ok(Some(self.emit_ack()))
        } else {
            Ok(None)
        }
    }

    /// 대기 큐와 윈도우에 남은 연속 구간을 싱크로 밀어냄.
    /// 둘 다 비었으면 true
    pub fn flush(&mut self) -> Result<bool> {
        self.advance()?;
        Ok(self.sequencer.is_drained() && !self.window.has_next())
    }

    /// 싱크 버퍼를 내려씀 (정지 시)
    pub fn flush_sink(&mut self) -> Result<()> {
        self.sink.flush()
    }

    fn advance(&mut self) -> Result<usize> {
        let release = self.sequencer.release(&mut self.window, &mut self.sink)?;

        if release.fin && self.state == SessionState::Established {
            info!("FIN 수신: 스트림 끝 seq={}", self.window.base().wrapping_sub(1));
            self.transition(SessionState::Closing);
        }
        self.try_finish()?;
        self.sync_stats();

        Ok(release.delivered)
    }

    fn try_finish(&mut self) -> Result<()> {
        if self.state == SessionState::Closing && self.sequencer.is_drained() {
            self.sink.finish()?;
            self.transition(SessionState::Closed);
        }
        Ok(())
    }

    fn emit_ack(&mut self) -> Ack {
        let ack = self.acks.generate(&self.window);
        self.stats.acks_sent += 1;
        if ack.duplicate {
            self.stats.duplicate_acks += 1;
        }
        ack
    }

    fn sync_stats(&mut self) {
        self.stats.delivered_segments = self.sequencer.delivered_segments();
        self.stats.delivered_bytes = self.sequencer.delivered_bytes();
        self.stats.dropped_deliveries = self.sequencer.dropped();
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("세션 상태 {} -> {}", self.state, next);
            self.state = next;
        }
    }
}
