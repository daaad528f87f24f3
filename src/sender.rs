//! 송신자 (Go-Back-N)
//!
//! - 데이터를 고정 크기 세그먼트로 나눠 윈도우만큼 전송
//! - 누적 ACK 로 윈도우를 밀고, 타임아웃 시 윈도우 전체 재전송
//! - 마지막에 FIN (순서 번호 하나 소비) 으로 스트림 종료
//! - 손상/손실 시뮬레이션 옵션 (첫 전송만 적용)

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::message::{AckMessage, MessageType};
use crate::segment::{split_into_segments, Segment, SeqNum};
use crate::transport::UdpTransport;
use crate::{Config, Error, Result};

/// 전송 결과
#[derive(Debug, Clone, Default)]
pub struct SendReport {
    /// 보낸 세그먼트 수 (FIN 포함, 재전송 제외)
    pub segments: u64,

    /// 재전송 횟수
    pub retransmissions: u64,

    /// 페이로드 바이트
    pub bytes: u64,

    /// 타임아웃 횟수
    pub timeouts: u64,

    /// 소요 시간
    pub elapsed: Duration,
}

/// Go-Back-N 송신자
pub struct Sender {
    config: Config,
    transport: UdpTransport,
    handshake: bool,
    corrupt_list: HashSet<SeqNum>,
    loss_rate: f64,
}

impl Sender {
    pub async fn bind(config: Config, bind_addr: SocketAddr) -> Result<Self> {
        config.validate()?;
        let transport = UdpTransport::bind(bind_addr).await?;

        Ok(Self {
            config,
            transport,
            handshake: false,
            corrupt_list: HashSet::new(),
            loss_rate: 0.0,
        })
    }

    /// 데이터 전송 전에 SYN 교환
    pub fn with_handshake(mut self, handshake: bool) -> Self {
        self.handshake = handshake;
        self
    }

    /// 지정된 순서 번호의 첫 전송을 손상시킴
    pub fn with_corrupt_list(mut self, seqs: impl IntoIterator<Item = SeqNum>) -> Self {
        self.corrupt_list = seqs.into_iter().collect();
        self
    }

    /// 첫 전송을 확률적으로 누락
    pub fn with_loss_rate(mut self, loss_rate: f64) -> Self {
        self.loss_rate = loss_rate.clamp(0.0, 1.0);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// 전체 데이터를 전송하고 FIN 까지 확인받음
    pub async fn send(&mut self, dest: SocketAddr, data: &[u8]) -> Result<SendReport> {
        let start = Instant::now();
        let first_seq = self.config.initial_sequence;
        let mut report = SendReport::default();

        if self.handshake {
            self.handshake(dest, first_seq, &mut report).await?;
        }

        let mut segments = split_into_segments(first_seq, data, self.config.max_payload_size);
        let fin_seq = first_seq.wrapping_add(segments.len() as SeqNum);
        segments.push(Segment::fin(fin_seq));

        let total = segments.len();
        let window = self.config.window_size as usize;
        let rto = Duration::from_millis(self.config.retransmit_timeout_ms);

        info!(
            "Sending {} bytes in {} segments to {} (window={})",
            data.len(),
            total,
            dest,
            window
        );

        let mut base = 0usize;
        let mut next = 0usize;
        let mut attempts = 0u32;
        let mut buf = vec![0u8; 64];

        while base < total {
            // 윈도우 채우기
            while next < total && next < base + window {
                self.transmit_first(&segments[next], dest).await?;
                report.segments += 1;
                report.bytes += segments[next].payload().len() as u64;
                next += 1;
            }

            match self.recv_ack(&mut buf, rto).await? {
                Some(ack) => {
                    let acked = ack.cumulative.wrapping_sub(first_seq) as usize;
                    if acked > base && acked <= next {
                        debug!("ACK {}: base {} -> {}", ack.cumulative, base, acked);
                        base = acked;
                        attempts = 0;
                    }
                }
                None => {
                    attempts += 1;
                    report.timeouts += 1;
                    if attempts > self.config.max_retransmits {
                        return Err(Error::RetransmitLimit {
                            base: segments[base].seq(),
                            attempts,
                        });
                    }

                    warn!(
                        "ACK 타임아웃, 윈도우 재전송: seq {}..{}",
                        segments[base].seq(),
                        segments[next - 1].seq()
                    );
                    for segment in &segments[base..next] {
                        self.transport.send_to(&segment.encode(), dest).await?;
                        report.retransmissions += 1;
                    }
                }
            }
        }

        report.elapsed = start.elapsed();
        info!(
            "Transfer complete: {} segments, {} retransmissions, {:.2}s",
            report.segments,
            report.retransmissions,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    async fn handshake(
        &self,
        dest: SocketAddr,
        first_seq: SeqNum,
        report: &mut SendReport,
    ) -> Result<()> {
        let syn = Segment::syn(first_seq).encode();
        let rto = Duration::from_millis(self.config.retransmit_timeout_ms);
        let mut buf = vec![0u8; 64];

        for attempt in 0..=self.config.max_retransmits {
            if attempt > 0 {
                report.retransmissions += 1;
                debug!("SYN 재전송 #{}", attempt);
            }
            self.transport.send_to(&syn, dest).await?;

            if let Some(ack) = self.recv_ack(&mut buf, rto).await? {
                if ack.cumulative == first_seq {
                    debug!("SYN 확인: base={}", first_seq);
                    return Ok(());
                }
            } else {
                report.timeouts += 1;
            }
        }

        Err(Error::RetransmitLimit {
            base: first_seq,
            attempts: self.config.max_retransmits + 1,
        })
    }

    /// 첫 전송 (손상/손실 시뮬레이션 적용)
    async fn transmit_first(&self, segment: &Segment, dest: SocketAddr) -> Result<()> {
        if self.corrupt_list.contains(&segment.seq()) {
            debug!("세그먼트 {} 손상시켜 전송", segment.seq());
            self.transport.send_to(&segment.corrupted().encode(), dest).await?;
            return Ok(());
        }
        if self.loss_rate > 0.0 && rand::thread_rng().gen_bool(self.loss_rate) {
            debug!("세그먼트 {} 누락 시뮬레이션", segment.seq());
            return Ok(());
        }
        self.transport.send_to(&segment.encode(), dest).await?;
        Ok(())
    }

    /// 제한 시간 내 ACK 수신. ACK 가 아닌 데이터그램은 건너뜀
    async fn recv_ack(&self, buf: &mut [u8], timeout: Duration) -> Result<Option<AckMessage>> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let Some((len, _)) = self.transport.recv_timeout(buf, remaining).await? else {
                return Ok(None);
            };

            if crate::message::peek_type(&buf[..len]) != Some(MessageType::Ack) {
                continue;
            }
            match AckMessage::decode(&buf[..len]) {
                Ok(ack) => return Ok(Some(ack)),
                Err(e) => debug!("잘못된 ACK 무시: {}", e),
            }
        }
    }
}
