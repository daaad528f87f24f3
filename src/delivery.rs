//! 순서 보장 전달
//!
//! - base 부터 연속된 세그먼트를 윈도우에서 꺼내 애플리케이션 싱크로 전달
//! - 싱크가 거부하면(백프레셔) 제한된 대기 큐에 보관, 큐 초과 시 OverflowPolicy 적용

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::OverflowPolicy;
use crate::segment::SeqNum;
use crate::window::ReceiveWindow;
use crate::{Error, Result};

/// 애플리케이션으로 전달되는 순서 보장 데이터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub seq: SeqNum,
    pub payload: Bytes,
}

/// 싱크의 수락 여부
#[derive(Debug)]
pub enum Offer {
    Accepted,

    /// 가득 참. 거부된 항목을 돌려줌
    Full(Delivery),
}

/// 애플리케이션 싱크 (순서대로 정렬된 페이로드 수신자)
///
/// `offer` 는 블로킹하면 안 된다. 수용할 수 없으면 `Offer::Full` 로 돌려준다.
pub trait ApplicationSink: Send {
    fn offer(&mut self, delivery: Delivery) -> Result<Offer>;

    /// 버퍼된 데이터 내려쓰기 (FIN 없이 정지할 때)
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// 스트림 끝 (FIN 이후 모든 전달 완료)
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: ApplicationSink + ?Sized> ApplicationSink for Box<S> {
    fn offer(&mut self, delivery: Delivery) -> Result<Offer> {
        (**self).offer(delivery)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// 전달 채널 수신기 타입
pub type DeliveryReceiver = mpsc::Receiver<Delivery>;

/// tokio 채널 싱크
pub struct ChannelSink {
    tx: mpsc::Sender<Delivery>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Delivery>) -> Self {
        Self { tx }
    }

    /// 용량 `capacity` 의 채널과 싱크 생성
    pub fn channel(capacity: usize) -> (Self, DeliveryReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl ApplicationSink for ChannelSink {
    fn offer(&mut self, delivery: Delivery) -> Result<Offer> {
        match self.tx.try_send(delivery) {
            Ok(()) => Ok(Offer::Accepted),
            Err(mpsc::error::TrySendError::Full(delivery)) => Ok(Offer::Full(delivery)),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::SinkClosed),
        }
    }
}

/// 파일 싱크 (수신 스트림을 그대로 파일에 기록)
pub struct FileSink {
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            bytes_written: 0,
        })
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl ApplicationSink for FileSink {
    fn offer(&mut self, delivery: Delivery) -> Result<Offer> {
        self.writer.write_all(&delivery.payload)?;
        self.bytes_written += delivery.payload.len() as u64;
        Ok(Offer::Accepted)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        debug!("파일 싱크 완료: {} bytes", self.bytes_written);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    deliveries: Vec<Delivery>,
    finished: bool,
}

/// 메모리 싱크 (공유 가능, 선택적 용량 제한)
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryInner>>,
    limit: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 미소비 항목이 `limit` 개에 도달하면 Full 을 반환하는 싱크
    pub fn bounded(limit: usize) -> Self {
        Self {
            inner: Arc::default(),
            limit: Some(limit),
        }
    }

    /// 지금까지 받은 항목의 순서 번호
    pub fn seqs(&self) -> Vec<SeqNum> {
        self.inner.lock().deliveries.iter().map(|d| d.seq).collect()
    }

    /// 이어 붙인 페이로드
    pub fn bytes(&self) -> Vec<u8> {
        self.inner
            .lock()
            .deliveries
            .iter()
            .flat_map(|d| d.payload.iter().copied())
            .collect()
    }

    /// 애플리케이션 소비 흉내: 쌓인 항목을 모두 가져감
    pub fn take(&self) -> Vec<Delivery> {
        std::mem::take(&mut self.inner.lock().deliveries)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }
}

impl ApplicationSink for MemorySink {
    fn offer(&mut self, delivery: Delivery) -> Result<Offer> {
        let mut inner = self.inner.lock();
        if let Some(limit) = self.limit {
            if inner.deliveries.len() >= limit {
                return Ok(Offer::Full(delivery));
            }
        }
        inner.deliveries.push(delivery);
        Ok(Offer::Accepted)
    }

    fn finish(&mut self) -> Result<()> {
        self.inner.lock().finished = true;
        Ok(())
    }
}

/// 한 번의 release 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Release {
    /// 싱크가 수락한 항목 수
    pub delivered: usize,

    /// 윈도우에서 꺼낸 세그먼트 수 (base 전진 폭)
    pub advanced: u32,

    /// 대기 큐에서 버려진 항목 수 (DropOldest)
    pub dropped: usize,

    /// FIN 을 순서대로 꺼냈는지
    pub fin: bool,
}

/// 전달 순서기
#[derive(Debug)]
pub struct DeliverySequencer {
    pending: VecDeque<Delivery>,
    capacity: usize,
    policy: OverflowPolicy,
    delivered_segments: u64,
    delivered_bytes: u64,
    dropped: u64,
}

impl DeliverySequencer {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            pending: VecDeque::with_capacity(capacity),
            capacity,
            policy,
            delivered_segments: 0,
            delivered_bytes: 0,
            dropped: 0,
        }
    }

    /// 싱크에 아직 넘기지 못한 항목 수
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn delivered_segments(&self) -> u64 {
        self.delivered_segments
    }

    pub fn delivered_bytes(&self) -> u64 {
        self.delivered_bytes
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// 대기 큐를 싱크로 밀어냄. 싱크가 거부하면 멈춤
    pub fn flush<S: ApplicationSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize> {
        let mut delivered = 0;

        while let Some(delivery) = self.pending.pop_front() {
            let len = delivery.payload.len() as u64;
            match sink.offer(delivery)? {
                Offer::Accepted => {
                    delivered += 1;
                    self.delivered_segments += 1;
                    self.delivered_bytes += len;
                }
                Offer::Full(delivery) => {
                    self.pending.push_front(delivery);
                    break;
                }
            }
        }

        Ok(delivered)
    }

    /// base 부터 연속된 세그먼트를 전달하고 base 를 전진
    pub fn release<S: ApplicationSink + ?Sized>(
        &mut self,
        window: &mut ReceiveWindow,
        sink: &mut S,
    ) -> Result<Release> {
        let mut release = Release {
            delivered: self.flush(sink)?,
            ..Release::default()
        };

        while window.has_next() {
            if self.pending.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::RejectNewest => {
                        debug!(
                            "전달 대기 큐 가득 참 ({}), base={} 에서 정지",
                            self.pending.len(),
                            window.base()
                        );
                        break;
                    }
                    OverflowPolicy::DropOldest => {
                        if let Some(old) = self.pending.pop_front() {
                            warn!("전달 대기 큐 초과: seq={} 버림", old.seq);
                            self.dropped += 1;
                            release.dropped += 1;
                        }
                    }
                }
            }

            let Some(segment) = window.pop_next() else {
                break;
            };
            release.advanced += 1;

            if segment.is_fin() {
                release.fin = true;
                continue;
            }

            self.pending.push_back(Delivery {
                seq: segment.seq(),
                payload: segment.into_payload(),
            });
            release.delivered += self.flush(sink)?;
        }

        Ok(release)
    }
}
