//! 수신자 런타임
//!
//! - 소켓 수신 태스크, 타이머 태스크, 세션 처리 태스크로 구성
//! - 세션은 처리 태스크 하나만 소유하므로 윈도우 변경은 항상 직렬화됨
//! - 정지 시 대기 중인 전달을 비운 뒤 윈도우 해제

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ack::Ack;
use crate::delivery::{ApplicationSink, ChannelSink, DeliveryReceiver, FileSink};
use crate::session::{Session, SessionState};
use crate::stats::ReceiverStats;
use crate::transport::UdpTransport;
use crate::{Config, Error, Result};

/// 내부 명령
enum ReceiverCmd {
    Datagram(Vec<u8>, SocketAddr),
    Tick,
    Stop,
}

/// 수신자 내부 상태 (단일 태스크에서만 접근)
struct ReceiverInner<S: ApplicationSink> {
    config: Config,
    session: Session<S>,
    transport: UdpTransport,
    peer: Option<SocketAddr>,
    foreign_datagrams: u64,
    closed_at: Option<Instant>,
}

impl<S: ApplicationSink> ReceiverInner<S> {
    async fn run(
        &mut self,
        cmd_rx: &mut mpsc::Receiver<ReceiverCmd>,
        stats: &RwLock<ReceiverStats>,
        state: &RwLock<SessionState>,
    ) -> Result<()> {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                ReceiverCmd::Datagram(bytes, from) => {
                    self.handle_datagram(&bytes, from).await?;
                }
                ReceiverCmd::Tick => {
                    self.handle_tick().await?;
                    if self.lingered() {
                        debug!("종료 대기 시간 경과");
                        break;
                    }
                }
                ReceiverCmd::Stop => {
                    info!("정지 요청");
                    break;
                }
            }

            // 통계 업데이트
            *stats.write().await = self.stats();
            *state.write().await = self.session.state();
        }

        Ok(())
    }

    async fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) -> Result<()> {
        if let Some(peer) = self.peer {
            if peer != from {
                self.foreign_datagrams += 1;
                debug!("다른 피어의 데이터그램 무시: {}", from);
                return Ok(());
            }
        }

        let reaction = self.session.on_datagram(bytes)?;

        // 세션을 연 세그먼트의 송신지만 피어로 고정 (손상/무시된 데이터그램은 제외)
        if self.peer.is_none() {
            if self.session.state() == SessionState::Listening {
                debug!("세션 열기 전 데이터그램 ({:?}): {}", reaction.event, from);
                return Ok(());
            }
            info!("피어 연결: {}", from);
            self.peer = Some(from);
        }

        if let Some(ack) = reaction.ack {
            send_ack(&self.transport, ack, from).await;
        }

        if self.session.is_closed() && self.closed_at.is_none() {
            info!("스트림 종료: {}", self.session.stats().summary());
            self.closed_at = Some(Instant::now());
        }
        Ok(())
    }

    async fn handle_tick(&mut self) -> Result<()> {
        if let Some(ack) = self.session.pump()? {
            if let Some(peer) = self.peer {
                send_ack(&self.transport, ack, peer).await;
            }
        }

        if self.session.is_closed() && self.closed_at.is_none() {
            self.closed_at = Some(Instant::now());
        }

        let active = matches!(
            self.session.state(),
            SessionState::Established | SessionState::Closing
        );
        if active && self.config.idle_timeout_ms > 0 {
            let idle = self.session.stats().idle_for();
            if idle > Duration::from_millis(self.config.idle_timeout_ms) {
                return Err(Error::IdleTimeout {
                    idle_ms: idle.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    fn lingered(&self) -> bool {
        self.closed_at
            .map(|t| t.elapsed() >= Duration::from_millis(self.config.close_linger_ms))
            .unwrap_or(false)
    }

    /// 대기 중인 전달과 윈도우의 연속 구간을 제한 시간 동안 비우고 싱크를 내려씀
    async fn shutdown(&mut self) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(self.config.shutdown_flush_ms);
        let tick = Duration::from_millis(self.config.tick_interval_ms);

        loop {
            if self.session.flush()? {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "정지 시간 초과: 전달되지 못한 세그먼트 {}개 (윈도우 {}개)",
                    self.session.pending_deliveries(),
                    self.session.window().buffered()
                );
                break;
            }
            tokio::time::sleep(tick).await;
        }

        self.session.flush_sink()
    }

    fn stats(&self) -> ReceiverStats {
        let mut stats = self.session.stats().clone();
        stats.foreign_datagrams = self.foreign_datagrams;
        stats
    }
}

/// ACK 전송. 실패는 로그만 남김 (송신자가 재전송으로 복구)
async fn send_ack(transport: &UdpTransport, ack: Ack, peer: SocketAddr) {
    if let Err(e) = transport.send_to(&ack.encode(), peer).await {
        warn!("ACK 전송 실패: {}", e);
        return;
    }
    debug!(
        "ACK {} 전송{}",
        ack.cumulative(),
        if ack.duplicate { " (중복)" } else { "" }
    );
}

/// 정지 요청 전용 핸들 (복제 가능)
#[derive(Clone)]
pub struct StopHandle {
    cmd_tx: mpsc::Sender<ReceiverCmd>,
}

impl StopHandle {
    pub async fn stop(&self) {
        let _ = self.cmd_tx.send(ReceiverCmd::Stop).await;
    }
}

/// 수신자 핸들 (외부에서 제어용)
pub struct Receiver {
    cmd_tx: mpsc::Sender<ReceiverCmd>,
    stats: Arc<RwLock<ReceiverStats>>,
    state: Arc<RwLock<SessionState>>,
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    task: JoinHandle<Result<()>>,
}

impl Receiver {
    /// 새 수신자 생성 및 시작
    pub async fn start<S>(config: Config, bind_addr: SocketAddr, sink: S) -> Result<Self>
    where
        S: ApplicationSink + 'static,
    {
        let session = Session::new(config.clone(), sink)?;
        let transport = UdpTransport::bind(bind_addr).await?;
        let local_addr = transport.local_addr();

        // 채널 생성
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ReceiverCmd>(1000);

        // 공유 상태
        let stats = Arc::new(RwLock::new(ReceiverStats::new()));
        let state = Arc::new(RwLock::new(SessionState::Listening));
        let running = Arc::new(AtomicBool::new(true));

        info!(
            "SWR Receiver started on {} (window={})",
            local_addr, config.window_size
        );

        let mut inner = ReceiverInner {
            config: config.clone(),
            session,
            transport: transport.clone(),
            peer: None,
            foreign_datagrams: 0,
            closed_at: None,
        };

        // 수신 태스크
        let cmd_tx_recv = cmd_tx.clone();
        let running_recv = running.clone();
        let poll = Duration::from_millis(config.tick_interval_ms);
        let buf_size = config.recv_buffer_size;

        tokio::spawn(async move {
            let mut buf = vec![0u8; buf_size];

            while running_recv.load(Ordering::SeqCst) {
                match transport.recv_timeout(&mut buf, poll).await {
                    Ok(Some((len, addr))) => {
                        let cmd = ReceiverCmd::Datagram(buf[..len].to_vec(), addr);
                        if cmd_tx_recv.send(cmd).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        // 타임아웃, 계속
                    }
                    Err(e) => {
                        warn!("수신 에러: {}", e);
                    }
                }
            }
        });

        // 타이머 태스크
        let cmd_tx_tick = cmd_tx.clone();
        let running_tick = running.clone();

        tokio::spawn(async move {
            while running_tick.load(Ordering::SeqCst) {
                tokio::time::sleep(poll).await;
                if cmd_tx_tick.send(ReceiverCmd::Tick).await.is_err() {
                    break;
                }
            }
        });

        // 메인 처리 태스크
        let stats_main = stats.clone();
        let state_main = state.clone();
        let running_main = running.clone();

        let task = tokio::spawn(async move {
            let result = inner.run(&mut cmd_rx, &stats_main, &state_main).await;
            let flushed = inner.shutdown().await;

            *stats_main.write().await = inner.stats();
            *state_main.write().await = inner.session.state();
            running_main.store(false, Ordering::SeqCst);

            match &result {
                Ok(()) => info!("SWR Receiver stopped: {}", inner.stats().summary()),
                Err(e) => warn!("수신자 비정상 종료: {}", e),
            }
            result.and(flushed)
        });

        Ok(Self {
            cmd_tx,
            stats,
            state,
            running,
            local_addr,
            task,
        })
    }

    /// 채널 싱크로 시작 (전달 수신기 반환)
    pub async fn channel(config: Config, bind_addr: SocketAddr) -> Result<(Self, DeliveryReceiver)> {
        let (sink, rx) = ChannelSink::channel(config.delivery_queue_capacity);
        let receiver = Self::start(config, bind_addr, sink).await?;
        Ok((receiver, rx))
    }

    /// 파일 싱크로 시작
    pub async fn to_file(config: Config, bind_addr: SocketAddr, path: impl AsRef<Path>) -> Result<Self> {
        let sink = FileSink::create(path)?;
        Self::start(config, bind_addr, sink).await
    }

    /// 정지 (대기 중인 전달을 비운 뒤 종료)
    pub async fn stop(&self) {
        let _ = self.cmd_tx.send(ReceiverCmd::Stop).await;
    }

    /// 다른 태스크에서 정지를 요청할 핸들
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// 처리 태스크 종료까지 대기
    pub async fn wait(self) -> Result<ReceiverStats> {
        let result = self.task.await.map_err(|_| Error::ChannelError)?;
        result?;
        Ok(self.stats.read().await.clone())
    }

    /// 통계 반환
    pub async fn get_stats(&self) -> ReceiverStats {
        self.stats.read().await.clone()
    }

    /// 세션 상태
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::MemorySink;
    use crate::message::AckMessage;
    use crate::segment::{Segment, SeqNum};

    fn test_config(window_size: u32) -> Config {
        let mut config = Config::new().with_window_size(window_size);
        config.tick_interval_ms = 5;
        config.close_linger_ms = 50;
        config.shutdown_flush_ms = 200;
        config
    }

    async fn fake_sender() -> UdpTransport {
        UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    /// 누적 값이 `until` 인 ACK 가 올 때까지 수집
    async fn collect_acks(socket: &UdpTransport, until: SeqNum) -> Vec<AckMessage> {
        let mut acks = Vec::new();
        let mut buf = [0u8; 64];
        while let Some((len, _)) = socket
            .recv_timeout(&mut buf, Duration::from_secs(2))
            .await
            .unwrap()
        {
            let ack = AckMessage::decode(&buf[..len]).unwrap();
            acks.push(ack);
            if ack.cumulative == until {
                break;
            }
        }
        acks
    }

    #[tokio::test]
    async fn test_reordered_stream_over_loopback() {
        let (receiver, mut rx) = Receiver::channel(test_config(4), loopback()).await.unwrap();
        let sender = fake_sender().await;
        let target = receiver.local_addr();

        for seq in [2, 0, 1, 3] {
            let segment = Segment::data(seq, vec![b'a' + seq as u8]);
            sender.send_to(&segment.encode(), target).await.unwrap();
        }
        sender.send_to(&Segment::fin(4).encode(), target).await.unwrap();

        let acks = collect_acks(&sender, 5).await;
        assert_eq!(acks.last().unwrap().cumulative, 5);
        // 누적 ACK 는 절대 후퇴하지 않음
        assert!(acks.windows(2).all(|w| w[0].cumulative <= w[1].cumulative));

        let mut payload = Vec::new();
        while let Some(delivery) = rx.recv().await {
            payload.extend_from_slice(&delivery.payload);
        }
        assert_eq!(payload, b"abcd");

        let stats = receiver.wait().await.unwrap();
        assert_eq!(stats.delivered_segments, 4);
        assert_eq!(stats.delivered_bytes, 4);
    }

    #[tokio::test]
    async fn test_corrupt_and_out_of_window_get_duplicate_acks() {
        let sink = MemorySink::new();
        let receiver = Receiver::start(test_config(4), loopback(), sink.clone())
            .await
            .unwrap();
        let sender = fake_sender().await;
        let target = receiver.local_addr();

        sender
            .send_to(&Segment::data(0, &b"x"[..]).encode(), target)
            .await
            .unwrap();
        assert_eq!(collect_acks(&sender, 1).await.last().unwrap().cumulative, 1);

        let corrupt = Segment::data(1, &b"y"[..]).corrupted();
        sender.send_to(&corrupt.encode(), target).await.unwrap();
        sender
            .send_to(&Segment::data(9, &b"z"[..]).encode(), target)
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        for _ in 0..2 {
            let (len, _) = sender
                .recv_timeout(&mut buf, Duration::from_secs(2))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(AckMessage::decode(&buf[..len]).unwrap().cumulative, 1);
        }

        receiver.stop().await;
        let stats = receiver.wait().await.unwrap();
        assert_eq!(stats.corrupt_segments, 1);
        assert_eq!(stats.beyond_window_segments, 1);
        assert_eq!(stats.duplicate_acks, 2);
        assert_eq!(sink.bytes(), b"x");
    }

    #[tokio::test]
    async fn test_idle_timeout_surfaces_error() {
        let mut config = test_config(4);
        config.idle_timeout_ms = 50;
        let receiver = Receiver::start(config, loopback(), MemorySink::new())
            .await
            .unwrap();
        let sender = fake_sender().await;

        sender
            .send_to(&Segment::data(0, &b"x"[..]).encode(), receiver.local_addr())
            .await
            .unwrap();

        match receiver.wait().await {
            Err(Error::IdleTimeout { idle_ms }) => assert!(idle_ms >= 50),
            other => panic!("expected idle timeout, got {:?}", other.map(|s| s.summary())),
        }
    }

    #[tokio::test]
    async fn test_foreign_peer_ignored() {
        let sink = MemorySink::new();
        let receiver = Receiver::start(test_config(4), loopback(), sink.clone())
            .await
            .unwrap();
        let peer = fake_sender().await;
        let intruder = fake_sender().await;
        let target = receiver.local_addr();

        peer.send_to(&Segment::data(0, &b"a"[..]).encode(), target)
            .await
            .unwrap();
        collect_acks(&peer, 1).await;

        intruder
            .send_to(&Segment::data(1, &b"b"[..]).encode(), target)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(receiver.state().await, SessionState::Established);
        receiver.stop().await;
        let stats = receiver.wait().await.unwrap();
        assert_eq!(stats.foreign_datagrams, 1);
        assert_eq!(sink.bytes(), b"a");
    }

    #[tokio::test]
    async fn test_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("received.bin");
        let receiver = Receiver::to_file(test_config(8), loopback(), &path)
            .await
            .unwrap();
        let sender = fake_sender().await;
        let target = receiver.local_addr();

        for seq in [1u32, 0] {
            let segment = Segment::data(seq, format!("part{};", seq).into_bytes());
            sender.send_to(&segment.encode(), target).await.unwrap();
        }
        sender.send_to(&Segment::fin(2).encode(), target).await.unwrap();
        collect_acks(&sender, 3).await;

        receiver.wait().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"part0;part1;");
    }

    /// 수신 통계가 조건을 만족할 때까지 대기
    async fn wait_for_stats(receiver: &Receiver, done: impl Fn(&ReceiverStats) -> bool) {
        for _ in 0..400 {
            if done(&receiver.get_stats().await) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("receiver stats never reached the expected state");
    }

    fn stalled_config(shutdown_flush_ms: u64) -> Config {
        let mut config = test_config(8);
        config.delivery_queue_capacity = 1;
        config.shutdown_flush_ms = shutdown_flush_ms;
        config
    }

    #[tokio::test]
    async fn test_stray_datagram_does_not_claim_peer() {
        let sink = MemorySink::new();
        let receiver = Receiver::start(test_config(4), loopback(), sink.clone())
            .await
            .unwrap();
        let stray = fake_sender().await;
        let sender = fake_sender().await;
        let target = receiver.local_addr();

        stray.send_to(&b"garbage"[..], target).await.unwrap();
        wait_for_stats(&receiver, |s| s.corrupt_segments == 1).await;
        assert_eq!(receiver.state().await, SessionState::Listening);

        sender
            .send_to(&Segment::data(0, &b"a"[..]).encode(), target)
            .await
            .unwrap();
        sender.send_to(&Segment::fin(1).encode(), target).await.unwrap();
        assert_eq!(collect_acks(&sender, 2).await.last().unwrap().cumulative, 2);

        let stats = receiver.wait().await.unwrap();
        assert_eq!(stats.foreign_datagrams, 0);
        assert_eq!(stats.corrupt_segments, 1);
        assert_eq!(sink.bytes(), b"a");
        assert!(sink.is_finished());
    }

    #[tokio::test]
    async fn test_stop_drains_segments_held_back_by_sink() {
        let sink = MemorySink::bounded(1);
        let receiver = Receiver::start(stalled_config(2_000), loopback(), sink.clone())
            .await
            .unwrap();
        let sender = fake_sender().await;
        let target = receiver.local_addr();

        for seq in 0..4u32 {
            let segment = Segment::data(seq, vec![seq as u8]);
            sender.send_to(&segment.encode(), target).await.unwrap();
        }
        // 싱크 1 + 대기 1, 나머지는 윈도우에 묶임
        wait_for_stats(&receiver, |s| s.segments_buffered == 4).await;
        assert_eq!(sink.seqs(), vec![0]);

        receiver.stop().await;

        // 정지 중에 애플리케이션이 소비를 재개
        let consumer = {
            let sink = sink.clone();
            tokio::spawn(async move {
                let mut seqs = Vec::new();
                for _ in 0..200 {
                    seqs.extend(sink.take().into_iter().map(|d| d.seq));
                    if seqs.len() == 4 {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                seqs
            })
        };

        let stats = receiver.wait().await.unwrap();
        assert_eq!(consumer.await.unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(stats.delivered_segments, 4);
    }

    #[tokio::test]
    async fn test_stop_returns_after_flush_deadline() {
        let sink = MemorySink::bounded(1);
        let receiver = Receiver::start(stalled_config(50), loopback(), sink.clone())
            .await
            .unwrap();
        let sender = fake_sender().await;
        let target = receiver.local_addr();

        for seq in 0..3u32 {
            let segment = Segment::data(seq, vec![seq as u8]);
            sender.send_to(&segment.encode(), target).await.unwrap();
        }
        wait_for_stats(&receiver, |s| s.segments_buffered == 3).await;

        // 아무도 소비하지 않으면 제한 시간 후 종료
        receiver.stop().await;
        let stats = tokio::time::timeout(Duration::from_secs(2), receiver.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(stats.delivered_segments, 1);
        assert_eq!(sink.seqs(), vec![0]);
    }

    #[tokio::test]
    async fn test_stop_flushes_file_without_fin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.bin");
        let receiver = Receiver::to_file(test_config(8), loopback(), &path)
            .await
            .unwrap();
        let sender = fake_sender().await;
        let target = receiver.local_addr();

        for seq in [0u32, 1] {
            let segment = Segment::data(seq, format!("part{};", seq).into_bytes());
            sender.send_to(&segment.encode(), target).await.unwrap();
        }
        collect_acks(&sender, 2).await;

        receiver.stop().await;
        let stats = receiver.wait().await.unwrap();

        assert_eq!(stats.delivered_bytes, 12);
        assert_eq!(std::fs::read(&path).unwrap(), b"part0;part1;");
    }
}
