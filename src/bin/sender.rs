//! SWR 송신자 - Go-Back-N Sender
//!
//! 파일을 고정 크기 세그먼트로 나눠 슬라이딩 윈도우로 전송
//! - 누적 ACK 로 윈도우 전진, 타임아웃 시 윈도우 전체 재전송
//! - 재전송 타임아웃 = 15 × RTT
//! - --corrupt 목록의 세그먼트는 첫 전송 때 체크섬을 망가뜨려 보냄
//!
//! 사용법:
//!   cargo run --release --bin swr-sender -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin swr-sender -- --dest 127.0.0.1:9000 --file data.bin --window 8 --packet-size 1024 --rtt 10
//!
//!   # 3, 7 번 세그먼트 손상 + 5% 손실
//!   cargo run --release --bin swr-sender -- -d 127.0.0.1:9000 -f data.bin --corrupt 3,7 --loss 0.05

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::EnvFilter;

use swr::{Config, Sender, SeqNum};

/// 송신자 실행 설정
struct SenderArgs {
    bind_addr: SocketAddr,
    dest_addr: SocketAddr,
    file_path: Option<PathBuf>,
    rtt_ms: u64,
    corrupt_list: Vec<SeqNum>,
    loss_rate: f64,
    handshake: bool,
    config: Config,
}

impl Default for SenderArgs {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            dest_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            file_path: None,
            rtt_ms: 10,
            corrupt_list: Vec::new(),
            loss_rate: 0.0,
            handshake: false,
            config: Config::default(),
        }
    }
}

fn parse_args() -> SenderArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = SenderArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    parsed.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--dest" | "-d" => {
                if i + 1 < args.len() {
                    parsed.dest_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    parsed.file_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--window" | "-w" => {
                if i + 1 < args.len() {
                    parsed.config.window_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--packet-size" | "-p" => {
                if i + 1 < args.len() {
                    parsed.config.max_payload_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--rtt" => {
                if i + 1 < args.len() {
                    parsed.rtt_ms = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--corrupt" => {
                if i + 1 < args.len() {
                    parsed.corrupt_list = args[i + 1]
                        .split(',')
                        .filter(|s| !s.trim().is_empty())
                        .map(|s| s.trim().parse().expect("유효한 순서 번호 필요"))
                        .collect();
                    i += 1;
                }
            }
            "--loss" => {
                if i + 1 < args.len() {
                    parsed.loss_rate = args[i + 1].parse().expect("유효한 비율 필요");
                    i += 1;
                }
            }
            "--handshake" => {
                parsed.handshake = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"SWR Sender - Go-Back-N Sender

파일을 슬라이딩 윈도우로 SWR 수신자에게 전송

사용법:
  cargo run --release --bin swr-sender -- [OPTIONS]

옵션:
  -b, --bind <ADDR>        로컬 바인드 주소 (기본: 0.0.0.0:0)
  -d, --dest <ADDR>        수신자 주소 (기본: 127.0.0.1:9000)
  -f, --file <PATH>        전송할 파일 (필수)
  -w, --window <N>         송신 윈도우 크기 (기본: 8)
  -p, --packet-size <N>    세그먼트 페이로드 크기 (기본: 1024)
  --rtt <MS>               예상 RTT, 재전송 타임아웃 = 15 × RTT (기본: 10)
  --corrupt <LIST>         첫 전송을 손상시킬 순서 번호 (예: 1,2,3)
  --loss <RATIO>           첫 전송 누락 확률 (0.0 ~ 1.0)
  --handshake              데이터 전에 SYN 교환
  -h, --help               이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = parse_args();
    let file_path = args.file_path.take().ok_or("--file 필요")?;
    let data = tokio::fs::read(&file_path).await?;

    args.config.retransmit_timeout_ms = 15 * args.rtt_ms.max(1);

    info!("SWR Sender starting...");
    info!("File: {:?} ({} bytes)", file_path, data.len());
    info!("Destination: {}", args.dest_addr);

    let mut sender = Sender::bind(args.config, args.bind_addr)
        .await?
        .with_handshake(args.handshake)
        .with_corrupt_list(args.corrupt_list)
        .with_loss_rate(args.loss_rate);

    let report = sender.send(args.dest_addr, &data).await?;

    info!("Transfer complete!");
    info!("  Time: {:.2}s", report.elapsed.as_secs_f64());
    info!("  Segments: {}", report.segments);
    info!("  Retransmissions: {}", report.retransmissions);
    info!("  Timeouts: {}", report.timeouts);
    if report.elapsed.as_secs_f64() > 0.0 {
        info!(
            "  Throughput: {:.2} MB/s",
            report.bytes as f64 / report.elapsed.as_secs_f64() / 1_000_000.0
        );
    }

    Ok(())
}
