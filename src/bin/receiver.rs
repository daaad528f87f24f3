//! SWR 수신자 - Sliding Window Receiver
//!
//! UDP 로 들어오는 세그먼트를 윈도우에 모아 순서대로 파일에 기록
//! - 순서가 어긋난 세그먼트는 윈도우 안에서 버퍼링
//! - 손상/윈도우 밖 세그먼트에는 중복 ACK 로 응답
//!
//! 사용법:
//!   cargo run --release --bin swr-receiver -- [OPTIONS]
//!
//! 예시:
//!   # 기본 수신
//!   cargo run --release --bin swr-receiver -- --bind 127.0.0.1:9000 --output received.bin
//!
//!   # 큰 윈도우 + SYN 필수
//!   cargo run --release --bin swr-receiver -- -b 0.0.0.0:9000 -o data.bin --window 64 --handshake

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::EnvFilter;

use swr::{Config, OverflowPolicy, Receiver};

/// 수신자 실행 설정
struct ReceiverArgs {
    bind_addr: SocketAddr,
    output_path: PathBuf,
    config: Config,
}

impl Default for ReceiverArgs {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            output_path: PathBuf::from("received.bin"),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ReceiverArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ReceiverArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    parsed.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    parsed.output_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--window" | "-w" => {
                if i + 1 < args.len() {
                    parsed.config.window_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--queue" => {
                if i + 1 < args.len() {
                    parsed.config.delivery_queue_capacity =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--drop-oldest" => {
                parsed.config.overflow_policy = OverflowPolicy::DropOldest;
            }
            "--no-sack" => {
                parsed.config.selective_ack = false;
            }
            "--handshake" => {
                parsed.config.require_handshake = true;
            }
            "--idle-timeout" => {
                if i + 1 < args.len() {
                    parsed.config.idle_timeout_ms = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"SWR Receiver - Sliding Window Receiver

UDP 슬라이딩 윈도우 수신자: 순서 보장 후 파일로 기록

사용법:
  cargo run --release --bin swr-receiver -- [OPTIONS]

옵션:
  -b, --bind <ADDR>        바인드 주소 (기본: 0.0.0.0:9000)
  -o, --output <PATH>      출력 파일 (기본: received.bin)
  -w, --window <N>         수신 윈도우 크기 (기본: 8)
  --queue <N>              전달 대기 큐 크기 (기본: 64)
  --drop-oldest            큐 초과 시 가장 오래된 항목을 버림 (손실 허용)
  --no-sack                ACK 에 SACK 비트맵을 넣지 않음
  --handshake              SYN 없이 들어온 데이터 무시
  --idle-timeout <MS>      유휴 타임아웃 (0 = 비활성, 기본: 30000)
  -h, --help               이 도움말 출력

로그 레벨은 RUST_LOG 로 조정 (예: RUST_LOG=swr=debug)
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

    let args = parse_args();
    args.config.validate()?;

    info!("SWR Receiver starting...");
    info!("Output file: {:?}", args.output_path);

    let receiver = Receiver::to_file(args.config, args.bind_addr, &args.output_path).await?;
    info!("[Receiver] Listening on {}", receiver.local_addr());

    // Ctrl-C 로 정지 요청
    let stopper = receiver.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C: 남은 데이터 기록 후 종료");
            stopper.stop().await;
        }
    });

    let stats = receiver.wait().await?;

    info!("Transfer complete!");
    info!("  {}", stats.summary());
    info!("Data saved to {:?}", args.output_path);

    Ok(())
}
