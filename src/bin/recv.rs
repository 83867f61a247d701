//! Flipper Share 수신기
//!
//! 첫 ANNOUNCE의 송신자에 잠금하고 파일을 수신함 디렉토리에 재조립
//! - 완료 후 MD5 검증, 실패 시 종료 코드 1
//!
//! 사용법:
//!   cargo run --release --bin fshare-recv -- --peer <ADDR> [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin fshare-recv -- -b 0.0.0.0:9001 -p 127.0.0.1:9000 --inbox ./inbox

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use fshare::storage::InboxStore;
use fshare::{radio, Config, RoleInit, Session, FS_PARTS_COUNT};

/// 수신기 설정
struct RecvConfig {
    bind_addr: SocketAddr,
    peer_addr: SocketAddr,
    inbox: PathBuf,
    pinned_tx_id: Option<u8>,
    loss_ratio: f64,
    verbose: bool,
    config: Config,
}

impl Default for RecvConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9001".parse().unwrap(),
            peer_addr: "127.0.0.1:9000".parse().unwrap(),
            inbox: PathBuf::from("inbox"),
            pinned_tx_id: None,
            loss_ratio: 0.0,
            verbose: false,
            config: Config::default(),
        }
    }
}

fn parse_args() -> RecvConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RecvConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--peer" | "-p" => {
                if i + 1 < args.len() {
                    config.peer_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--inbox" | "-o" => {
                if i + 1 < args.len() {
                    config.inbox = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--pin" => {
                if i + 1 < args.len() {
                    config.pinned_tx_id = Some(args[i + 1].parse().expect("0~255 숫자 필요"));
                    i += 1;
                }
            }
            "--loss" => {
                if i + 1 < args.len() {
                    config.loss_ratio = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--noisy" => {
                let max_file_size = config.config.max_file_size;
                config.config = Config::noisy_channel();
                config.config.max_file_size = max_file_size;
            }
            "--max-size" => {
                if i + 1 < args.len() {
                    config.config.max_file_size = args[i + 1].parse().expect("바이트 수 필요");
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"fshare-recv - Flipper Share 수신기

첫 ANNOUNCE 송신자에 잠금, 누락 범위 REQUEST, MD5 검증

사용법:
  cargo run --release --bin fshare-recv -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:9001)
  -p, --peer <ADDR>       송신기 주소 (기본: 127.0.0.1:9000)
  -o, --inbox <DIR>       수신함 디렉토리 (기본: ./inbox)
  --pin <N>               이 tx_id 송신자에만 잠금
  --max-size <BYTES>      수락할 최대 파일 크기 (기본: 4194304)
  --loss <RATIO>          송신 프레임(REQUEST) 폐기 비율 0.0~1.0 (기본: 0)
  --noisy                 잡음 채널용 타이밍 사용
  -v, --verbose           디버그 로그 출력
  -h, --help              이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recv_config = parse_args();

    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if recv_config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Flipper Share receiver starting...");
    info!("Bind address: {}", recv_config.bind_addr);
    info!("Peer address: {}", recv_config.peer_addr);
    info!("Inbox: {:?}", recv_config.inbox);
    info!("Max file size: {} bytes", recv_config.config.max_file_size);
    if let Some(pin) = recv_config.pinned_tx_id {
        info!("Pinned tx_id: {}", pin);
    }

    let (link, mut rx) =
        radio::open(recv_config.bind_addr, recv_config.peer_addr, recv_config.loss_ratio).await?;
    let mut session = Session::new(recv_config.config.clone(), link);
    session.init(RoleInit::Receive {
        sink: Box::new(InboxStore::new(&recv_config.inbox)),
        pinned_tx_id: recv_config.pinned_tx_id,
    })?;

    info!("Waiting for ANNOUNCE...");
    let start = Instant::now();
    let mut last_reported = 0usize;

    // 진행률 10칸마다 출력
    radio::drive(&mut session, &mut rx, |s| {
        if let Some(parts) = s.parts() {
            let count = parts.count();
            if count / 10 > last_reported / 10 {
                info!(
                    "Progress: {}/{} parts ({:.0}%)",
                    count,
                    FS_PARTS_COUNT,
                    parts.ratio() * 100.0
                );
                last_reported = count;
            }
        }
        s.is_finished()
    })
    .await?;

    let elapsed = start.elapsed();
    let success = session.success().unwrap_or(false);

    if let Some(meta) = session.receiver().and_then(|r| r.meta()) {
        let throughput = meta.size as f64 / elapsed.as_secs_f64().max(0.001);
        info!("File: {:?} ({} bytes)", meta.name, meta.size);
        info!("  Time: {:.2}s", elapsed.as_secs_f64());
        info!("  Throughput: {:.1} B/s", throughput);
    }
    info!("{}", session.stats().summary());
    session.deinit();

    if success {
        info!("Transfer complete, MD5 verified");
        Ok(())
    } else {
        warn!("Transfer finished but MD5 verification FAILED");
        std::process::exit(1);
    }
}
