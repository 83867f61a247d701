//! Flipper Share 송신기
//!
//! 파일을 ANNOUNCE하고 수신자의 REQUEST에 DATA로 응답
//! - UDP 소켓이 sub-GHz 무선을 대신함
//! - Ctrl-C로 종료
//!
//! 사용법:
//!   cargo run --release --bin fshare-send -- --file <PATH> --peer <ADDR> [OPTIONS]
//!
//! 예시:
//!   # 기본 전송
//!   cargo run --release --bin fshare-send -- -f photo.jpg -p 127.0.0.1:9001
//!
//!   # 20% 손실 채널 흉내 + 잡음 채널 설정
//!   cargo run --release --bin fshare-send -- -f photo.jpg -p 127.0.0.1:9001 --loss 0.2 --noisy

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use fshare::storage::FileSource;
use fshare::{radio, Config, RoleInit, Session};

/// 송신기 설정
struct SendConfig {
    bind_addr: SocketAddr,
    peer_addr: SocketAddr,
    file_path: Option<PathBuf>,
    tx_id: u8,
    loss_ratio: f64,
    verbose: bool,
    config: Config,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".parse().unwrap(),
            peer_addr: "127.0.0.1:9001".parse().unwrap(),
            file_path: None,
            tx_id: rand::random(),
            loss_ratio: 0.0,
            verbose: false,
            config: Config::default(),
        }
    }
}

fn parse_args() -> SendConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = SendConfig::default();

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
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    config.file_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--tx-id" => {
                if i + 1 < args.len() {
                    config.tx_id = args[i + 1].parse().expect("0~255 숫자 필요");
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
                config.config = Config::noisy_channel();
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"fshare-send - Flipper Share 송신기

60바이트 고정 프레임 청크 전송 (수신자 REQUEST 주도 재전송)

사용법:
  cargo run --release --bin fshare-send -- --file <PATH> [OPTIONS]

옵션:
  -f, --file <PATH>       전송할 파일 (필수)
  -p, --peer <ADDR>       수신기 주소 (기본: 127.0.0.1:9001)
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:9000)
  --tx-id <N>             세션 식별자 0~255 (기본: 무작위)
  --loss <RATIO>          송신 프레임 폐기 비율 0.0~1.0 (기본: 0)
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
    let send_config = parse_args();

    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if send_config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let path = send_config
        .file_path
        .clone()
        .ok_or("--file 필요 (--help 참고)")?;

    info!("Flipper Share sender starting...");
    info!("Bind address: {}", send_config.bind_addr);
    info!("Peer address: {}", send_config.peer_addr);
    info!("tx_id: {}", send_config.tx_id);
    info!(
        "Announce every {}ms, {}ms between packets",
        send_config.config.announce_interval_ms, send_config.config.between_packets_ms
    );

    let source = FileSource::open(&path)?;
    let file_name = source.file_name();

    let (link, mut rx) =
        radio::open(send_config.bind_addr, send_config.peer_addr, send_config.loss_ratio).await?;
    let mut session = Session::new(send_config.config.clone(), link);
    session.init(RoleInit::Send {
        tx_id: send_config.tx_id,
        file_name,
        source: Box::new(source),
    })?;

    if let Some(sender) = session.sender() {
        info!(
            "Serving {:?}: {} bytes",
            sender.file_name(),
            sender.file_size()
        );
    }

    tokio::select! {
        result = radio::drive(&mut session, &mut rx, |_| false) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    info!("{}", session.stats().summary());
    session.deinit();
    Ok(())
}
