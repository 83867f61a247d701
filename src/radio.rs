//! 호스트용 무선 대체 전송 (UDP)
//!
//! sub-GHz 무선 대신 UDP 소켓으로 60바이트 프레임을 주고받음
//! - 송신 태스크: 프레임별 예정 시각을 지켜 송신, 손실률만큼 무작위 폐기
//! - 수신 태스크: 60바이트 데이터그램을 큐에 넣음 (단일 생산자)
//! - `drive()`: 큐와 tick 타이머를 한 태스크에서 처리 (세션 단일 소유)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::session::Session;
use crate::{Error, Link, Result, FRAME_SIZE};

/// 수신 프레임 큐
pub type RadioRx = mpsc::Receiver<Bytes>;

/// 송신 대기 프레임
struct Outbound {
    due: Instant,
    frame: [u8; FRAME_SIZE],
}

/// 송신 대기열이 이보다 멀리 밀리면 `is_busy()`
const DEFAULT_MAX_BACKLOG: Duration = Duration::from_millis(100);

/// 세션에 넘기는 링크
///
/// `delay_ms`는 잠들지 않고 다음 프레임 예정 시각만 미룸
pub struct RadioLink {
    tx: mpsc::UnboundedSender<Outbound>,
    epoch: Instant,
    next_slot: Instant,
    max_backlog: Duration,
}

impl RadioLink {
    /// 대기열 허용 길이 (예정 시각 기준)
    pub fn set_max_backlog(&mut self, backlog: Duration) {
        self.max_backlog = backlog;
    }
}

impl Link for RadioLink {
    fn send_bytes(&mut self, frame: &[u8; FRAME_SIZE]) -> Result<()> {
        let due = self.next_slot.max(Instant::now());
        self.next_slot = due;
        self.tx
            .send(Outbound { due, frame: *frame })
            .map_err(|_| Error::ChannelError)
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn delay_ms(&mut self, ms: u64) {
        self.next_slot = self.next_slot.max(Instant::now()) + Duration::from_millis(ms);
    }

    fn is_busy(&self) -> bool {
        self.next_slot > Instant::now() + self.max_backlog
    }
}

/// UDP "무선" 열기
///
/// `loss_ratio`(0.0 ~ 1.0)만큼 송신 프레임을 버려 손실 채널을 흉내냄
pub async fn open(bind_addr: SocketAddr, peer: SocketAddr, loss_ratio: f64) -> Result<(RadioLink, RadioRx)> {
    let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
    info!("Radio bound on {}, peer {}", socket.local_addr()?, peer);

    let loss_ratio = loss_ratio.clamp(0.0, 1.0);

    // ─────────────────────────────────────────────────────────────────
    // 송신 태스크: 예정 시각 순서대로 송신
    // ─────────────────────────────────────────────────────────────────
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    let send_socket = socket.clone();
    tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            tokio::time::sleep_until(out.due).await;

            if loss_ratio > 0.0 && rand::thread_rng().gen_bool(loss_ratio) {
                debug!("Simulated loss: type={}", out.frame[2]);
                continue;
            }
            if let Err(e) = send_socket.send_to(&out.frame, peer).await {
                warn!("송신 에러: {}", e);
            }
        }
    });

    // ─────────────────────────────────────────────────────────────────
    // 수신 태스크: 60바이트 데이터그램만 큐로
    // ─────────────────────────────────────────────────────────────────
    let (in_tx, in_rx) = mpsc::channel::<Bytes>(1024);
    let recv_socket = socket;
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            match recv_socket.recv_from(&mut buf).await {
                Ok((len, _addr)) => {
                    if len != FRAME_SIZE {
                        debug!("길이 불일치 데이터그램 무시: {} bytes", len);
                        continue;
                    }
                    if in_tx.send(Bytes::copy_from_slice(&buf[..len])).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("수신 에러: {}", e);
                }
            }
        }
    });

    let now = Instant::now();
    let link = RadioLink {
        tx: out_tx,
        epoch: now,
        next_slot: now,
        max_backlog: DEFAULT_MAX_BACKLOG,
    };

    Ok((link, in_rx))
}

/// 세션 구동 루프
///
/// `tick_interval_ms`마다 `tick()`, 수신 큐의 프레임은 `on_bytes_received()`로.
/// 송신 대기열은 tick 한 번 분량까지만 쌓임.
/// `until`이 true를 반환하면 종료
pub async fn drive<F>(session: &mut Session<RadioLink>, rx: &mut RadioRx, mut until: F) -> Result<()>
where
    F: FnMut(&Session<RadioLink>) -> bool,
{
    let tick = Duration::from_millis(session.config().tick_interval_ms.max(1));
    session.link_mut().set_max_backlog(tick);

    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !until(&*session) {
        tokio::select! {
            _ = ticker.tick() => {
                session.tick();
            }
            bytes = rx.recv() => {
                match bytes {
                    Some(bytes) => session.on_bytes_received(&bytes),
                    None => return Err(Error::ConnectionClosed),
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RoleInit;
    use crate::storage::MemoryStore;
    use crate::Config;

    fn free_local_addr() -> SocketAddr {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_transfer_over_loopback() {
        let sender_addr = free_local_addr();
        let receiver_addr = free_local_addr();

        let (sender_link, mut sender_rx) = open(sender_addr, receiver_addr, 0.0).await.unwrap();
        let (receiver_link, mut receiver_rx) = open(receiver_addr, sender_addr, 0.0).await.unwrap();

        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let inbox = MemoryStore::new();

        let mut sender = Session::new(Config::fast_local(), sender_link);
        sender
            .init(RoleInit::Send {
                tx_id: 42,
                file_name: "loop.bin".into(),
                source: Box::new(MemoryStore::from_bytes(&data)),
            })
            .unwrap();

        let mut receiver = Session::new(Config::fast_local(), receiver_link);
        receiver
            .init(RoleInit::Receive {
                sink: Box::new(inbox.clone()),
                pinned_tx_id: None,
            })
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), async {
            tokio::select! {
                r = drive(&mut receiver, &mut receiver_rx, |s| s.is_finished()) => r,
                _ = drive(&mut sender, &mut sender_rx, |_| false) => Err(Error::ConnectionClosed),
            }
        })
        .await;

        assert!(matches!(result, Ok(Ok(()))));
        assert_eq!(receiver.success(), Some(true));
        assert_eq!(inbox.contents().as_ref(), data.as_slice());
        assert_eq!(receiver.receiver().unwrap().locked_tx_id(), Some(42));
    }

    #[tokio::test]
    async fn test_transfer_over_lossy_loopback() {
        let sender_addr = free_local_addr();
        let receiver_addr = free_local_addr();

        let (sender_link, mut sender_rx) = open(sender_addr, receiver_addr, 0.3).await.unwrap();
        let (receiver_link, mut receiver_rx) = open(receiver_addr, sender_addr, 0.3).await.unwrap();

        let data: Vec<u8> = (0..2000u32).map(|i| (i * 31 % 256) as u8).collect();
        let inbox = MemoryStore::new();

        let mut sender = Session::new(Config::fast_local(), sender_link);
        sender
            .init(RoleInit::Send {
                tx_id: 9,
                file_name: "lossy.bin".into(),
                source: Box::new(MemoryStore::from_bytes(&data)),
            })
            .unwrap();

        let mut receiver = Session::new(Config::fast_local(), receiver_link);
        receiver
            .init(RoleInit::Receive {
                sink: Box::new(inbox.clone()),
                pinned_tx_id: None,
            })
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(30), async {
            tokio::select! {
                r = drive(&mut receiver, &mut receiver_rx, |s| s.is_finished()) => r,
                _ = drive(&mut sender, &mut sender_rx, |_| false) => Err(Error::ConnectionClosed),
            }
        })
        .await;

        assert!(matches!(result, Ok(Ok(()))));
        assert_eq!(receiver.success(), Some(true));
        assert_eq!(inbox.contents().as_ref(), data.as_slice());
        // 39 블록 중 일부는 유실되어 재요청으로 복구됨
        assert!(receiver.stats().request_retries > 0);
    }

    #[tokio::test]
    async fn test_radio_link_busy_past_backlog() {
        let addr = free_local_addr();
        let (mut link, _rx) = open(addr, addr, 0.0).await.unwrap();
        link.set_max_backlog(Duration::from_millis(300));

        assert!(!link.is_busy());
        link.delay_ms(200);
        assert!(!link.is_busy());
        link.delay_ms(200);
        assert!(link.is_busy());
    }

    #[tokio::test]
    async fn test_radio_link_delay_pushes_due_time() {
        let addr = free_local_addr();
        let (mut link, _rx) = open(addr, addr, 0.0).await.unwrap();

        let before = link.next_slot;
        link.delay_ms(30);
        assert!(link.next_slot >= before + Duration::from_millis(30));
        link.send_bytes(&[0u8; FRAME_SIZE]).unwrap();
    }
}
