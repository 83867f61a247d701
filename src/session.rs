//! 세션 (폴링 구동기)
//!
//! 송신자 또는 수신자 역할 하나를 소유하고 두 진입점에서만 상태를 바꿈:
//! - `on_bytes_received()`: 무선 수신 경로가 밀어 넣는 원시 바이트
//! - `tick()`: 임베딩 앱이 최소 50ms마다 호출 (재-ANNOUNCE, 타임아웃, 재요청)
//!
//! 백그라운드 스레드나 타이머는 없음. 다른 컨텍스트에서 바이트가 들어오면
//! 호출자가 큐로 모아 소유 스레드에서 넘겨야 함 (`radio` 모듈 참고)

use tracing::{debug, info, trace, warn};

use crate::frame::{Frame, Packet};
use crate::parts::PartsTracker;
use crate::receiver::{DataOutcome, Receiver};
use crate::sender::Sender;
use crate::storage::{BlockSink, BlockSource};
use crate::{Config, Error, Link, Result, TransferStats};

/// 송신 경로: 링크 + 통계
///
/// 프레임 인코딩, 송신, 카운트를 한곳에서 처리
pub struct Tx<'a, L: Link> {
    link: &'a mut L,
    stats: &'a mut TransferStats,
}

impl<'a, L: Link> Tx<'a, L> {
    pub fn new(link: &'a mut L, stats: &'a mut TransferStats) -> Self {
        Self { link, stats }
    }

    /// 프레임 인코딩 후 송신
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        self.link.send_bytes(&frame.to_bytes())?;
        self.stats.record_sent(frame.packet_type());
        trace!("TX {:?} tx_id={}", frame.packet_type(), frame.tx_id);
        Ok(())
    }

    pub fn now_ms(&self) -> u64 {
        self.link.now_ms()
    }

    pub fn is_busy(&self) -> bool {
        self.link.is_busy()
    }

    pub fn delay_ms(&mut self, ms: u64) {
        if ms > 0 {
            self.link.delay_ms(ms);
        }
    }

    pub fn stats(&mut self) -> &mut TransferStats {
        self.stats
    }
}

/// `Session::init` 역할 지정
pub enum RoleInit {
    /// 파일 송신: tx_id와 ANNOUNCE에 실을 이름, 블록 리더
    Send {
        tx_id: u8,
        file_name: String,
        source: Box<dyn BlockSource + Send>,
    },

    /// 파일 수신: 블록 저장소, 선택적으로 특정 tx_id에만 잠금
    Receive {
        sink: Box<dyn BlockSink + Send>,
        pinned_tx_id: Option<u8>,
    },
}

/// 활성 역할
#[derive(Debug)]
pub enum Role {
    Sender(Sender),
    Receiver(Receiver),
}

/// 전송 세션
///
/// 한 번에 역할 하나만 활성. 링크는 세션 수명 동안 유지되고
/// 역할은 `init`/`deinit`으로 교체됨
pub struct Session<L: Link> {
    config: Config,
    link: L,
    role: Option<Role>,
    stats: TransferStats,
}

impl<L: Link> Session<L> {
    pub fn new(config: Config, link: L) -> Self {
        Self {
            config,
            link,
            role: None,
            stats: TransferStats::new(),
        }
    }

    /// 전송 모드 초기화 (fs_init)
    pub fn init(&mut self, role: RoleInit) -> Result<()> {
        if self.role.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let role = match role {
            RoleInit::Send {
                tx_id,
                file_name,
                source,
            } => Role::Sender(Sender::start(self.config.clone(), tx_id, file_name, source)?),
            RoleInit::Receive { sink, pinned_tx_id } => {
                Role::Receiver(Receiver::new(self.config.clone(), sink, pinned_tx_id))
            }
        };

        info!(
            "세션 시작: {}",
            match role {
                Role::Sender(_) => "sender",
                Role::Receiver(_) => "receiver",
            }
        );

        self.stats = TransferStats::new();
        self.role = Some(role);
        Ok(())
    }

    /// 전송 모드 해제 (fs_deinit), 여러 번 호출해도 안전
    pub fn deinit(&mut self) {
        if let Some(role) = self.role.take() {
            debug!("세션 종료: {:?} | {}", role, self.stats.summary());
        }
    }

    pub fn is_active(&self) -> bool {
        self.role.is_some()
    }

    /// 폴링 tick: 활성 역할의 시간 기반 처리로 분배
    pub fn tick(&mut self) {
        let mut tx = Tx::new(&mut self.link, &mut self.stats);
        match self.role.as_mut() {
            Some(Role::Sender(sender)) => sender.on_tick(&mut tx),
            Some(Role::Receiver(receiver)) => receiver.on_tick(&mut tx),
            None => {}
        }
    }

    /// ANNOUNCE 즉시 송신 (송신자 전용)
    pub fn send_announce(&mut self) -> Result<()> {
        let mut tx = Tx::new(&mut self.link, &mut self.stats);
        match self.role.as_mut() {
            Some(Role::Sender(sender)) => sender.send_announce(&mut tx),
            Some(Role::Receiver(_)) => Err(Error::WrongRole { expected: "sender" }),
            None => Err(Error::NotInitialized),
        }
    }

    /// REQUEST 즉시 송신 (잠금된 수신자 전용)
    pub fn send_request(&mut self, range_start: u32, range_end: u32) -> Result<()> {
        let mut tx = Tx::new(&mut self.link, &mut self.stats);
        match self.role.as_mut() {
            Some(Role::Receiver(receiver)) => receiver.send_request(range_start, range_end, &mut tx),
            Some(Role::Sender(_)) => Err(Error::WrongRole { expected: "receiver" }),
            None => Err(Error::NotInitialized),
        }
    }

    /// 무선 수신 바이트 처리
    ///
    /// 정확히 60바이트인 유효 프레임만 해석되고 나머지는 조용히 버려짐
    pub fn on_bytes_received(&mut self, buf: &[u8]) {
        self.stats.frames_received += 1;

        let frame = match Frame::decode(buf) {
            Ok(frame) => frame,
            Err(e) => {
                trace!("프레임 버림: {}", e);
                self.stats.frames_dropped += 1;
                return;
            }
        };
        trace!("RX {:?} tx_id={}", frame.packet_type(), frame.tx_id);

        let now = self.link.now_ms();
        let mut tx = Tx::new(&mut self.link, &mut self.stats);
        let handled = match (self.role.as_mut(), &frame.packet) {
            (Some(Role::Sender(sender)), Packet::Request(request)) => {
                sender.on_request(frame.tx_id, request, &mut tx)
            }
            (Some(Role::Receiver(receiver)), Packet::Announce(announce)) => {
                receiver.on_announce(frame.tx_id, announce, &mut tx)
            }
            (Some(Role::Receiver(receiver)), Packet::Data(data)) => {
                match receiver.on_data(frame.tx_id, data, now) {
                    DataOutcome::Ignored => false,
                    DataOutcome::Accepted => {
                        self.stats.blocks_written += 1;
                        true
                    }
                    DataOutcome::Duplicate => {
                        self.stats.duplicate_blocks += 1;
                        true
                    }
                    DataOutcome::WriteFailed => {
                        self.stats.block_errors += 1;
                        true
                    }
                    DataOutcome::Completed { success } => {
                        self.stats.blocks_written += 1;
                        if success {
                            info!("전송 성공 | {}", self.stats.summary());
                        } else {
                            warn!("전송 실패 (무결성) | {}", self.stats.summary());
                        }
                        true
                    }
                }
            }
            _ => false,
        };

        if !handled {
            self.stats.frames_ignored += 1;
        }
    }

    pub fn sender(&self) -> Option<&Sender> {
        match self.role.as_ref() {
            Some(Role::Sender(sender)) => Some(sender),
            _ => None,
        }
    }

    pub fn receiver(&self) -> Option<&Receiver> {
        match self.role.as_ref() {
            Some(Role::Receiver(receiver)) => Some(receiver),
            _ => None,
        }
    }

    /// UI 진행률 비트맵 (잠금된 수신자만)
    pub fn parts(&self) -> Option<&PartsTracker> {
        self.receiver().and_then(|r| r.parts())
    }

    /// 수신 완료 여부
    pub fn is_finished(&self) -> bool {
        self.receiver().is_some_and(|r| r.is_finished())
    }

    /// 수신 완료 시 MD5 검증 결과
    pub fn success(&self) -> Option<bool> {
        self.receiver()
            .filter(|r| r.is_finished())
            .map(|r| r.is_success())
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}

impl<L: Link> Drop for Session<L> {
    fn drop(&mut self) {
        self.deinit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{ManualClock, RecordingLink};
    use crate::storage::MemoryStore;
    use crate::{FrameError, FRAME_SIZE};

    fn receiver_session() -> (Session<RecordingLink>, RecordingLink) {
        let link = RecordingLink::new(ManualClock::new());
        let mut session = Session::new(Config::default(), link.clone());
        session
            .init(RoleInit::Receive {
                sink: Box::new(MemoryStore::new()),
                pinned_tx_id: None,
            })
            .unwrap();
        (session, link)
    }

    #[test]
    fn test_init_twice_fails_and_deinit_is_idempotent() {
        let (mut session, _) = receiver_session();

        let again = session.init(RoleInit::Receive {
            sink: Box::new(MemoryStore::new()),
            pinned_tx_id: None,
        });
        assert!(matches!(again, Err(Error::AlreadyInitialized)));

        session.deinit();
        session.deinit();
        assert!(!session.is_active());
        session.tick();
        session.on_bytes_received(&[0u8; FRAME_SIZE]);
    }

    #[test]
    fn test_role_checked_operations() {
        let (mut session, _) = receiver_session();

        assert!(matches!(
            session.send_announce(),
            Err(Error::WrongRole { expected: "sender" })
        ));
        // 잠금 전 REQUEST는 보낼 대상이 없음
        assert!(matches!(session.send_request(0, 10), Err(Error::NotInitialized)));

        session.deinit();
        assert!(matches!(session.send_announce(), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_sender_init_fails_on_empty_file() {
        let mut session = Session::new(Config::default(), RecordingLink::default());
        let result = session.init(RoleInit::Send {
            tx_id: 1,
            file_name: "x".into(),
            source: Box::new(MemoryStore::new()),
        });

        assert!(matches!(result, Err(Error::EmptyFile)));
        assert!(!session.is_active());
    }

    #[test]
    fn test_bad_frames_counted_and_dropped() {
        let (mut session, link) = receiver_session();

        session.on_bytes_received(&[1u8; 10]);
        let mut bytes = crate::frame::encode(crate::PacketType::Announce, 1, &[]);
        bytes[5] ^= 0x10;
        session.on_bytes_received(&bytes);

        assert_eq!(session.stats().frames_received, 2);
        assert_eq!(session.stats().frames_dropped, 2);
        assert_eq!(link.sent_count(), 0);
        assert!(matches!(
            Frame::decode(&bytes),
            Err(FrameError::BadCrc { .. })
        ));
    }

    #[test]
    fn test_announce_ignored_after_lock_is_counted() {
        let (mut session, link) = receiver_session();
        let hash = crate::storage::md5_of(b"abc");

        let first = Frame::new(1, Packet::Announce(crate::Announce::new("a", 3, hash)));
        session.on_bytes_received(&first.to_bytes());
        assert_eq!(session.stats().frames_ignored, 0);
        assert_eq!(link.sent_count(), 1);

        // 같은 송신자의 재-ANNOUNCE, 다른 송신자의 ANNOUNCE
        session.on_bytes_received(&first.to_bytes());
        let other = Frame::new(2, Packet::Announce(crate::Announce::new("b", 3, hash)));
        session.on_bytes_received(&other.to_bytes());

        assert_eq!(session.stats().frames_ignored, 2);
        assert_eq!(session.receiver().unwrap().locked_tx_id(), Some(1));
    }

    #[test]
    fn test_sender_ignores_data_and_announce() {
        let link = RecordingLink::default();
        let mut session = Session::new(Config::default(), link.clone());
        session
            .init(RoleInit::Send {
                tx_id: 4,
                file_name: "f".into(),
                source: Box::new(MemoryStore::from_bytes(&[9u8; 70])),
            })
            .unwrap();

        let data = Frame::new(4, Packet::Data(crate::Data::new(0, &[1, 2])));
        session.on_bytes_received(&data.to_bytes());

        assert_eq!(session.stats().frames_ignored, 1);
        assert_eq!(link.sent_count(), 0);
        assert!(session.parts().is_none());
        assert_eq!(session.success(), None);
    }
}
