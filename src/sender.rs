//! 송신자
//!
//! - 시작 시 파일 전체를 한 번 읽어 크기/MD5 계산
//! - 주기적 ANNOUNCE 재전송으로 늦게 들어온 수신자도 발견 가능
//! - 재전송은 전적으로 수신자 REQUEST 주도 (송신자 스스로 재시도하지 않음)

use tracing::{debug, info, trace, warn};

use crate::frame::{Announce, Data, Frame, Packet, Request};
use crate::session::Tx;
use crate::storage::{self, BlockSource};
use crate::{block_count, block_len, Config, Link, Result, BLOCK_SIZE, HASH_LEN};

/// 요청받은 블록 구간 [next, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingBlocks {
    next: u32,
    end: u32,
}

/// 송신 세션
pub struct Sender {
    config: Config,
    tx_id: u8,
    source: Box<dyn BlockSource + Send>,
    file_name: String,
    file_size: u32,
    md5: [u8; HASH_LEN],

    /// 마지막으로 수락한 REQUEST 범위 (바이트)
    requested_range: Option<Request>,

    /// 아직 보내지 않은 요청 블록
    pending: Option<PendingBlocks>,

    /// 마지막 ANNOUNCE 시각
    last_announce_ms: Option<u64>,
}

impl Sender {
    /// 송신 시작: 블록 리더로 파일을 한 번 훑어 메타데이터 계산
    pub fn start(
        config: Config,
        tx_id: u8,
        file_name: impl Into<String>,
        mut source: Box<dyn BlockSource + Send>,
    ) -> Result<Self> {
        let (file_size, md5) = storage::scan(source.as_mut())?;
        let file_name = file_name.into();

        info!(
            "송신 준비: tx_id={}, file={:?}, {} bytes, {} blocks",
            tx_id,
            file_name,
            file_size,
            block_count(file_size)
        );

        Ok(Self {
            config,
            tx_id,
            source,
            file_name,
            file_size,
            md5,
            requested_range: None,
            pending: None,
            last_announce_ms: None,
        })
    }

    pub fn tx_id(&self) -> u8 {
        self.tx_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn md5(&self) -> [u8; HASH_LEN] {
        self.md5
    }

    pub fn requested_range(&self) -> Option<Request> {
        self.requested_range
    }

    /// 보낼 DATA가 남아 있는지
    pub fn is_serving(&self) -> bool {
        self.pending.is_some()
    }

    /// 남은 블록 수
    pub fn pending_blocks(&self) -> u32 {
        self.pending.map(|p| p.end - p.next).unwrap_or(0)
    }

    /// 이 송신자의 ANNOUNCE 프레임
    pub fn announce_frame(&self) -> Frame {
        Frame::new(
            self.tx_id,
            Packet::Announce(Announce::new(&self.file_name, self.file_size, self.md5)),
        )
    }

    /// ANNOUNCE 즉시 송신
    pub fn send_announce<L: Link>(&mut self, tx: &mut Tx<'_, L>) -> Result<()> {
        let now = tx.now_ms();
        tx.send(&self.announce_frame())?;
        self.last_announce_ms = Some(now);
        debug!("ANNOUNCE 송신: tx_id={}", self.tx_id);
        Ok(())
    }

    /// 주기 처리: 재-ANNOUNCE 후 남은 요청 블록 전송
    pub fn on_tick<L: Link>(&mut self, tx: &mut Tx<'_, L>) {
        let now = tx.now_ms();
        let due = match self.last_announce_ms {
            Some(last) => now.saturating_sub(last) >= self.config.announce_interval_ms,
            None => true,
        };

        let mut announced = false;
        if due {
            match self.send_announce(tx) {
                Ok(()) => announced = true,
                Err(e) => warn!("ANNOUNCE 송신 실패: {}", e),
            }
        }

        self.pump(tx, announced);
    }

    /// REQUEST 처리
    ///
    /// tx_id가 다르면 무시하고 false 반환. 새 요청은 이전 요청을 대체함
    pub fn on_request<L: Link>(&mut self, tx_id: u8, request: &Request, tx: &mut Tx<'_, L>) -> bool {
        if tx_id != self.tx_id {
            trace!("다른 세션의 REQUEST 무시: tx_id={}", tx_id);
            return false;
        }

        let start = request.range_start;
        let end = request.range_end.min(self.file_size);
        if start >= end {
            debug!(
                "빈 REQUEST 범위 무시: [{}, {}) (file_size={})",
                request.range_start, request.range_end, self.file_size
            );
            return false;
        }

        let first = start / BLOCK_SIZE as u32;
        let last = block_count(end);

        debug!(
            "REQUEST 수신: bytes [{}, {}) → blocks [{}, {})",
            start, end, first, last
        );

        self.requested_range = Some(Request {
            range_start: start,
            range_end: end,
        });
        self.pending = Some(PendingBlocks {
            next: first,
            end: last,
        });

        self.pump(tx, false);
        true
    }

    /// 요청 블록을 최대 burst_frames개 전송
    ///
    /// 프레임 사이에는 between_packets_ms 대기. 링크 송신 대기열이 밀려 있으면
    /// 남은 블록은 다음 tick으로 넘김
    fn pump<L: Link>(&mut self, tx: &mut Tx<'_, L>, mut sent_before: bool) {
        let mut budget = self.config.burst_frames;

        while budget > 0 {
            let Some(mut pending) = self.pending else {
                break;
            };
            if pending.next >= pending.end {
                self.pending = None;
                break;
            }
            if tx.is_busy() {
                trace!("링크 대기열 포화, 남은 블록 {}", pending.end - pending.next);
                break;
            }

            let block = pending.next;
            match self.data_frame(block) {
                Ok(frame) => {
                    if sent_before {
                        tx.delay_ms(self.config.between_packets_ms);
                    }
                    if let Err(e) = tx.send(&frame) {
                        // 무선이 바쁨: 다음 tick에 같은 블록부터
                        warn!("DATA 송신 실패: block={}, {}", block, e);
                        break;
                    }
                    trace!("DATA 송신: block={}", block);
                    sent_before = true;
                }
                Err(e) => {
                    // 이 블록만 건너뜀, 재전송은 수신자가 다시 요청
                    warn!("블록 읽기 실패: block={}, {}", block, e);
                    tx.stats().block_errors += 1;
                }
            }

            budget -= 1;
            pending.next += 1;
            self.pending = (pending.next < pending.end).then_some(pending);
        }
    }

    fn data_frame(&mut self, block: u32) -> Result<Frame> {
        let mut buf = [0u8; BLOCK_SIZE];
        let n = self.source.read_block(block, &mut buf)?;
        let len = n.min(block_len(self.file_size, block));

        Ok(Frame::new(
            self.tx_id,
            Packet::Data(Data::new(block, &buf[..len])),
        ))
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("tx_id", &self.tx_id)
            .field("file_name", &self.file_name)
            .field("file_size", &self.file_size)
            .field("requested_range", &self.requested_range)
            .field("pending", &self.pending)
            .field("last_announce_ms", &self.last_announce_ms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PacketType;
    use crate::link::{ManualClock, RecordingLink};
    use crate::storage::MemoryStore;
    use crate::{Error, TransferStats};

    /// 특정 블록 읽기만 실패하는 소스
    struct FlakySource {
        inner: MemoryStore,
        fail_block: u32,
        armed: bool,
    }

    impl BlockSource for FlakySource {
        fn read_block(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<usize> {
            if self.armed && block == self.fail_block {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "bad sector",
                )));
            }
            self.inner.read_block(block, buf)
        }
    }

    fn file(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 200) as u8 + 1).collect()
    }

    fn sender(config: Config, data: &[u8]) -> Sender {
        Sender::start(
            config,
            5,
            "hello.txt",
            Box::new(MemoryStore::from_bytes(data)),
        )
        .unwrap()
    }

    fn request(start: u32, end: u32) -> Request {
        Request {
            range_start: start,
            range_end: end,
        }
    }

    #[test]
    fn test_start_computes_metadata() {
        let data = file(130);
        let s = sender(Config::default(), &data);

        assert_eq!(s.file_size(), 130);
        assert_eq!(s.md5(), storage::md5_of(&data));
        assert!(!s.is_serving());

        match s.announce_frame().packet {
            Packet::Announce(a) => {
                assert_eq!(a.file_name_str(), "hello.txt");
                assert_eq!(a.file_size, 130);
                assert_eq!(a.hash, s.md5());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_start_rejects_empty_file() {
        let result = Sender::start(Config::default(), 1, "empty", Box::new(MemoryStore::new()));
        assert!(matches!(result, Err(Error::EmptyFile)));
    }

    #[test]
    fn test_reannounce_interval() {
        let clock = ManualClock::new();
        let mut link = RecordingLink::new(clock.clone());
        let mut stats = TransferStats::new();
        let mut s = sender(Config::default(), &file(10));

        s.on_tick(&mut Tx::new(&mut link, &mut stats));
        assert_eq!(link.take_frames().len(), 1);

        clock.advance(999);
        s.on_tick(&mut Tx::new(&mut link, &mut stats));
        assert!(link.take_frames().is_empty());

        clock.advance(1);
        s.on_tick(&mut Tx::new(&mut link, &mut stats));
        let frames = link.take_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].packet_type(), PacketType::Announce);
        assert_eq!(stats.announces_sent, 2);
    }

    #[test]
    fn test_request_with_foreign_tx_id_ignored() {
        let mut link = RecordingLink::new(ManualClock::new());
        let mut stats = TransferStats::new();
        let mut s = sender(Config::default(), &file(130));

        let handled = s.on_request(6, &request(0, 130), &mut Tx::new(&mut link, &mut stats));

        assert!(!handled);
        assert_eq!(link.sent_count(), 0);
        assert!(s.requested_range().is_none());
    }

    #[test]
    fn test_request_sends_blocks_with_padding_and_delay() {
        let data = file(130);
        let mut link = RecordingLink::new(ManualClock::new());
        let mut stats = TransferStats::new();
        let mut s = sender(Config::default(), &data);

        assert!(s.on_request(5, &request(0, 130), &mut Tx::new(&mut link, &mut stats)));

        let frames = link.take_frames();
        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.tx_id, 5);
            match frame.packet {
                Packet::Data(d) => {
                    assert_eq!(d.block_number, i as u32);
                    let len = block_len(130, i as u32);
                    let offset = i * BLOCK_SIZE;
                    assert_eq!(&d.data[..len], &data[offset..offset + len]);
                    assert!(d.data[len..].iter().all(|&b| b == 0));
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        // 프레임 3개 사이 간격 2번
        assert_eq!(link.total_delay_ms(), 2 * Config::default().between_packets_ms);
        assert!(!s.is_serving());
        assert_eq!(stats.data_sent, 3);
    }

    #[test]
    fn test_partial_range_covers_touched_blocks() {
        let mut link = RecordingLink::new(ManualClock::new());
        let mut stats = TransferStats::new();
        let mut s = sender(Config::default(), &file(300));

        // 60..110 → 블록 1, 2
        s.on_request(5, &request(60, 110), &mut Tx::new(&mut link, &mut stats));
        let blocks: Vec<u32> = link
            .take_frames()
            .iter()
            .filter_map(|f| match f.packet {
                Packet::Data(d) => Some(d.block_number),
                _ => None,
            })
            .collect();
        assert_eq!(blocks, vec![1, 2]);
    }

    #[test]
    fn test_range_clipped_and_empty_ranges_ignored() {
        let mut link = RecordingLink::new(ManualClock::new());
        let mut stats = TransferStats::new();
        let mut s = sender(Config::default(), &file(130));

        assert!(!s.on_request(5, &request(130, 500), &mut Tx::new(&mut link, &mut stats)));
        assert!(!s.on_request(5, &request(40, 40), &mut Tx::new(&mut link, &mut stats)));
        assert_eq!(link.sent_count(), 0);

        assert!(s.on_request(5, &request(104, 9999), &mut Tx::new(&mut link, &mut stats)));
        assert_eq!(s.requested_range(), Some(request(104, 130)));
        assert_eq!(link.take_frames().len(), 1);
    }

    #[test]
    fn test_burst_limit_continues_on_tick() {
        let config = Config {
            burst_frames: 2,
            ..Config::default()
        };
        let clock = ManualClock::new();
        let mut link = RecordingLink::new(clock.clone());
        let mut stats = TransferStats::new();
        let mut s = sender(config, &file(52 * 5));

        // 첫 tick의 ANNOUNCE 소비
        s.on_tick(&mut Tx::new(&mut link, &mut stats));
        link.take_sent();

        s.on_request(5, &request(0, 52 * 5), &mut Tx::new(&mut link, &mut stats));
        assert_eq!(link.take_sent().len(), 2);
        assert_eq!(s.pending_blocks(), 3);

        clock.advance(50);
        s.on_tick(&mut Tx::new(&mut link, &mut stats));
        assert_eq!(link.take_sent().len(), 2);

        clock.advance(50);
        s.on_tick(&mut Tx::new(&mut link, &mut stats));
        assert_eq!(link.take_sent().len(), 1);
        assert!(!s.is_serving());
    }

    #[test]
    fn test_read_failure_skips_only_that_block() {
        let data = file(130);
        let source = FlakySource {
            inner: MemoryStore::from_bytes(&data),
            fail_block: 1,
            armed: false,
        };
        let mut s = Sender::start(Config::default(), 5, "f", Box::new(source)).unwrap();

        // start() 이후에 실패 주입
        let mut link = RecordingLink::new(ManualClock::new());
        let mut stats = TransferStats::new();
        s.source = Box::new(FlakySource {
            inner: MemoryStore::from_bytes(&data),
            fail_block: 1,
            armed: true,
        });

        s.on_request(5, &request(0, 130), &mut Tx::new(&mut link, &mut stats));

        let blocks: Vec<u32> = link
            .take_frames()
            .iter()
            .filter_map(|f| match f.packet {
                Packet::Data(d) => Some(d.block_number),
                _ => None,
            })
            .collect();
        assert_eq!(blocks, vec![0, 2]);
        assert_eq!(stats.block_errors, 1);
        assert!(!s.is_serving());

        // 실패한 블록은 간격을 차지하지 않음: 0 → 2 사이 한 번
        assert_eq!(link.total_delay_ms(), Config::default().between_packets_ms);
    }

    #[test]
    fn test_newer_request_replaces_pending_blocks() {
        let config = Config {
            burst_frames: 2,
            ..Config::default()
        };
        let clock = ManualClock::new();
        let mut link = RecordingLink::new(clock.clone());
        let mut stats = TransferStats::new();
        let mut s = sender(config, &file(520));

        s.on_tick(&mut Tx::new(&mut link, &mut stats));
        link.take_sent();

        s.on_request(5, &request(0, 520), &mut Tx::new(&mut link, &mut stats));
        assert_eq!(s.pending_blocks(), 8);

        // 블록 2..7은 버려지고 8, 9만 남음
        s.on_request(5, &request(416, 520), &mut Tx::new(&mut link, &mut stats));
        assert_eq!(s.requested_range(), Some(request(416, 520)));

        clock.advance(50);
        s.on_tick(&mut Tx::new(&mut link, &mut stats));

        let blocks: Vec<u32> = link
            .take_frames()
            .iter()
            .filter_map(|f| match f.packet {
                Packet::Data(d) => Some(d.block_number),
                _ => None,
            })
            .collect();
        assert_eq!(blocks, vec![0, 1, 8, 9]);
        assert!(!s.is_serving());
    }

    #[test]
    fn test_busy_link_defers_blocks_to_next_tick() {
        let clock = ManualClock::new();
        let mut link = RecordingLink::new(clock.clone());
        let mut stats = TransferStats::new();
        let mut s = sender(Config::default(), &file(130));

        link.set_busy(true);
        assert!(s.on_request(5, &request(0, 130), &mut Tx::new(&mut link, &mut stats)));
        assert_eq!(link.sent_count(), 0);
        assert_eq!(s.pending_blocks(), 3);

        link.set_busy(false);
        clock.advance(50);
        s.on_tick(&mut Tx::new(&mut link, &mut stats));

        // 첫 ANNOUNCE + DATA 3개
        assert_eq!(link.take_sent().len(), 4);
        assert!(!s.is_serving());
        assert_eq!(stats.data_sent, 3);
    }
}
