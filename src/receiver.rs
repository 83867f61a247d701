//! 수신자
//!
//! - 첫 유효 ANNOUNCE의 tx_id에 잠금 (전체 리셋 전까지 해제되지 않음)
//! - 블록 수신 및 조립, 중복/순서 뒤바뀜 허용
//! - 타임아웃 시 남은 바이트 범위 REQUEST 재전송 (지수 백오프)
//! - 모든 블록 수신 후 MD5 재검증

use tracing::{debug, info, trace, warn};

use crate::frame::{hex, Announce, Data, Frame, Packet, Request};
use crate::parts::{BlockSet, PartsTracker};
use crate::session::Tx;
use crate::storage::{self, BlockSink, FileMeta};
use crate::{block_count, block_len, Config, Error, Link, Result, BLOCK_SIZE};

/// 수신 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// 잠금 전, ANNOUNCE 대기
    Listening,

    /// 송신자에 잠금되어 블록 수신 중
    Receiving,

    /// 모든 블록 수신 완료 (MD5 검증 결과 포함)
    Finished { success: bool },
}

/// DATA 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOutcome {
    /// 잠금 전, 다른 tx_id, 범위 밖, 완료 후
    Ignored,

    /// 새 블록 기록
    Accepted,

    /// 이미 받은 블록 (다시 기록됨, 카운트 변화 없음)
    Duplicate,

    /// 쓰기 콜백 실패 (이 블록만 미수신 처리)
    WriteFailed,

    /// 마지막 블록 기록 후 검증까지 끝남
    Completed { success: bool },
}

/// 비교 가능한 수신자 상태 사본
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverSnapshot {
    pub state: ReceiverState,
    pub locked: bool,
    pub locked_tx_id: u8,
    pub meta: Option<FileMeta>,
    pub blocks_needed: u32,
    pub blocks_received: u32,
    pub received: BlockSet,
    pub parts: Option<PartsTracker>,
    pub finished: bool,
    pub success: bool,
    pub last_rx_ms: u64,
    pub last_request_ms: u64,
    pub retries: u32,
    pub rejected: Vec<u8>,
}

/// 수신 세션
pub struct Receiver {
    config: Config,
    sink: Box<dyn BlockSink + Send>,

    /// 이 tx_id에만 잠금 (None이면 아무 송신자)
    pinned_tx_id: Option<u8>,

    /// 잠금 거부된 tx_id
    rejected: Vec<u8>,

    locked: bool,
    locked_tx_id: u8,
    meta: Option<FileMeta>,
    blocks_needed: u32,

    /// 블록별 수신 여부
    received: BlockSet,

    parts: Option<PartsTracker>,
    finished: bool,
    success: bool,

    /// 마지막 DATA 수신 시각
    last_rx_ms: u64,

    /// 마지막 REQUEST 송신 시각
    last_request_ms: u64,

    /// 연속 무응답 REQUEST 횟수 (백오프 단계)
    retries: u32,
}

impl Receiver {
    pub fn new(config: Config, sink: Box<dyn BlockSink + Send>, pinned_tx_id: Option<u8>) -> Self {
        Self {
            config,
            sink,
            pinned_tx_id,
            rejected: Vec::new(),
            locked: false,
            locked_tx_id: 0,
            meta: None,
            blocks_needed: 0,
            received: BlockSet::default(),
            parts: None,
            finished: false,
            success: false,
            last_rx_ms: 0,
            last_request_ms: 0,
            retries: 0,
        }
    }

    pub fn state(&self) -> ReceiverState {
        if self.finished {
            ReceiverState::Finished {
                success: self.success,
            }
        } else if self.locked {
            ReceiverState::Receiving
        } else {
            ReceiverState::Listening
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn locked_tx_id(&self) -> Option<u8> {
        self.locked.then_some(self.locked_tx_id)
    }

    pub fn meta(&self) -> Option<&FileMeta> {
        self.meta.as_ref()
    }

    pub fn blocks_needed(&self) -> u32 {
        self.blocks_needed
    }

    pub fn blocks_received(&self) -> u32 {
        self.received.count()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn parts(&self) -> Option<&PartsTracker> {
        self.parts.as_ref()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// 아직 받지 못한 블록 번호
    pub fn missing_blocks(&self) -> Vec<u32> {
        self.received.missing().collect()
    }

    /// 이 tx_id에 앞으로 잠금하지 않음 (현재 잠금은 유지)
    pub fn reject(&mut self, tx_id: u8) {
        if !self.rejected.contains(&tx_id) {
            self.rejected.push(tx_id);
        }
    }

    pub fn is_rejected(&self, tx_id: u8) -> bool {
        self.rejected.contains(&tx_id)
    }

    /// 전체 리셋: 잠금 해제, 수신 상태 초기화 (거부 목록은 유지)
    pub fn reset(&mut self) {
        self.locked = false;
        self.locked_tx_id = 0;
        self.meta = None;
        self.blocks_needed = 0;
        self.received = BlockSet::default();
        self.parts = None;
        self.finished = false;
        self.success = false;
        self.last_rx_ms = 0;
        self.last_request_ms = 0;
        self.retries = 0;
    }

    pub fn snapshot(&self) -> ReceiverSnapshot {
        ReceiverSnapshot {
            state: self.state(),
            locked: self.locked,
            locked_tx_id: self.locked_tx_id,
            meta: self.meta.clone(),
            blocks_needed: self.blocks_needed,
            blocks_received: self.received.count(),
            received: self.received.clone(),
            parts: self.parts.clone(),
            finished: self.finished,
            success: self.success,
            last_rx_ms: self.last_rx_ms,
            last_request_ms: self.last_request_ms,
            retries: self.retries,
            rejected: self.rejected.clone(),
        }
    }

    /// ANNOUNCE 처리, 이번 프레임으로 잠금되면 true
    pub fn on_announce<L: Link>(&mut self, tx_id: u8, announce: &Announce, tx: &mut Tx<'_, L>) -> bool {
        if self.locked || self.finished {
            trace!("잠금 상태에서 ANNOUNCE 무시: tx_id={}", tx_id);
            return false;
        }
        if self.is_rejected(tx_id) {
            trace!("거부된 tx_id의 ANNOUNCE 무시: {}", tx_id);
            return false;
        }
        if self.pinned_tx_id.is_some_and(|pinned| pinned != tx_id) {
            trace!("고정 tx_id 불일치: {}", tx_id);
            return false;
        }
        if announce.file_size == 0 {
            warn!("빈 파일 ANNOUNCE 거부: tx_id={}", tx_id);
            self.reject(tx_id);
            return false;
        }
        if announce.file_size > self.config.max_file_size {
            warn!(
                "최대 크기 초과 ANNOUNCE 거부: tx_id={}, {} bytes (최대 {})",
                tx_id, announce.file_size, self.config.max_file_size
            );
            self.reject(tx_id);
            return false;
        }

        let meta = FileMeta {
            name: announce.file_name_str(),
            size: announce.file_size,
            md5: announce.hash,
        };
        let blocks = block_count(meta.size);

        let parts = match PartsTracker::new(blocks) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("진행률 추적기 초기화 실패: {}", e);
                self.reject(tx_id);
                return false;
            }
        };

        if let Err(e) = self.sink.prepare(&meta) {
            warn!("저장소 준비 실패, tx_id={} 거부: {}", tx_id, e);
            self.reject(tx_id);
            return false;
        }

        info!(
            "송신자 잠금: tx_id={}, file={:?}, {} bytes, {} blocks, md5={}",
            tx_id,
            meta.name,
            meta.size,
            blocks,
            hex(&meta.md5)
        );

        let now = tx.now_ms();
        self.locked = true;
        self.locked_tx_id = tx_id;
        self.blocks_needed = blocks;
        self.received = BlockSet::new(blocks);
        self.parts = Some(parts);
        self.last_rx_ms = now;
        self.retries = 0;
        let size = meta.size;
        self.meta = Some(meta);

        // 전체 범위 즉시 요청
        if let Err(e) = self.send_request(0, size, tx) {
            warn!("초기 REQUEST 송신 실패: {}", e);
        }
        true
    }

    /// DATA 처리
    pub fn on_data(&mut self, tx_id: u8, data: &Data, now_ms: u64) -> DataOutcome {
        if !self.locked || self.finished || tx_id != self.locked_tx_id {
            return DataOutcome::Ignored;
        }

        let block = data.block_number;
        if block >= self.blocks_needed {
            debug!(
                "범위 밖 블록 무시: {} (총 {} 블록)",
                block, self.blocks_needed
            );
            return DataOutcome::Ignored;
        }

        self.last_rx_ms = now_ms;

        let file_size = self.meta.as_ref().map(|m| m.size).unwrap_or(0);
        let len = block_len(file_size, block);
        if let Err(e) = self.sink.write_block(block, &data.data[..len]) {
            warn!("블록 쓰기 실패: block={}, {}", block, e);
            return DataOutcome::WriteFailed;
        }

        if !self.received.insert(block) {
            trace!("중복 블록: {}", block);
            return DataOutcome::Duplicate;
        }

        self.retries = 0;
        if let Some(parts) = self.parts.as_mut() {
            if let Err(e) = parts.on_block_set(block) {
                debug!("진행률 갱신 실패: {}", e);
            }
        }

        trace!(
            "블록 수신: {} ({}/{})",
            block,
            self.received.count(),
            self.blocks_needed
        );

        if self.received.count() == self.blocks_needed {
            let success = self.finish();
            return DataOutcome::Completed { success };
        }

        DataOutcome::Accepted
    }

    /// 재조립된 파일 전체를 다시 읽어 MD5 비교
    fn finish(&mut self) -> bool {
        let Some(meta) = self.meta.as_ref() else {
            return false;
        };

        self.success = match storage::digest(self.sink.as_mut(), meta.size) {
            Ok(computed) if computed == meta.md5 => {
                info!("수신 완료: {:?} ({} bytes), MD5 일치", meta.name, meta.size);
                true
            }
            Ok(computed) => {
                warn!(
                    "수신 완료, MD5 불일치: expected {}, got {}",
                    hex(&meta.md5),
                    hex(&computed)
                );
                false
            }
            Err(e) => {
                warn!("수신 완료, 검증용 재읽기 실패: {}", e);
                false
            }
        };
        self.finished = true;
        self.success
    }

    /// 남은 블록을 덮는 바이트 범위 [첫 누락 블록, 마지막 누락 블록]
    pub fn remaining_range(&self) -> Option<Request> {
        let file_size = self.meta.as_ref()?.size;
        let first = self.received.first_missing()?;
        let last = self.received.last_missing()?;

        let start = first as u64 * BLOCK_SIZE as u64;
        let end = ((last as u64 + 1) * BLOCK_SIZE as u64).min(file_size as u64);
        Some(Request {
            range_start: start as u32,
            range_end: end as u32,
        })
    }

    /// 잠금된 송신자에게 REQUEST 송신
    pub fn send_request<L: Link>(&mut self, range_start: u32, range_end: u32, tx: &mut Tx<'_, L>) -> Result<()> {
        if !self.locked {
            return Err(Error::NotInitialized);
        }

        let frame = Frame::new(
            self.locked_tx_id,
            Packet::Request(Request {
                range_start,
                range_end,
            }),
        );
        self.last_request_ms = tx.now_ms();
        tx.send(&frame)?;

        debug!(
            "REQUEST 송신: tx_id={}, bytes [{}, {})",
            self.locked_tx_id, range_start, range_end
        );
        Ok(())
    }

    /// 주기 처리: 잠금 후 DATA가 끊기면 남은 범위 재요청
    pub fn on_tick<L: Link>(&mut self, tx: &mut Tx<'_, L>) {
        if !self.locked || self.finished {
            return;
        }

        let now = tx.now_ms();
        let last_activity = self.last_rx_ms.max(self.last_request_ms);
        let timeout = self.config.request_timeout_for(self.retries);
        if now.saturating_sub(last_activity) < timeout {
            return;
        }

        let Some(range) = self.remaining_range() else {
            return;
        };

        debug!(
            "수신 타임아웃 ({}ms, 재시도 {}): 남은 {} 블록 재요청",
            timeout,
            self.retries,
            self.blocks_needed - self.received.count()
        );

        match self.send_request(range.range_start, range.range_end, tx) {
            Ok(()) => {
                self.retries = self.retries.saturating_add(1);
                tx.stats().request_retries += 1;
            }
            Err(e) => warn!("재요청 송신 실패: {}", e),
        }
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("state", &self.state())
            .field("locked_tx_id", &self.locked_tx_id())
            .field("meta", &self.meta)
            .field("blocks_received", &self.received.count())
            .field("blocks_needed", &self.blocks_needed)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}
