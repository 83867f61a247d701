//! # Flipper Share
//!
//! 반이중(half-duplex) 손실 sub-GHz 무선 채널용 청크 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **고정 프레임**: 모든 패킷은 60바이트 (헤더 3 + 페이로드 56 + CRC-8 1)
//! - **수신자 주도 재전송**: 수신자가 빠진 바이트 범위를 REQUEST로 요청
//! - **tx_id 잠금**: 수신자는 첫 ANNOUNCE의 tx_id에 고정되어 주변 전송과 섞이지 않음
//! - **폴링 구동**: 타이머/인터럽트 없이 `Session::tick()` 호출로만 시간 기반 동작 수행
//! - **MD5 검증**: 재조립된 파일 전체를 다시 읽어 해시 비교
//! - **진행률 비트맵**: 블록 수와 무관하게 100칸 비트맵으로 진행 상황 표시

pub mod config;
pub mod error;
pub mod frame;
pub mod link;
pub mod parts;
pub mod radio;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod stats;
pub mod storage;

pub use config::Config;
pub use error::{Error, FrameError, Result};
pub use frame::{Announce, Data, Frame, Packet, PacketType, Request};
pub use link::{Link, ManualClock, RecordingLink};
pub use parts::{BlockSet, PartsTracker};
pub use receiver::{DataOutcome, Receiver, ReceiverSnapshot, ReceiverState};
pub use sender::Sender;
pub use session::{RoleInit, Session};
pub use stats::TransferStats;
pub use storage::{BlockSink, BlockSource, FileMeta, FileSource, InboxStore, MemoryStore};

/// 프로토콜 버전 (이 구현이 지원하는 유일한 버전)
pub const PROTOCOL_VERSION: u8 = 1;

/// 와이어 프레임 크기 (바이트)
pub const FRAME_SIZE: usize = 60;

/// 프레임 페이로드 크기 (바이트)
pub const PAYLOAD_SIZE: usize = 56;

/// DATA 프레임 하나가 운반하는 블록 크기 (바이트)
pub const BLOCK_SIZE: usize = 52;

/// ANNOUNCE 파일 이름 필드 크기
pub const FILE_NAME_LEN: usize = 36;

/// MD5 해시 크기
pub const HASH_LEN: usize = 16;

/// 진행률 비트맵 칸 수
pub const FS_PARTS_COUNT: usize = 100;

/// 파일 크기로부터 블록 수 계산: ceil(file_size / 52)
pub fn block_count(file_size: u32) -> u32 {
    ((file_size as u64 + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64) as u32
}

/// 블록 하나에서 실제 의미 있는 바이트 수 (마지막 블록은 잘림)
pub fn block_len(file_size: u32, block: u32) -> usize {
    let offset = block as u64 * BLOCK_SIZE as u64;
    if offset >= file_size as u64 {
        return 0;
    }
    (file_size as u64 - offset).min(BLOCK_SIZE as u64) as usize
}
