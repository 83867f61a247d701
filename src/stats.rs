//! 전송 통계

use crate::frame::PacketType;

/// 세션 전송 통계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// 송신 프레임 수
    pub frames_sent: u64,

    /// 수신 프레임 수 (검증 전)
    pub frames_received: u64,

    /// 길이/CRC/버전 검증 실패로 버린 프레임 수
    pub frames_dropped: u64,

    /// 다른 tx_id, 역할 불일치 등으로 무시한 프레임 수
    pub frames_ignored: u64,

    /// 송신한 ANNOUNCE 수
    pub announces_sent: u64,

    /// 송신한 REQUEST 수
    pub requests_sent: u64,

    /// 송신한 DATA 수
    pub data_sent: u64,

    /// 새로 기록된 블록 수
    pub blocks_written: u64,

    /// 중복 수신 블록 수
    pub duplicate_blocks: u64,

    /// 타임아웃으로 재전송한 REQUEST 수
    pub request_retries: u64,

    /// 블록 읽기/쓰기 실패 수
    pub block_errors: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 송신 프레임 기록
    pub fn record_sent(&mut self, packet_type: PacketType) {
        self.frames_sent += 1;
        match packet_type {
            PacketType::Announce => self.announces_sent += 1,
            PacketType::Request => self.requests_sent += 1,
            PacketType::Data => self.data_sent += 1,
        }
    }

    /// 수신 프레임 중 버려진 비율
    pub fn drop_rate(&self) -> f64 {
        if self.frames_received == 0 {
            return 0.0;
        }
        self.frames_dropped as f64 / self.frames_received as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "TX: {} (A {} / R {} / D {}) | RX: {} (dropped {:.1}%, ignored {}) | Blocks: {} new, {} dup | Retries: {} | I/O errors: {}",
            self.frames_sent,
            self.announces_sent,
            self.requests_sent,
            self.data_sent,
            self.frames_received,
            self.drop_rate() * 100.0,
            self.frames_ignored,
            self.blocks_written,
            self.duplicate_blocks,
            self.request_retries,
            self.block_errors,
        )
    }
}
