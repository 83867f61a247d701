//! 무선 송신 + 단조 시계 능력 (외부 협력자 경계)

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::frame::Frame;
use crate::{Result, FRAME_SIZE};

/// 프로토콜 코어가 임베딩 앱에 요구하는 송신/시계 능력
pub trait Link {
    /// 60바이트 프레임 하나 송신
    fn send_bytes(&mut self, frame: &[u8; FRAME_SIZE]) -> Result<()>;

    /// 단조 증가 밀리초 시계
    fn now_ms(&self) -> u64;

    /// 연속 송신 사이 안정화 대기
    ///
    /// 실제로 잠들 필요는 없음: 다음 프레임의 송신 시각을 미루기만 해도 됨
    fn delay_ms(&mut self, ms: u64);

    /// 송신 대기열이 밀려 있어 DATA를 더 쌓지 말아야 하는지
    fn is_busy(&self) -> bool {
        false
    }
}

/// 수동으로 진행시키는 시계 (복제 시 같은 시각 공유)
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

/// 송신 프레임을 기록만 하는 링크 (테스트/시뮬레이션용)
///
/// `delay_ms`는 공유 시계를 그만큼 진행시킴
#[derive(Debug, Clone, Default)]
pub struct RecordingLink {
    clock: ManualClock,
    sent: Arc<Mutex<Vec<[u8; FRAME_SIZE]>>>,
    delays: Arc<AtomicU64>,
    busy: Arc<AtomicBool>,
}

impl RecordingLink {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            ..Default::default()
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// 기록된 프레임을 모두 꺼냄
    pub fn take_sent(&self) -> Vec<[u8; FRAME_SIZE]> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// 기록된 프레임을 디코딩해서 꺼냄 (손상 프레임은 건너뜀)
    pub fn take_frames(&self) -> Vec<Frame> {
        self.take_sent()
            .iter()
            .filter_map(|bytes| Frame::decode(bytes).ok())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// 누적 대기 시간
    pub fn total_delay_ms(&self) -> u64 {
        self.delays.load(Ordering::SeqCst)
    }

    /// 송신 대기열 포화 흉내
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }
}

impl Link for RecordingLink {
    fn send_bytes(&mut self, frame: &[u8; FRAME_SIZE]) -> Result<()> {
        self.sent.lock().push(*frame);
        Ok(())
    }

    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn delay_ms(&mut self, ms: u64) {
        self.delays.fetch_add(ms, Ordering::SeqCst);
        self.clock.advance(ms);
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}
