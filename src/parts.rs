//! 진행률 추적기
//!
//! 임의 개수의 52바이트 블록을 100칸 고정 비트맵에 비례 매핑
//! - 블록 수 > 100: 여러 블록이 같은 칸을 공유 (그중 하나만 와도 칸이 채워짐)
//! - 블록 수 < 100: 블록 하나가 여러 칸을 채움
//!
//! 한 번 채워진 칸은 `reset()` 전까지 지워지지 않음

use crate::{Error, Result, FS_PARTS_COUNT};

/// 비트맵 바이트 수 (100비트 → 13바이트)
pub const PARTS_BITMAP_LEN: usize = (FS_PARTS_COUNT + 7) / 8;

/// UI용 진행률 비트맵
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartsTracker {
    bitmap: [u8; PARTS_BITMAP_LEN],
    block_count: u32,
}

impl PartsTracker {
    /// 블록 수로 초기화 (0이면 실패)
    pub fn new(block_count: u32) -> Result<Self> {
        if block_count == 0 {
            return Err(Error::EmptyPartsTracker);
        }

        Ok(Self {
            bitmap: [0u8; PARTS_BITMAP_LEN],
            block_count,
        })
    }

    /// 재초기화
    pub fn init(&mut self, block_count: u32) -> Result<()> {
        *self = Self::new(block_count)?;
        Ok(())
    }

    /// 모든 칸 비우기 (블록 수 유지)
    pub fn reset(&mut self) {
        self.bitmap = [0u8; PARTS_BITMAP_LEN];
    }

    /// 블록 수신 표시
    ///
    /// 블록 i는 [i*100/n, (i+1)*100/n) 구간의 칸을 채우며 최소 한 칸은 채움
    pub fn on_block_set(&mut self, block_index: u32) -> Result<()> {
        if block_index >= self.block_count {
            return Err(Error::BlockOutOfRange {
                block: block_index,
                blocks: self.block_count,
            });
        }

        let (start, end) = self.parts_for_block(block_index);
        for part in start..end {
            self.bitmap[part / 8] |= 1 << (part % 8);
        }
        Ok(())
    }

    fn parts_for_block(&self, block_index: u32) -> (usize, usize) {
        let n = self.block_count as u64;
        let parts = FS_PARTS_COUNT as u64;
        let start = (block_index as u64 * parts / n) as usize;
        let end = ((block_index as u64 + 1) * parts / n) as usize;
        (start, end.max(start + 1).min(FS_PARTS_COUNT))
    }

    /// 칸 상태 (범위 밖이면 false)
    pub fn get(&self, part_index: usize) -> bool {
        if part_index >= FS_PARTS_COUNT {
            return false;
        }
        self.bitmap[part_index / 8] & (1 << (part_index % 8)) != 0
    }

    /// 비트맵 복사 (LSB 우선), 복사한 바이트 수 반환
    pub fn bitmap_copy(&self, dst: &mut [u8]) -> usize {
        let len = dst.len().min(PARTS_BITMAP_LEN);
        dst[..len].copy_from_slice(&self.bitmap[..len]);
        len
    }

    /// 채워진 칸 수
    pub fn count(&self) -> usize {
        self.bitmap.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// 추적 중인 블록 수
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// 100칸 모두 채워졌는지
    pub fn is_ready(&self) -> bool {
        self.count() == FS_PARTS_COUNT
    }

    /// 진행률 (0.0 ~ 1.0)
    pub fn ratio(&self) -> f64 {
        self.count() as f64 / FS_PARTS_COUNT as f64
    }
}

/// 블록별 수신 여부 (블록당 1비트)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSet {
    bits: Vec<u64>,
    len: u32,
    count: u32,
}

impl BlockSet {
    pub fn new(len: u32) -> Self {
        Self {
            bits: vec![0; (len as usize).div_ceil(64)],
            len,
            count: 0,
        }
    }

    /// 표시된 블록 수
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn contains(&self, index: u32) -> bool {
        index < self.len && self.bits[index as usize / 64] & (1 << (index % 64)) != 0
    }

    /// 새로 표시되면 true (범위 밖이거나 이미 표시된 블록은 false)
    pub fn insert(&mut self, index: u32) -> bool {
        if index >= self.len || self.contains(index) {
            return false;
        }
        self.bits[index as usize / 64] |= 1 << (index % 64);
        self.count += 1;
        true
    }

    /// 첫 누락 블록
    pub fn first_missing(&self) -> Option<u32> {
        self.bits.iter().enumerate().find_map(|(word, &bits)| {
            let index = word as u32 * 64 + (!bits).trailing_zeros();
            (bits != u64::MAX && index < self.len).then_some(index)
        })
    }

    /// 마지막 누락 블록
    pub fn last_missing(&self) -> Option<u32> {
        (0..self.len).rev().find(|&i| !self.contains(i))
    }

    /// 누락 블록 목록
    pub fn missing(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len).filter(|&i| !self.contains(i))
    }
}
