//! 블록 저장소 (외부 협력자 경계)
//!
//! 프로토콜 코어는 파일 시스템을 직접 다루지 않고 블록 단위 콜백만 호출함.
//! 구현체는 빠르고 블로킹이 짧아야 함 (반이중 무선이라 느린 콜백은 수신을 멈춤)

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use tracing::debug;

use crate::{block_count, block_len, Error, Result, BLOCK_SIZE, HASH_LEN};

/// 수신 파일 메타데이터 (ANNOUNCE에서 추출)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    pub size: u32,
    pub md5: [u8; HASH_LEN],
}

/// 블록 읽기 콜백
pub trait BlockSource {
    /// `block` 번째 52바이트 블록을 읽어 실제 읽은 바이트 수 반환
    /// 파일 끝 이후는 0
    fn read_block(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<usize>;
}

/// 블록 쓰기 콜백 (완료 후 MD5 재검증을 위해 읽기도 지원)
pub trait BlockSink: BlockSource {
    /// 수신자가 송신자에 잠금될 때 한 번 호출
    fn prepare(&mut self, _meta: &FileMeta) -> Result<()> {
        Ok(())
    }

    /// 이미 받은 블록이 다시 오면 같은 데이터로 다시 호출될 수 있음
    fn write_block(&mut self, block: u32, data: &[u8]) -> Result<()>;
}

/// 블록 리더로 파일 전체를 한 번 훑어 (크기, MD5) 계산
///
/// 52바이트보다 짧게 읽히는 첫 블록에서 끝남
pub fn scan<S: BlockSource + ?Sized>(source: &mut S) -> Result<(u32, [u8; HASH_LEN])> {
    let mut hasher = Md5::new();
    let mut buf = [0u8; BLOCK_SIZE];
    let mut total: u64 = 0;
    let mut block: u32 = 0;

    loop {
        let n = source.read_block(block, &mut buf)?.min(BLOCK_SIZE);
        hasher.update(&buf[..n]);
        total += n as u64;

        if total > u32::MAX as u64 {
            return Err(Error::FileTooLarge { size: total });
        }
        if n < BLOCK_SIZE {
            break;
        }
        block = block.checked_add(1).ok_or(Error::FileTooLarge { size: total })?;
    }

    if total == 0 {
        return Err(Error::EmptyFile);
    }

    Ok((total as u32, hasher.finalize().into()))
}

/// 알려진 크기만큼 다시 읽어 MD5 계산 (재조립 결과 검증용)
pub fn digest<S: BlockSource + ?Sized>(source: &mut S, file_size: u32) -> Result<[u8; HASH_LEN]> {
    let mut hasher = Md5::new();
    let mut buf = [0u8; BLOCK_SIZE];

    for block in 0..block_count(file_size) {
        let want = block_len(file_size, block);
        let n = source.read_block(block, &mut buf)?;
        if n < want {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("블록 {} 짧게 읽힘: {}/{}", block, n, want),
            )));
        }
        hasher.update(&buf[..want]);
    }

    Ok(hasher.finalize().into())
}

/// 바이트 슬라이스의 MD5
pub fn md5_of(data: &[u8]) -> [u8; HASH_LEN] {
    Md5::digest(data).into()
}

/// 메모리 저장소 (복제 가능한 공유 핸들)
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<BytesMut>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: Arc::new(Mutex::new(BytesMut::from(bytes))),
        }
    }

    /// 현재 내용 스냅샷
    pub fn contents(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data.lock())
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockSource for MemoryStore {
    fn read_block(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<usize> {
        let data = self.data.lock();
        let offset = block as usize * BLOCK_SIZE;
        if offset >= data.len() {
            return Ok(0);
        }

        let end = (offset + BLOCK_SIZE).min(data.len());
        buf[..end - offset].copy_from_slice(&data[offset..end]);
        Ok(end - offset)
    }
}

impl BlockSink for MemoryStore {
    fn prepare(&mut self, meta: &FileMeta) -> Result<()> {
        let mut data = self.data.lock();
        data.clear();
        data.resize(meta.size as usize, 0);
        Ok(())
    }

    fn write_block(&mut self, block: u32, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        let offset = block as usize * BLOCK_SIZE;
        let end = offset + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}

/// 읽기 전용 파일 (송신측)
#[derive(Debug)]
pub struct FileSource {
    file: File,
    path: PathBuf,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// ANNOUNCE에 실을 파일 이름 (경로 제외)
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl BlockSource for FileSource {
    fn read_block(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<usize> {
        self.file
            .seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))?;
        read_full(&mut self.file, buf)
    }
}

/// 수신함 디렉토리에 파일을 쓰는 저장소 (수신측)
#[derive(Debug)]
pub struct InboxStore {
    inbox: PathBuf,
    file: Option<File>,
    path: Option<PathBuf>,
}

impl InboxStore {
    pub fn new(inbox: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
            file: None,
            path: None,
        }
    }

    /// `prepare` 이후 생성된 파일 경로
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(Error::NotInitialized)
    }
}

impl BlockSource for InboxStore {
    fn read_block(&mut self, block: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<usize> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))?;
        read_full(file, buf)
    }
}

impl BlockSink for InboxStore {
    fn prepare(&mut self, meta: &FileMeta) -> Result<()> {
        fs::create_dir_all(&self.inbox)?;

        let path = self.inbox.join(sanitize_file_name(&meta.name));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(meta.size as u64)?;

        debug!("수신 파일 생성: {:?} ({} bytes)", path, meta.size);
        self.file = Some(file);
        self.path = Some(path);
        Ok(())
    }

    fn write_block(&mut self, block: u32, data: &[u8]) -> Result<()> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))?;
        file.write_all(data)?;
        Ok(())
    }
}

/// 수신 파일 이름 정리: 경로 구분자/NUL/제어 문자 제거, 앞쪽 점 제거
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':') && !c.is_control())
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');

    if cleaned.is_empty() {
        "received.bin".to_string()
    } else {
        cleaned.to_string()
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
