//! 에러 타입 정의

use thiserror::Error;

/// 프레임 단위 에러
///
/// 수신 경로에서는 이 에러가 난 프레임을 조용히 버린다 (세션 상태 변화 없음)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("프레임 길이 불일치: expected 60, got {len}")]
    TooShort { len: usize },

    #[error("CRC 불일치: expected {expected:02X}, got {got:02X}")]
    BadCrc { expected: u8, got: u8 },

    #[error("지원하지 않는 프로토콜 버전: expected {expected}, got {got}")]
    UnsupportedVersion { expected: u8, got: u8 },

    #[error("알 수 없는 패킷 타입: {0}")]
    UnknownPacketType(u8),
}

/// Flipper Share 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("프레임 에러: {0}")]
    Frame(#[from] FrameError),

    #[error("빈 파일은 전송할 수 없음")]
    EmptyFile,

    #[error("파일이 너무 큼: {size} bytes (최대 u32)")]
    FileTooLarge { size: u64 },

    #[error("진행률 추적기는 블록 수 0으로 초기화할 수 없음")]
    EmptyPartsTracker,

    #[error("세션이 초기화되지 않음")]
    NotInitialized,

    #[error("세션이 이미 초기화됨")]
    AlreadyInitialized,

    #[error("역할 불일치: {expected} 세션 필요")]
    WrongRole { expected: &'static str },

    #[error("유효하지 않은 블록 번호: {block} (총 {blocks} 블록)")]
    BlockOutOfRange { block: u32, blocks: u32 },

    #[error("채널 에러")]
    ChannelError,

    #[error("연결 종료")]
    ConnectionClosed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
