//! 와이어 프레임 코덱
//!
//! 60바이트 고정 프레임:
//!
//! | 오프셋 | 크기 | 필드 |
//! |---|---|---|
//! | 0 | 1 | version |
//! | 1 | 1 | tx_id |
//! | 2 | 1 | packet_type (1=ANNOUNCE, 2=REQUEST, 3=DATA) |
//! | 3 | 56 | payload |
//! | 59 | 1 | crc (CRC-8/SMBUS, 앞 59바이트) |
//!
//! 다중 바이트 필드는 리틀 엔디언

use std::fmt;

use crate::error::FrameError;
use crate::{BLOCK_SIZE, FILE_NAME_LEN, FRAME_SIZE, HASH_LEN, PAYLOAD_SIZE, PROTOCOL_VERSION};

const HEADER_SIZE: usize = 3;
const CRC_OFFSET: usize = FRAME_SIZE - 1;

/// CRC-8 다항식 (x^8 + x^2 + x + 1), 초기값 0, 반사/최종 XOR 없음
pub const CRC8_POLY: u8 = 0x07;

/// CRC-8/SMBUS
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// 패킷 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// 파일 메타데이터 광고 (송신자 → 브로드캐스트)
    Announce = 1,

    /// 누락 바이트 범위 요청 (수신자 → 송신자)
    Request = 2,

    /// 블록 데이터 (송신자 → 수신자)
    Data = 3,
}

impl TryFrom<u8> for PacketType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Announce),
            2 => Ok(PacketType::Request),
            3 => Ok(PacketType::Data),
            other => Err(FrameError::UnknownPacketType(other)),
        }
    }
}

/// ANNOUNCE 페이로드 (36 + 4 + 16 = 56바이트)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Announce {
    /// 파일 이름 (NUL 패딩이 보장되지 않음)
    pub file_name: [u8; FILE_NAME_LEN],

    /// 파일 크기 (바이트)
    pub file_size: u32,

    /// 파일 전체의 MD5
    pub hash: [u8; HASH_LEN],
}

impl Announce {
    /// 이름이 36바이트를 넘으면 문자 경계에서 자름
    pub fn new(file_name: &str, file_size: u32, hash: [u8; HASH_LEN]) -> Self {
        let mut end = file_name.len().min(FILE_NAME_LEN);
        while !file_name.is_char_boundary(end) {
            end -= 1;
        }

        let mut name = [0u8; FILE_NAME_LEN];
        name[..end].copy_from_slice(&file_name.as_bytes()[..end]);

        Self {
            file_name: name,
            file_size,
            hash,
        }
    }

    /// 첫 NUL(없으면 36바이트 전체)까지의 이름
    pub fn file_name_str(&self) -> String {
        let end = self
            .file_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILE_NAME_LEN);
        String::from_utf8_lossy(&self.file_name[..end]).into_owned()
    }
}

impl fmt::Debug for Announce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Announce")
            .field("file_name", &self.file_name_str())
            .field("file_size", &self.file_size)
            .field("hash", &hex(&self.hash))
            .finish()
    }
}

/// REQUEST 페이로드: 반열린 바이트 범위 [range_start, range_end)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub range_start: u32,
    pub range_end: u32,
}

/// DATA 페이로드 (4 + 52 = 56바이트)
///
/// 마지막 블록의 남는 바이트는 0으로 채워지며 수신자가 file_size로 잘라냄
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Data {
    pub block_number: u32,
    pub data: [u8; BLOCK_SIZE],
}

impl Data {
    /// 52바이트보다 짧은 데이터는 0으로 패딩
    pub fn new(block_number: u32, bytes: &[u8]) -> Self {
        let len = bytes.len().min(BLOCK_SIZE);
        let mut data = [0u8; BLOCK_SIZE];
        data[..len].copy_from_slice(&bytes[..len]);
        Self { block_number, data }
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Data")
            .field("block_number", &self.block_number)
            .finish_non_exhaustive()
    }
}

/// 타입별 페이로드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    Announce(Announce),
    Request(Request),
    Data(Data),
}

impl Packet {
    /// 패킷 타입 반환
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Announce(_) => PacketType::Announce,
            Packet::Request(_) => PacketType::Request,
            Packet::Data(_) => PacketType::Data,
        }
    }

    /// 56바이트 페이로드로 직렬화 (남는 공간은 0)
    pub fn payload_bytes(&self) -> [u8; PAYLOAD_SIZE] {
        let mut buf = [0u8; PAYLOAD_SIZE];
        match self {
            Packet::Announce(a) => {
                buf[..FILE_NAME_LEN].copy_from_slice(&a.file_name);
                buf[FILE_NAME_LEN..FILE_NAME_LEN + 4].copy_from_slice(&a.file_size.to_le_bytes());
                buf[FILE_NAME_LEN + 4..].copy_from_slice(&a.hash);
            }
            Packet::Request(r) => {
                buf[0..4].copy_from_slice(&r.range_start.to_le_bytes());
                buf[4..8].copy_from_slice(&r.range_end.to_le_bytes());
            }
            Packet::Data(d) => {
                buf[0..4].copy_from_slice(&d.block_number.to_le_bytes());
                buf[4..].copy_from_slice(&d.data);
            }
        }
        buf
    }

    /// 페이로드 해석 (길이는 고정이므로 실패하지 않음)
    pub fn from_payload(packet_type: PacketType, payload: &[u8; PAYLOAD_SIZE]) -> Self {
        match packet_type {
            PacketType::Announce => {
                let mut file_name = [0u8; FILE_NAME_LEN];
                file_name.copy_from_slice(&payload[..FILE_NAME_LEN]);
                let mut hash = [0u8; HASH_LEN];
                hash.copy_from_slice(&payload[FILE_NAME_LEN + 4..]);
                Packet::Announce(Announce {
                    file_name,
                    file_size: read_u32(payload, FILE_NAME_LEN),
                    hash,
                })
            }
            PacketType::Request => Packet::Request(Request {
                range_start: read_u32(payload, 0),
                range_end: read_u32(payload, 4),
            }),
            PacketType::Data => {
                let mut data = [0u8; BLOCK_SIZE];
                data.copy_from_slice(&payload[4..]);
                Packet::Data(Data {
                    block_number: read_u32(payload, 0),
                    data,
                })
            }
        }
    }
}

/// 디코딩된 프레임
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub tx_id: u8,
    pub packet: Packet,
}

impl Frame {
    /// 현재 프로토콜 버전으로 프레임 생성
    pub fn new(tx_id: u8, packet: Packet) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            tx_id,
            packet,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet.packet_type()
    }

    /// 60바이트 와이어 포맷으로 직렬화
    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let mut buf = [0u8; FRAME_SIZE];
        buf[0] = self.version;
        buf[1] = self.tx_id;
        buf[2] = self.packet_type() as u8;
        buf[HEADER_SIZE..CRC_OFFSET].copy_from_slice(&self.packet.payload_bytes());
        buf[CRC_OFFSET] = crc8(&buf[..CRC_OFFSET]);
        buf
    }

    /// 와이어 바이트 검증 및 해석
    ///
    /// 검사 순서: 길이 → CRC → 버전 → 패킷 타입
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != FRAME_SIZE {
            return Err(FrameError::TooShort { len: bytes.len() });
        }

        let expected = crc8(&bytes[..CRC_OFFSET]);
        let got = bytes[CRC_OFFSET];
        if expected != got {
            return Err(FrameError::BadCrc { expected, got });
        }

        if bytes[0] != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion {
                expected: PROTOCOL_VERSION,
                got: bytes[0],
            });
        }

        let packet_type = PacketType::try_from(bytes[2])?;
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[HEADER_SIZE..CRC_OFFSET]);

        Ok(Self {
            version: bytes[0],
            tx_id: bytes[1],
            packet: Packet::from_payload(packet_type, &payload),
        })
    }
}

/// 원시 페이로드 인코딩: 헤더 채우기, 페이로드 56바이트 패딩/절단, CRC 부착
pub fn encode(packet_type: PacketType, tx_id: u8, payload: &[u8]) -> [u8; FRAME_SIZE] {
    let len = payload.len().min(PAYLOAD_SIZE);
    let mut buf = [0u8; FRAME_SIZE];
    buf[0] = PROTOCOL_VERSION;
    buf[1] = tx_id;
    buf[2] = packet_type as u8;
    buf[HEADER_SIZE..HEADER_SIZE + len].copy_from_slice(&payload[..len]);
    buf[CRC_OFFSET] = crc8(&buf[..CRC_OFFSET]);
    buf
}

/// `Frame::decode` 별칭
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    Frame::decode(bytes)
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
