//! 프로토콜 설정

/// Flipper Share 타이밍 설정
///
/// 모든 시간은 `Link::now_ms()` 기준 밀리초
#[derive(Debug, Clone)]
pub struct Config {
    /// 송신자 재-ANNOUNCE 간격 (FS_TIMEOUT_IDLE)
    /// 첫 ANNOUNCE를 놓친 수신자도 이 주기로 전송을 발견함
    pub announce_interval_ms: u64,

    /// DATA 프레임 사이 간격 (FS_TIMEOUT_BETWEEN_PACKETS)
    /// 반이중 무선의 송수신 전환 안정화 시간
    pub between_packets_ms: u64,

    /// 수신자 REQUEST 재전송 타임아웃 (마지막 DATA 이후)
    pub request_timeout_ms: u64,

    /// 백오프 상한
    /// 응답 없는 REQUEST마다 타임아웃 2배, 새 블록 수신 시 초기화
    pub max_request_timeout_ms: u64,

    /// 한 번의 tick/요청 처리에서 보낼 최대 DATA 프레임 수
    pub burst_frames: usize,

    /// `Session::tick()` 호출 주기 (최소 이 주기 이하로 호출되어야 함)
    pub tick_interval_ms: u64,

    /// 수신자가 잠금할 최대 파일 크기 (바이트), 초과 ANNOUNCE는 거부
    pub max_file_size: u32,
}

/// 기본 최대 파일 크기 (4 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u32 = 4 * 1024 * 1024;

impl Default for Config {
    fn default() -> Self {
        Self {
            announce_interval_ms: 1000,  // 1초
            between_packets_ms: 20,      // 20ms
            request_timeout_ms: 600,     // 600ms
            max_request_timeout_ms: 5000, // 5초
            burst_frames: 8,
            tick_interval_ms: 50,        // 50ms
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 주어진 재시도 횟수에 대한 REQUEST 타임아웃 (지수 백오프)
    pub fn request_timeout_for(&self, retries: u32) -> u64 {
        let shift = retries.min(16);
        self.request_timeout_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_request_timeout_ms)
    }

    /// 잡음이 많은 채널용 설정
    pub fn noisy_channel() -> Self {
        Self {
            announce_interval_ms: 2000,
            between_packets_ms: 40,       // 긴 안정화 시간
            request_timeout_ms: 1500,
            max_request_timeout_ms: 10_000,
            burst_frames: 4,
            tick_interval_ms: 50,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// 루프백/테스트용 설정
    pub fn fast_local() -> Self {
        Self {
            announce_interval_ms: 200,
            between_packets_ms: 1,
            request_timeout_ms: 100,
            max_request_timeout_ms: 800,
            burst_frames: 32,
            tick_interval_ms: 10,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_backoff() {
        let config = Config::default();

        assert_eq!(config.request_timeout_for(0), 600);
        assert_eq!(config.request_timeout_for(1), 1200);
        assert_eq!(config.request_timeout_for(2), 2400);
        assert_eq!(config.request_timeout_for(3), 4800);
        assert_eq!(config.request_timeout_for(4), 5000);
        assert_eq!(config.request_timeout_for(100), 5000);
    }
}
