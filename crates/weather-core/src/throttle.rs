//! 공유 슬롯 저장소 추상화.
//!
//! 분산 레이트리미터가 호출 간격을 조율할 때 사용하는 백엔드 계약입니다.
//! 운영에서는 Redis 구현을 꽂고, 테스트에서는 인메모리 구현을 꽂습니다.

use async_trait::async_trait;
use thiserror::Error;

/// 슬롯 저장소 오류.
///
/// 저장소 장애는 호출 차단 사유가 아니므로 구체 타입 대신 메시지만
/// 실어 올립니다. 호출자는 로그만 남기고 로컬 간격 유지로 강등합니다.
#[derive(Debug, Error)]
#[error("슬롯 저장소 오류: {0}")]
pub struct SlotStoreError(pub String);

impl SlotStoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// 분산 호출 슬롯 저장소.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// 키가 비어 있으면 `ttl_ms` 동안 점유하고 `true` 반환.
    /// 이미 점유 중이면 `false`.
    async fn try_claim(
        &self,
        key: &str,
        holder: &str,
        ttl_ms: u64,
    ) -> Result<bool, SlotStoreError>;

    /// 키의 남은 수명 (밀리초). 키가 없거나 TTL이 없으면 음수.
    async fn remaining_ms(&self, key: &str) -> Result<i64, SlotStoreError>;
}
