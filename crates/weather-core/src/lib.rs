//! # Weather Core
//!
//! 시장 날씨 게이트웨이의 핵심 도메인 모델 및 공용 유틸리티를 제공합니다.
//!
//! 이 크레이트는 상위 크레이트 전반에서 사용되는 기본 타입을 제공합니다:
//! - 시세/이력/등락 데이터 구조체
//! - 성공/캐시/스테일/실패를 구분하는 조회 결과 타입
//! - KST 영업일 달력 유틸리티
//! - 쉼표 포함 숫자 문자열 파싱
//! - 분산 스로틀 슬롯 저장소 trait
//! - 로깅 인프라

pub mod calendar;
pub mod domain;
pub mod logging;
pub mod num;
pub mod throttle;

pub use calendar::*;
pub use domain::*;
pub use logging::*;
pub use num::*;
pub use throttle::{SlotStore, SlotStoreError};
