//! KST 영업일 달력 유틸리티.
//!
//! 모든 제공자 API는 한국거래소 달력 기준의 `YYYYMMDD` 날짜 문자열을
//! 사용합니다. 주말은 전 영업일로 되돌리며, 공휴일은 고려하지 않습니다
//! (데이터가 없는 날짜는 호출 측의 영업일 fallback 루프가 흡수합니다).

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use chrono_tz::Asia::Seoul;

/// UTC 시각을 KST 기준 `YYYYMMDD` 문자열로 변환.
pub fn to_kst_yyyymmdd(now: DateTime<Utc>) -> String {
    now.with_timezone(&Seoul).format("%Y%m%d").to_string()
}

/// 오늘 날짜 (KST 기준).
pub fn today_kst() -> String {
    to_kst_yyyymmdd(Utc::now())
}

/// 주말 여부 확인.
pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// `YYYYMMDD` 문자열 파싱.
pub fn parse_yyyymmdd(ymd: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(ymd, "%Y%m%d").ok()
}

/// `YYYYMMDD` 문자열로 포맷.
pub fn format_yyyymmdd(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// 주말이면 직전 영업일로 되돌립니다. 파싱 불가능한 입력은 그대로 반환.
pub fn adjust_to_business_day(ymd: &str) -> String {
    let Some(mut date) = parse_yyyymmdd(ymd) else {
        return ymd.to_string();
    };
    while is_weekend(date) {
        date -= Duration::days(1);
    }
    format_yyyymmdd(date)
}

/// 직전 영업일 반환. 최소 하루는 되돌린 뒤 주말을 건너뜁니다.
pub fn previous_business_day(ymd: &str) -> String {
    let Some(mut date) = parse_yyyymmdd(ymd) else {
        return ymd.to_string();
    };
    loop {
        date -= Duration::days(1);
        if !is_weekend(date) {
            break;
        }
    }
    format_yyyymmdd(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekend_detection() {
        // 2026-08-29 = 토요일, 2026-08-30 = 일요일, 2026-08-31 = 월요일
        assert!(is_weekend(NaiveDate::from_ymd_opt(2026, 8, 29).unwrap()));
        assert!(is_weekend(NaiveDate::from_ymd_opt(2026, 8, 30).unwrap()));
        assert!(!is_weekend(NaiveDate::from_ymd_opt(2026, 8, 31).unwrap()));
    }

    #[test]
    fn test_adjust_to_business_day() {
        // 일요일 -> 금요일
        assert_eq!(adjust_to_business_day("20260830"), "20260828");
        // 토요일 -> 금요일
        assert_eq!(adjust_to_business_day("20260829"), "20260828");
        // 평일은 그대로
        assert_eq!(adjust_to_business_day("20260828"), "20260828");
    }

    #[test]
    fn test_previous_business_day() {
        // 월요일 -> 금요일
        assert_eq!(previous_business_day("20260831"), "20260828");
        // 화요일 -> 월요일
        assert_eq!(previous_business_day("20260901"), "20260831");
        // 일요일 -> 금요일
        assert_eq!(previous_business_day("20260830"), "20260828");
    }

    #[test]
    fn test_previous_business_day_never_weekend() {
        let mut ymd = "20261231".to_string();
        for _ in 0..30 {
            ymd = previous_business_day(&ymd);
            let date = parse_yyyymmdd(&ymd).unwrap();
            assert!(!is_weekend(date), "주말 반환: {}", ymd);
        }
    }

    #[test]
    fn test_previous_business_day_strictly_earlier() {
        for ymd in ["20260828", "20260829", "20260830", "20260831"] {
            let prev = previous_business_day(ymd);
            assert!(prev.as_str() < ymd, "{} -> {}", ymd, prev);
        }
    }

    #[test]
    fn test_invalid_input_passthrough() {
        assert_eq!(adjust_to_business_day("not-a-date"), "not-a-date");
        assert_eq!(previous_business_day(""), "");
    }

    #[test]
    fn test_kst_conversion() {
        // 2026-08-28 16:00 UTC = 2026-08-29 01:00 KST
        let utc = DateTime::parse_from_rfc3339("2026-08-28T16:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(to_kst_yyyymmdd(utc), "20260829");
    }
}
