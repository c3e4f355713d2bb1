//! 제공자 숫자 문자열 파싱.
//!
//! KIS/KRX 응답의 숫자 필드는 대부분 문자열이며 천 단위 쉼표가 섞여
//! 있습니다. 모든 제공자가 이 모듈의 파서를 공유합니다.

use serde_json::Value;

/// 쉼표/공백을 제거한 뒤 유한한 f64로 파싱. 실패 시 `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let normalized = raw.replace(',', "");
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        return None;
    }
    let num: f64 = trimmed.parse().ok()?;
    num.is_finite().then_some(num)
}

/// JSON 값에서 숫자 추출 (숫자 또는 쉼표 포함 문자열 허용).
pub fn number_from_json(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => {
            let num = n.as_f64()?;
            num.is_finite().then_some(num)
        }
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// JSON 객체에서 후보 필드명을 순서대로 시도해 첫 번째 숫자를 반환.
///
/// 스키마가 불안정한 응답(필드명 대소문자 변형 등)을 위해 암묵적
/// 프로퍼티 탐색 대신 명시적 후보 목록을 사용합니다.
pub fn first_numeric_field(value: &Value, candidates: &[&str]) -> Option<f64> {
    let obj = value.as_object()?;
    for key in candidates {
        if let Some(field) = obj.get(*key) {
            if let Some(num) = number_from_json(field) {
                return Some(num);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("1,234,567"), Some(1234567.0));
        assert_eq!(parse_number(" 42.5 "), Some(42.5));
        assert_eq!(parse_number("-3.2"), Some(-3.2));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("NaN"), None);
    }

    #[test]
    fn test_number_from_json() {
        assert_eq!(number_from_json(&json!(12.5)), Some(12.5));
        assert_eq!(number_from_json(&json!("1,000")), Some(1000.0));
        assert_eq!(number_from_json(&json!(null)), None);
        assert_eq!(number_from_json(&json!([1])), None);
    }

    #[test]
    fn test_first_numeric_field() {
        let row = json!({ "OPNPRC": "", "opnprc_idx": "15.32", "OPEN": "20.0" });
        assert_eq!(
            first_numeric_field(&row, &["OPNPRC_IDX", "opnprc_idx", "OPNPRC"]),
            Some(15.32)
        );
        assert_eq!(first_numeric_field(&row, &["missing"]), None);
    }
}
