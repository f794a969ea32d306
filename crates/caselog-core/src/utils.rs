//! 通用工具函数

use chrono::Utc;
use uuid::Uuid;

/// 生成唯一的病例编号
///
/// 形如 `CASE-<毫秒时间戳>-<随机段>`；历史数据中还存在 `CC-<时间戳>` 的旧格式，
/// 校验时两种都接受。
pub fn generate_case_number() -> String {
    let millis = Utc::now().timestamp_millis();
    let random: String = Uuid::new_v4().simple().to_string()[..8].to_string();
    format!("CASE-{}-{}", millis, random)
}

/// 校验病例编号格式（新旧两种格式）
pub fn is_valid_case_number(value: &str) -> bool {
    if let Some(rest) = value.strip_prefix("CC-") {
        return !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit());
    }
    if let Some(rest) = value.strip_prefix("CASE-") {
        let mut parts = rest.splitn(2, '-');
        let ts = parts.next().unwrap_or("");
        let suffix = parts.next().unwrap_or("");
        return !ts.is_empty()
            && ts.chars().all(|c| c.is_ascii_digit())
            && !suffix.is_empty()
            && suffix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    }
    false
}

/// 生成上传文件的落盘文件名
///
/// 形如 `case-<毫秒时间戳>-<随机段><扩展名>`，扩展名取自原始文件名。
pub fn generate_upload_file_name(original_name: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let random: String = Uuid::new_v4().simple().to_string()[..8].to_string();
    let ext = std::path::Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("case-{}-{}{}", millis, random, ext)
}

/// 由体重(kg)与身高(cm)计算BMI，保留一位小数
///
/// 人口学字段沿用字符串录入，无法解析或不在合理区间时返回None。
pub fn calculate_bmi(weight_kg: &str, height_cm: &str) -> Option<f64> {
    let weight: f64 = weight_kg.trim().parse().ok()?;
    let height: f64 = height_cm.trim().parse().ok()?;
    if !(1.0..=500.0).contains(&weight) || !(30.0..=300.0).contains(&height) {
        return None;
    }
    let meters = height / 100.0;
    Some((weight / (meters * meters) * 10.0).round() / 10.0)
}

/// 主题取值校验
pub fn is_valid_theme(value: &str) -> bool {
    matches!(value, "light" | "dark")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_case_number() {
        let number = generate_case_number();
        assert!(is_valid_case_number(&number), "generated: {}", number);
    }

    #[test]
    fn test_generated_case_numbers_differ() {
        let a = generate_case_number();
        let b = generate_case_number();
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_valid_case_number() {
        assert!(is_valid_case_number("CC-1705312800000"));
        assert!(is_valid_case_number("CASE-1705312800000-a1b2c3d4"));
        assert!(!is_valid_case_number(""));
        assert!(!is_valid_case_number("CASE-1705312800000"));
        assert!(!is_valid_case_number("CC-"));
        assert!(!is_valid_case_number("CASE-abc-def!"));
        assert!(!is_valid_case_number("OP-12345"));
    }

    #[test]
    fn test_generate_upload_file_name() {
        let name = generate_upload_file_name("photo.JPG");
        assert!(name.starts_with("case-"));
        assert!(name.ends_with(".jpg"));

        let bare = generate_upload_file_name("noext");
        assert!(bare.starts_with("case-"));
        assert!(!bare.contains('.'));
    }

    #[test]
    fn test_calculate_bmi() {
        assert_eq!(calculate_bmi("60", "170"), Some(20.8));
        assert_eq!(calculate_bmi("80", "180"), Some(24.7));
        assert_eq!(calculate_bmi("abc", "170"), None);
        assert_eq!(calculate_bmi("60", "0"), None);
        assert_eq!(calculate_bmi("", ""), None);
    }

    #[test]
    fn test_is_valid_theme() {
        assert!(is_valid_theme("light"));
        assert!(is_valid_theme("dark"));
        assert!(!is_valid_theme("blue"));
        assert!(!is_valid_theme(""));
    }
}
