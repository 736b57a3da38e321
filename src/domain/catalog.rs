// ==========================================
// 版权结算对账系统 - 曲库实体
// ==========================================
// 职责: 录音(Recording)/作品(Work) 只读视图 + ISRC/ISWC 规范化
// 说明: 曲库由外部协作方维护，实体 ID 稳定且删除后不复用
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// Recording - 录音制品
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub recording_id: i64,
    pub title: String,
    pub isrc: Option<String>,   // 规范形式（无连字符、大写）
    pub work_id: Option<i64>,   // 所属作品
    pub artists: Vec<String>,   // 主艺人（按声明顺序）
}

// ==========================================
// Work - 音乐作品（词曲）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Work {
    pub work_id: i64,
    pub title: String,
    pub iswc: Option<String>, // 规范形式（T + 数字，无连字符）
}

// ==========================================
// 匹配目标实体引用
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CatalogEntity {
    Recording(i64),
    Work(i64),
}

/// 规范化 ISRC: 去除 `-` 与空白并大写，校验 `^[A-Z]{2}[A-Z0-9]{3}[0-9]{7}$`
///
/// # 返回
/// - Ok(String): 12 位规范 ISRC
/// - Err(String): 格式错误说明
pub fn normalize_isrc(raw: &str) -> Result<String, String> {
    let code: String = raw
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    let bytes = code.as_bytes();
    let valid = bytes.len() == 12
        && bytes[..2].iter().all(|b| b.is_ascii_uppercase())
        && bytes[2..5].iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        && bytes[5..].iter().all(|b| b.is_ascii_digit());

    if valid {
        Ok(code)
    } else {
        Err(format!("ISRC 格式错误: {}（应为 CC-XXX-YY-NNNNN）", raw.trim()))
    }
}

/// 规范化 ISWC: `T` + 9~10 位数字 + 可选校验位，连字符/句点/空白可选
pub fn normalize_iswc(raw: &str) -> Result<String, String> {
    let code: String = raw
        .chars()
        .filter(|c| *c != '-' && *c != '.' && !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    let digits = code.strip_prefix('T').unwrap_or("");
    let valid = code.starts_with('T')
        && (9..=11).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit());

    if valid {
        Ok(code)
    } else {
        Err(format!("ISWC 格式错误: {}（应为 T-123456789-0）", raw.trim()))
    }
}

/// 可选编码的规范化（空串视为缺省）
pub fn normalize_optional_code(
    raw: Option<&str>,
    normalize: fn(&str) -> Result<String, String>,
) -> Result<Option<String>, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(code) => normalize(code).map(Some),
    }
}
