// ==========================================
// 版权结算对账系统 - 列映射
// ==========================================
// 职责: 记录字段 → 源列（表头文件按列名，无表头文件按 0 起列号）
// 红线: 必填字段（曲目/艺人）未映射 → 配置阶段直接拒绝，不处理任何行
// ==========================================

use crate::domain::import::UsageField;
use crate::importer::error::{ImportError, ImportResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 源列引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRef {
    Name(String),
    Index(usize),
}

/// 字段 → 源列 映射
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    columns: BTreeMap<UsageField, ColumnRef>,
}

/// 按表头解析后的映射（字段 → 列下标）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMapping {
    indices: BTreeMap<UsageField, usize>,
}

impl ResolvedMapping {
    pub fn index_of(&self, field: UsageField) -> Option<usize> {
        self.indices.get(&field).copied()
    }

    pub fn fields(&self) -> impl Iterator<Item = (UsageField, usize)> + '_ {
        self.indices.iter().map(|(f, i)| (*f, *i))
    }
}

/// 各字段的表头关键字（小写）
fn keywords(field: UsageField) -> &'static [&'static str] {
    match field {
        UsageField::TrackName => &["track", "song", "title", "track name", "song name", "track title"],
        UsageField::ArtistName => &["artist", "performer", "artist name", "main artist"],
        UsageField::AlbumName => &["album", "release", "album name", "release title"],
        UsageField::Isrc => &["isrc", "recording code"],
        UsageField::Iswc => &["iswc", "work code"],
        UsageField::Upc => &["upc", "ean", "catalog number", "release code"],
        UsageField::UsageType => &["usage", "usage type", "type", "revenue type"],
        UsageField::ServiceName => &["service", "platform", "dsp", "store"],
        UsageField::TerritoryCode => &["territory", "country", "region", "territory code"],
        UsageField::Units => &["units", "streams", "plays", "quantity"],
        UsageField::GrossAmount => &["amount", "gross", "revenue", "earnings", "total"],
        UsageField::Fees => &["fees", "commission", "deduction", "withholding"],
    }
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式设置
    pub fn with(mut self, field: UsageField, column: ColumnRef) -> Self {
        self.set(field, column);
        self
    }

    pub fn set(&mut self, field: UsageField, column: ColumnRef) {
        self.columns.insert(field, column);
    }

    pub fn get(&self, field: UsageField) -> Option<&ColumnRef> {
        self.columns.get(&field)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// 按表头校验并解析为列下标
    ///
    /// # 参数
    /// - header: 预览得到的表头（无表头文件为生成的 "Column N"）
    /// - has_header: 文件是否带表头
    ///
    /// # 返回
    /// - Err(MappingError): 必填字段未映射 / 列名不存在 / 列号越界 / 表头文件使用列号
    pub fn validate_against(&self, header: &[String], has_header: bool) -> ImportResult<ResolvedMapping> {
        let missing: Vec<&str> = UsageField::REQUIRED
            .iter()
            .filter(|f| !self.columns.contains_key(f))
            .map(|f| f.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(ImportError::MappingError(format!(
                "必填字段未映射: {}",
                missing.join(", ")
            )));
        }

        let mut indices = BTreeMap::new();
        for (field, column) in &self.columns {
            let idx = match column {
                ColumnRef::Name(name) => {
                    let wanted = name.trim();
                    header
                        .iter()
                        .position(|h| h.trim().eq_ignore_ascii_case(wanted))
                        .ok_or_else(|| {
                            ImportError::MappingError(format!("字段 {} 映射的列 '{}' 不在表头中", field, wanted))
                        })?
                }
                ColumnRef::Index(idx) => {
                    if has_header {
                        return Err(ImportError::MappingError(format!(
                            "带表头的文件应按列名映射 (字段 {})",
                            field
                        )));
                    }
                    if *idx >= header.len() {
                        return Err(ImportError::MappingError(format!(
                            "字段 {} 映射的列号 {} 超出列数 {}",
                            field,
                            idx,
                            header.len()
                        )));
                    }
                    *idx
                }
            };
            indices.insert(*field, idx);
        }

        Ok(ResolvedMapping { indices })
    }

    /// 根据表头关键字推荐映射
    ///
    /// 先做精确匹配，再做包含匹配；每列最多分配给一个字段
    pub fn suggest(header: &[String]) -> Self {
        let lowered: Vec<String> = header.iter().map(|h| h.trim().to_lowercase()).collect();
        let mut taken = vec![false; header.len()];
        let mut mapping = Self::new();

        let passes: [fn(&str, &str) -> bool; 2] = [
            |col, kw| col == kw,
            |col, kw| col.contains(kw) || kw.contains(col),
        ];
        for pass in passes {
            for field in UsageField::ALL {
                if mapping.columns.contains_key(&field) {
                    continue;
                }
                let hit = lowered.iter().enumerate().find(|(i, col)| {
                    !taken[*i] && !col.is_empty() && keywords(field).iter().any(|kw| pass(col, kw))
                });
                if let Some((i, _)) = hit {
                    taken[i] = true;
                    mapping.set(field, ColumnRef::Name(header[i].trim().to_string()));
                }
            }
        }
        mapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let mapping = ColumnMapping::new().with(UsageField::TrackName, ColumnRef::Name("Track".into()));
        let err = mapping.validate_against(&header(&["Track", "Artist"]), true).unwrap_err();
        assert!(matches!(err, ImportError::MappingError(msg) if msg.contains("artist_name")));
    }

    #[test]
    fn test_unknown_column_name_is_rejected() {
        let mapping = ColumnMapping::new()
            .with(UsageField::TrackName, ColumnRef::Name("Track".into()))
            .with(UsageField::ArtistName, ColumnRef::Name("Performer".into()));
        assert!(mapping.validate_against(&header(&["Track", "Artist"]), true).is_err());
    }

    #[test]
    fn test_resolve_by_name_case_insensitive() {
        let mapping = ColumnMapping::new()
            .with(UsageField::TrackName, ColumnRef::Name("track".into()))
            .with(UsageField::ArtistName, ColumnRef::Name("ARTIST".into()));
        let resolved = mapping.validate_against(&header(&["Artist", "Track"]), true).unwrap();
        assert_eq!(resolved.index_of(UsageField::TrackName), Some(1));
        assert_eq!(resolved.index_of(UsageField::ArtistName), Some(0));
        assert_eq!(resolved.index_of(UsageField::Units), None);
    }

    #[test]
    fn test_resolve_by_index_for_headerless_file() {
        let mapping = ColumnMapping::new()
            .with(UsageField::TrackName, ColumnRef::Index(0))
            .with(UsageField::ArtistName, ColumnRef::Index(1));
        let generated = header(&["Column 1", "Column 2"]);
        assert!(mapping.validate_against(&generated, false).is_ok());
        assert!(mapping.validate_against(&generated, true).is_err());

        let out_of_range = mapping.with(UsageField::Units, ColumnRef::Index(5));
        assert!(out_of_range.validate_against(&generated, false).is_err());
    }

    #[test]
    fn test_suggest_from_typical_header() {
        let mapping = ColumnMapping::suggest(&header(&[
            "Song Title",
            "Main Artist",
            "ISRC",
            "Country",
            "Streams",
            "Revenue",
            "Commission",
        ]));
        assert_eq!(mapping.get(UsageField::TrackName), Some(&ColumnRef::Name("Song Title".into())));
        assert_eq!(mapping.get(UsageField::ArtistName), Some(&ColumnRef::Name("Main Artist".into())));
        assert_eq!(mapping.get(UsageField::Isrc), Some(&ColumnRef::Name("ISRC".into())));
        assert_eq!(mapping.get(UsageField::TerritoryCode), Some(&ColumnRef::Name("Country".into())));
        assert_eq!(mapping.get(UsageField::Units), Some(&ColumnRef::Name("Streams".into())));
        assert_eq!(mapping.get(UsageField::GrossAmount), Some(&ColumnRef::Name("Revenue".into())));
        assert_eq!(mapping.get(UsageField::Fees), Some(&ColumnRef::Name("Commission".into())));
        assert_eq!(mapping.get(UsageField::Iswc), None);
    }

    #[test]
    fn test_suggest_prefers_exact_match_and_never_reuses_columns() {
        let mapping = ColumnMapping::suggest(&header(&["Revenue Type", "Track", "Artist", "Net Revenue"]));
        assert_eq!(mapping.get(UsageField::UsageType), Some(&ColumnRef::Name("Revenue Type".into())));
        assert_eq!(mapping.get(UsageField::GrossAmount), Some(&ColumnRef::Name("Net Revenue".into())));
        // 每列最多分给一个字段
        let used: Vec<&ColumnRef> = UsageField::ALL.iter().filter_map(|f| mapping.get(*f)).collect();
        let distinct: std::collections::HashSet<&ColumnRef> = used.iter().copied().collect();
        assert_eq!(distinct.len(), used.len());
    }
}
