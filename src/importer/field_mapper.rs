// ==========================================
// 版权结算对账系统 - 字段映射器实现
// ==========================================
// 职责: 原始行 → UsageRecord（列映射 + 类型转换 + 必填校验 + 编码规范化）
// 红线: 任何失败都是行级错误，由管道计数后跳过
// ==========================================

use crate::domain::catalog::{normalize_isrc, normalize_iswc, normalize_optional_code};
use crate::domain::import::{ImportOptions, UsageField};
use crate::domain::money::{parse_decimal, to_whole};
use crate::domain::types::UsageType;
use crate::domain::usage::UsageRecord;
use crate::importer::column_mapping::ResolvedMapping;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::RawRow;
use rust_decimal::Decimal;

/// 金额/数量中允许出现的货币符号
const CURRENCY_SYMBOLS: [char; 6] = ['$', '€', '£', '¥', '₩', '₹'];

pub struct FieldMapper<'a> {
    mapping: &'a ResolvedMapping,
    options: &'a ImportOptions,
}

impl<'a> FieldMapper<'a> {
    pub fn new(mapping: &'a ResolvedMapping, options: &'a ImportOptions) -> Self {
        Self { mapping, options }
    }

    /// 映射一行
    ///
    /// # 返回
    /// - Ok(UsageRecord): 未落库的记录（usage_id = 0，批次号由管道填写）
    /// - Err(行级 ImportError)
    pub fn map_row(&self, row: &RawRow) -> ImportResult<UsageRecord> {
        let track_name = self.required(row, UsageField::TrackName)?;
        let artist_name = self.required(row, UsageField::ArtistName)?;

        let opts = self.options;
        let mut record = UsageRecord::reported(
            opts.source_type,
            opts.period_start,
            opts.period_end,
            track_name,
            artist_name,
        );
        record.source_reference = opts.source_reference.clone();
        record.currency = opts.currency.trim().to_uppercase();
        record.exchange_rate = opts.exchange_rate;

        // ===== 文本字段 =====
        record.album_name = self.get_string(row, UsageField::AlbumName);
        record.service_name = self.get_string(row, UsageField::ServiceName);
        record.territory_code = self
            .get_string(row, UsageField::TerritoryCode)
            .map(|t| t.to_uppercase());
        record.upc = self.get_string(row, UsageField::Upc);

        // ===== 标准编码 =====
        record.isrc = self.parse_code(row, UsageField::Isrc, normalize_isrc)?;
        record.iswc = self.parse_code(row, UsageField::Iswc, normalize_iswc)?;

        // ===== 使用类型 =====
        record.usage_type = match self.get_string(row, UsageField::UsageType) {
            None => opts.default_usage_type,
            Some(value) => UsageType::parse(&value).ok_or_else(|| ImportError::TypeConversionError {
                row: row.line,
                field: UsageField::UsageType.to_string(),
                message: format!("无法识别的使用类型: {}", value),
            })?,
        };

        // ===== 数量与金额（空单元格按 0） =====
        record.units = self.parse_units(row)?;
        record.gross_amount = self.parse_amount(row, UsageField::GrossAmount)?;
        record.fees = self.parse_amount(row, UsageField::Fees)?;

        record.validate().map_err(|message| ImportError::TypeConversionError {
            row: row.line,
            field: "record".to_string(),
            message,
        })?;
        Ok(record)
    }

    /// 取单元格（未映射返回 None；映射列超出行宽返回空串）
    fn cell<'r>(&self, row: &'r RawRow, field: UsageField) -> Option<&'r str> {
        self.mapping
            .index_of(field)
            .map(|idx| row.cells.get(idx).map(|c| c.trim()).unwrap_or(""))
    }

    fn get_string(&self, row: &RawRow, field: UsageField) -> Option<String> {
        self.cell(row, field)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn required(&self, row: &RawRow, field: UsageField) -> ImportResult<String> {
        if let Some(idx) = self.mapping.index_of(field) {
            if idx >= row.cells.len() {
                return Err(ImportError::ColumnOutOfRange {
                    row: row.line,
                    column: field.to_string(),
                });
            }
        }
        self.get_string(row, field)
            .ok_or_else(|| ImportError::RequiredFieldMissing {
                row: row.line,
                field: field.to_string(),
            })
    }

    fn parse_code(
        &self,
        row: &RawRow,
        field: UsageField,
        normalize: fn(&str) -> Result<String, String>,
    ) -> ImportResult<Option<String>> {
        normalize_optional_code(self.cell(row, field), normalize).map_err(|_| ImportError::InvalidCode {
            row: row.line,
            field: field.to_string(),
            value: self.cell(row, field).unwrap_or("").to_string(),
        })
    }

    fn parse_amount(&self, row: &RawRow, field: UsageField) -> ImportResult<Decimal> {
        match self.cell(row, field) {
            None => Ok(Decimal::ZERO),
            Some(raw) => parse_number(raw).ok_or_else(|| ImportError::TypeConversionError {
                row: row.line,
                field: field.to_string(),
                message: format!("无法解析为金额: {}", raw),
            }),
        }
    }

    fn parse_units(&self, row: &RawRow) -> ImportResult<i64> {
        let field = UsageField::Units;
        let raw = match self.cell(row, field) {
            None => return Ok(0),
            Some(raw) => raw,
        };
        match parse_number(raw).and_then(to_whole) {
            Some(value) => Ok(value),
            None => Err(ImportError::TypeConversionError {
                row: row.line,
                field: field.to_string(),
                message: format!("无法解析为整数数量: {}", raw),
            }),
        }
    }
}

/// 数值文本解析
///
/// 容忍千分位逗号、空白与首尾货币符号；空串视为 0
pub fn parse_number(raw: &str) -> Option<Decimal> {
    let trimmed = raw
        .trim()
        .trim_matches(|c: char| CURRENCY_SYMBOLS.contains(&c) || c.is_whitespace());
    if trimmed.is_empty() {
        return Some(Decimal::ZERO);
    }
    let cleaned: String = trimmed
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect();
    parse_decimal(&cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::import::UsageField;
    use crate::domain::types::SourceType;
    use crate::importer::column_mapping::{ColumnMapping, ColumnRef};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn options() -> ImportOptions {
        ImportOptions::new(
            SourceType::Distributor,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        )
    }

    fn header() -> Vec<String> {
        ["Track", "Artist", "ISRC", "Units", "Gross", "Fees", "Type", "Country"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn mapping() -> ResolvedMapping {
        ColumnMapping::suggest(&header())
            .with(UsageField::GrossAmount, ColumnRef::Name("Gross".into()))
            .validate_against(&header(), true)
            .unwrap()
    }

    fn row(cells: &[&str]) -> RawRow {
        RawRow { line: 7, cells: cells.iter().map(|s| s.to_string()).collect() }
    }

    #[test]
    fn test_map_full_row() {
        let mapping = mapping();
        let opts = options();
        let record = FieldMapper::new(&mapping, &opts)
            .map_row(&row(&["Blue Moon", "The Tides", "us-abc-12-34567", "1,200", "$100.00", "10", "downloads", "us"]))
            .unwrap();
        assert_eq!(record.track_name, "Blue Moon");
        assert_eq!(record.isrc.as_deref(), Some("USABC1234567"));
        assert_eq!(record.units, 1200);
        assert_eq!(record.gross_amount, dec!(100.00));
        assert_eq!(record.fees, dec!(10));
        assert_eq!(record.net_amount(), dec!(90));
        assert_eq!(record.usage_type, UsageType::Download);
        assert_eq!(record.territory_code.as_deref(), Some("US"));
        assert_eq!(record.period_end, opts.period_end);
    }

    #[test]
    fn test_empty_numeric_cells_default_to_zero() {
        let mapping = mapping();
        let opts = options();
        let record = FieldMapper::new(&mapping, &opts)
            .map_row(&row(&["Blue Moon", "The Tides", "", "", "", "", "", ""]))
            .unwrap();
        assert_eq!(record.units, 0);
        assert_eq!(record.gross_amount, Decimal::ZERO);
        assert_eq!(record.isrc, None);
        assert_eq!(record.usage_type, UsageType::Stream);
    }

    #[test]
    fn test_non_numeric_units_is_row_error() {
        let mapping = mapping();
        let opts = options();
        let err = FieldMapper::new(&mapping, &opts)
            .map_row(&row(&["Blue Moon", "The Tides", "", "abc", "1", "0", "", ""]))
            .unwrap_err();
        assert!(err.is_row_error());
        assert_eq!(err.row(), Some(7));
        assert!(matches!(err, ImportError::TypeConversionError { field, .. } if field == "units"));
    }

    #[test]
    fn test_missing_artist_is_row_error() {
        let mapping = mapping();
        let opts = options();
        let err = FieldMapper::new(&mapping, &opts)
            .map_row(&row(&["Blue Moon", "  ", "", "1", "1", "0", "", ""]))
            .unwrap_err();
        assert!(matches!(err, ImportError::RequiredFieldMissing { field, .. } if field == "artist_name"));
    }

    #[test]
    fn test_malformed_isrc_is_row_error() {
        let mapping = mapping();
        let opts = options();
        let err = FieldMapper::new(&mapping, &opts)
            .map_row(&row(&["Blue Moon", "The Tides", "XX1", "1", "1", "0", "", ""]))
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidCode { .. }));
    }

    #[test]
    fn test_short_row_for_required_column() {
        let mapping = mapping();
        let opts = options();
        let err = FieldMapper::new(&mapping, &opts).map_row(&row(&["Blue Moon"])).unwrap_err();
        assert!(matches!(err, ImportError::ColumnOutOfRange { .. }));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("1,234.50"), Some(dec!(1234.50)));
        assert_eq!(parse_number(" € 12 "), Some(dec!(12)));
        assert_eq!(parse_number("0.1"), Some(dec!(0.1)));
        assert_eq!(parse_number(""), Some(Decimal::ZERO));
        assert_eq!(parse_number("12abc"), None);
        assert_eq!(parse_number("NaN"), None);
    }
}
