// ==========================================
// 版权结算对账系统 - 导入层
// ==========================================
// 职责: 外部使用报表导入，生成 UsageRecord
// 支持: CSV / TSV / TXT / Excel
// ==========================================

// 模块声明
pub mod column_mapping;
pub mod error;
pub mod field_mapper;
pub mod file_parser;
pub mod session;
pub mod usage_importer;
pub mod usage_importer_trait;

// 重导出核心类型
pub use column_mapping::{ColumnMapping, ColumnRef, ResolvedMapping};
pub use error::{ImportError, ImportResult};
pub use field_mapper::{parse_number, FieldMapper};
pub use file_parser::{decode_text, CsvParser, ExcelParser, FileParser, ParsedTable, RawRow, UniversalFileParser};
pub use session::{ImportCancelHandle, ImportSession};
pub use usage_importer::UsageImporterImpl;

// 重导出 Trait 接口
pub use usage_importer_trait::{ImportRequest, UsageImporter};
