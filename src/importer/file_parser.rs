// ==========================================
// 版权结算对账系统 - 文件解析器实现
// ==========================================
// 支持: CSV/TSV/TXT（声明的分隔符/编码/表头标志）
//       Excel (.xlsx/.xls，第一个工作表)
// 红线: 编码无法解码、扩展名不支持 → 致命错误，任何行处理之前抛出
// 预览: 只保留表头 + 前 N 行，其余行只计数
// ==========================================

use crate::domain::import::{FilePreview, FileFormat, TextEncoding, UploadedFile};
use crate::importer::error::{ImportError, ImportResult};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use csv::{ReaderBuilder, StringRecord};
use std::borrow::Cow;
use std::io::Cursor;

// ==========================================
// 解析结果
// ==========================================

/// 一行原始数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub line: usize, // 文件中的行号（从 1 开始，含表头）
    pub cells: Vec<String>,
}

/// 解析后的表格
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTable {
    pub columns: Vec<String>, // 表头；无表头时为 "Column N"
    pub rows: Vec<RawRow>,
}

impl ParsedTable {
    /// 由全部记录构造（首行按需作为表头）
    fn from_records(mut records: Vec<RawRow>, has_header: bool) -> ImportResult<Self> {
        if records.is_empty() {
            return Err(ImportError::EmptyFile);
        }
        let width = max_width(&records);
        let columns = take_columns(&mut records, has_header, width);
        Ok(Self { columns, rows: records })
    }
}

/// 有界读取的结果: 前几行 + 其余行的行数与最大列数
struct PreviewScan {
    head: Vec<RawRow>,
    rest_rows: usize,
    rest_width: usize,
}

impl PreviewScan {
    /// 表头之外再保留 rows 行
    fn capacity(rows: usize, has_header: bool) -> usize {
        rows + usize::from(has_header)
    }

    fn into_preview(mut self, has_header: bool) -> ImportResult<FilePreview> {
        if self.head.is_empty() {
            return Err(ImportError::EmptyFile);
        }
        let width = max_width(&self.head).max(self.rest_width);
        let columns = take_columns(&mut self.head, has_header, width);
        Ok(FilePreview {
            columns,
            total_rows: self.head.len() + self.rest_rows,
            sample_rows: self.head.into_iter().map(|r| r.cells).collect(),
        })
    }
}

fn max_width(records: &[RawRow]) -> usize {
    records.iter().map(|r| r.cells.len()).max().unwrap_or(0)
}

/// 取出表头；无表头时按列数生成 "Column N"
fn take_columns(records: &mut Vec<RawRow>, has_header: bool, width: usize) -> Vec<String> {
    if has_header && !records.is_empty() {
        records
            .remove(0)
            .cells
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect()
    } else {
        (1..=width).map(|n| format!("Column {}", n)).collect()
    }
}

fn is_blank(cells: &[String]) -> bool {
    cells.iter().all(|c| c.trim().is_empty())
}

// ==========================================
// 文本解码
// ==========================================

/// Windows-1252 在 0x80..=0x9F 区间的字符（None 为未定义码位）
const CP1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), None, Some('\u{201A}'), Some('\u{0192}'),
    Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
    Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
    Some('\u{0152}'), None, Some('\u{017D}'), None,
    None, Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
    Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
    Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
    Some('\u{0153}'), None, Some('\u{017E}'), Some('\u{0178}'),
];

/// 按声明编码解码（UTF-8 不复制）
pub fn decode_text(bytes: &[u8], encoding: TextEncoding) -> ImportResult<Cow<'_, str>> {
    match encoding {
        TextEncoding::Utf8 => {
            let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
            std::str::from_utf8(bytes)
                .map(Cow::Borrowed)
                .map_err(|e| ImportError::EncodingError {
                    encoding: encoding.to_string(),
                    message: format!("第 {} 字节处不是合法 UTF-8", e.valid_up_to()),
                })
        }
        TextEncoding::Latin1 => Ok(Cow::Owned(bytes.iter().map(|b| *b as char).collect())),
        TextEncoding::Windows1252 => bytes
            .iter()
            .enumerate()
            .map(|(pos, b)| match b {
                0x80..=0x9F => CP1252_HIGH[(*b - 0x80) as usize].ok_or_else(|| ImportError::EncodingError {
                    encoding: encoding.to_string(),
                    message: format!("第 {} 字节 0x{:02X} 为未定义码位", pos, b),
                }),
                _ => Ok(*b as char),
            })
            .collect::<ImportResult<String>>()
            .map(Cow::Owned),
    }
}

// ==========================================
// FileParser Trait
// ==========================================
pub trait FileParser: Send + Sync {
    /// 解析上传文件为表格
    fn parse(&self, file: &UploadedFile, format: &FileFormat) -> ImportResult<ParsedTable>;

    /// 表头 + 前 rows 行 + 总行数（其余行不保留）
    fn preview(&self, file: &UploadedFile, format: &FileFormat, rows: usize) -> ImportResult<FilePreview>;
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvParser;

/// 复用同一缓冲区逐条读取，跳过完全空白的行
struct CsvRows<'a> {
    reader: csv::Reader<&'a [u8]>,
    record: StringRecord,
    read: usize,
}

impl<'a> CsvRows<'a> {
    fn new(text: &'a str, format: &FileFormat) -> Self {
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .delimiter(format.delimiter)
            .flexible(true) // 允许行长度不一致
            .from_reader(text.as_bytes());
        Self {
            reader,
            record: StringRecord::new(),
            read: 0,
        }
    }

    /// 前进到下一条非空白记录
    fn advance(&mut self) -> ImportResult<bool> {
        while self.reader.read_record(&mut self.record)? {
            self.read += 1;
            if !self.record.iter().all(|c| c.trim().is_empty()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn current(&self) -> RawRow {
        let line = self
            .record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(self.read);
        RawRow {
            line,
            cells: self.record.iter().map(|v| v.trim().to_string()).collect(),
        }
    }
}

impl FileParser for CsvParser {
    fn parse(&self, file: &UploadedFile, format: &FileFormat) -> ImportResult<ParsedTable> {
        format.validate().map_err(ImportError::InvalidOptions)?;
        let text = decode_text(&file.bytes, format.encoding)?;
        let mut rows = CsvRows::new(&text, format);

        let mut records = Vec::new();
        while rows.advance()? {
            records.push(rows.current());
        }

        ParsedTable::from_records(records, format.has_header)
    }

    fn preview(&self, file: &UploadedFile, format: &FileFormat, rows: usize) -> ImportResult<FilePreview> {
        format.validate().map_err(ImportError::InvalidOptions)?;
        let text = decode_text(&file.bytes, format.encoding)?;
        let mut reader = CsvRows::new(&text, format);

        let capacity = PreviewScan::capacity(rows, format.has_header);
        let mut scan = PreviewScan {
            head: Vec::with_capacity(capacity),
            rest_rows: 0,
            rest_width: 0,
        };
        while scan.head.len() < capacity && reader.advance()? {
            scan.head.push(reader.current());
        }
        while reader.advance()? {
            scan.rest_rows += 1;
            scan.rest_width = scan.rest_width.max(reader.record.len());
        }

        scan.into_preview(format.has_header)
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
pub struct ExcelParser;

impl ExcelParser {
    /// 第一个工作表
    fn first_sheet(file: &UploadedFile) -> ImportResult<calamine::Range<Data>> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(file.bytes.as_slice()))?;
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无工作表".to_string()))?;
        Ok(workbook.worksheet_range(&sheet_name)?)
    }

    fn to_row(idx: usize, row: &[Data]) -> Option<RawRow> {
        let cells: Vec<String> = row.iter().map(|cell| cell.to_string().trim().to_string()).collect();
        if is_blank(&cells) {
            return None;
        }
        Some(RawRow { line: idx + 1, cells })
    }

    fn is_blank_row(row: &[Data]) -> bool {
        row.iter().all(|cell| match cell {
            Data::Empty => true,
            Data::String(s) => s.trim().is_empty(),
            _ => false,
        })
    }
}

impl FileParser for ExcelParser {
    fn parse(&self, file: &UploadedFile, format: &FileFormat) -> ImportResult<ParsedTable> {
        let range = Self::first_sheet(file)?;
        let records = range
            .rows()
            .enumerate()
            .filter_map(|(idx, row)| Self::to_row(idx, row))
            .collect();
        ParsedTable::from_records(records, format.has_header)
    }

    fn preview(&self, file: &UploadedFile, format: &FileFormat, rows: usize) -> ImportResult<FilePreview> {
        let range = Self::first_sheet(file)?;
        let capacity = PreviewScan::capacity(rows, format.has_header);
        let mut scan = PreviewScan {
            head: Vec::with_capacity(capacity),
            rest_rows: 0,
            rest_width: 0,
        };
        for (idx, row) in range.rows().enumerate() {
            if scan.head.len() < capacity {
                scan.head.extend(Self::to_row(idx, row));
            } else if !Self::is_blank_row(row) {
                scan.rest_rows += 1;
                scan.rest_width = scan.rest_width.max(row.len());
            }
        }
        scan.into_preview(format.has_header)
    }
}

// ==========================================
// 通用文件解析器（根据扩展名自动选择）
// ==========================================
pub struct UniversalFileParser;

impl UniversalFileParser {
    /// 按扩展名选择解析器（TSV 固定制表符分隔）
    fn select(file: &UploadedFile, format: &FileFormat) -> ImportResult<(&'static dyn FileParser, FileFormat)> {
        let ext = file.extension().unwrap_or_default();
        let parser: &'static dyn FileParser = match ext.as_str() {
            "csv" | "txt" | "tsv" => &CsvParser,
            "xlsx" | "xls" | "xlsm" => &ExcelParser,
            _ => {
                return Err(ImportError::UnsupportedFormat(if ext.is_empty() {
                    file.file_name.clone()
                } else {
                    ext
                }))
            }
        };
        let format = if ext == "tsv" {
            FileFormat { delimiter: b'\t', ..*format }
        } else {
            *format
        };
        Ok((parser, format))
    }

    pub fn parse(&self, file: &UploadedFile, format: &FileFormat) -> ImportResult<ParsedTable> {
        let (parser, format) = Self::select(file, format)?;
        parser.parse(file, &format)
    }

    /// 有界预览（不触碰持久化存储）
    pub fn preview(&self, file: &UploadedFile, format: &FileFormat, rows: usize) -> ImportResult<FilePreview> {
        let (parser, format) = Self::select(file, format)?;
        parser.preview(file, &format, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv(body: &str) -> UploadedFile {
        UploadedFile::new("report.csv", body.as_bytes().to_vec())
    }

    #[test]
    fn test_csv_with_header() {
        let table = UniversalFileParser
            .parse(&csv("Track,Artist,Units\nBlue Moon,The Tides,1200\nHarbour,Ana,5\n"), &FileFormat::default())
            .unwrap();
        assert_eq!(table.columns, vec!["Track", "Artist", "Units"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].cells[2], "1200");
        assert_eq!(table.rows[0].line, 2);
    }

    #[test]
    fn test_csv_without_header_generates_column_names() {
        let format = FileFormat { delimiter: b';', has_header: false, ..FileFormat::default() };
        let table = UniversalFileParser.parse(&csv("Blue Moon;The Tides\nHarbour;Ana;extra\n"), &format).unwrap();
        assert_eq!(table.columns, vec!["Column 1", "Column 2", "Column 3"]);
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn test_csv_skips_blank_rows() {
        let table = UniversalFileParser
            .parse(&csv("Track,Artist\nA,B\n,\nC,D\n"), &FileFormat::default())
            .unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].line, 4);
    }

    #[test]
    fn test_preview_is_bounded() {
        let body: String = std::iter::once("Track,Artist\n".to_string())
            .chain((0..20).map(|i| format!("T{},A{}\n", i, i)))
            .collect();
        let preview = UniversalFileParser.preview(&csv(&body), &FileFormat::default(), 5).unwrap();
        assert_eq!(preview.columns, vec!["Track", "Artist"]);
        assert_eq!(preview.sample_rows.len(), 5);
        assert_eq!(preview.sample_rows[4], vec!["T4", "A4"]);
        assert_eq!(preview.total_rows, 20);
    }

    #[test]
    fn test_preview_counts_rows_past_the_sample() {
        // 第 3 行之后含空白行与更宽的行
        let format = FileFormat { has_header: false, ..FileFormat::default() };
        let preview = UniversalFileParser
            .preview(&csv("A,B\nC,D\n\n,\nE,F,G\nH,I\n"), &format, 2)
            .unwrap();
        assert_eq!(preview.sample_rows, vec![vec!["A", "B"], vec!["C", "D"]]);
        assert_eq!(preview.total_rows, 4);
        assert_eq!(preview.columns, vec!["Column 1", "Column 2", "Column 3"]);

        // 与完整解析一致
        let table = UniversalFileParser.parse(&csv("A,B\nC,D\n\n,\nE,F,G\nH,I\n"), &format).unwrap();
        assert_eq!(table.rows.len(), preview.total_rows);
        assert_eq!(table.columns, preview.columns);
    }

    #[test]
    fn test_preview_of_header_only_file() {
        let preview = UniversalFileParser.preview(&csv("Track,Artist\n"), &FileFormat::default(), 5).unwrap();
        assert_eq!(preview.columns, vec!["Track", "Artist"]);
        assert!(preview.sample_rows.is_empty());
        assert_eq!(preview.total_rows, 0);
        assert!(matches!(
            UniversalFileParser.preview(&csv(""), &FileFormat::default(), 5),
            Err(ImportError::EmptyFile)
        ));
    }

    #[test]
    fn test_invalid_utf8_is_fatal() {
        let file = UploadedFile::new("report.csv", vec![b'A', b',', 0xFF, b'\n']);
        let err = UniversalFileParser.parse(&file, &FileFormat::default()).unwrap_err();
        assert!(matches!(err, ImportError::EncodingError { .. }));
        assert!(!err.is_row_error());
    }

    #[test]
    fn test_latin1_and_cp1252_decoding() {
        assert_eq!(decode_text(&[0x42, 0x65, 0x79, 0x6F, 0x6E, 0x63, 0xE9], TextEncoding::Latin1).unwrap(), "Beyoncé");
        assert_eq!(decode_text(&[0x80, 0x31], TextEncoding::Windows1252).unwrap(), "€1");
        assert!(decode_text(&[0x81], TextEncoding::Windows1252).is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        let file = UploadedFile::new("report.pdf", b"%PDF".to_vec());
        assert!(matches!(
            UniversalFileParser.parse(&file, &FileFormat::default()),
            Err(ImportError::UnsupportedFormat(ext)) if ext == "pdf"
        ));
    }

    #[test]
    fn test_empty_file() {
        assert!(matches!(
            UniversalFileParser.parse(&csv(""), &FileFormat::default()),
            Err(ImportError::EmptyFile)
        ));
    }
}
