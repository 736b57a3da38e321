// ==========================================
// 版权结算对账系统 - 领域类型定义
// ==========================================
// 职责: 枚举类型（来源/用途/匹配状态/回收桶/单据状态）
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// 外部输入的枚举文本规范化: 去空白、大写、`-`/空格 → `_`
fn normalize_enum_text(raw: &str) -> String {
    raw.trim()
        .to_uppercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect()
}

// ==========================================
// 报表来源类型 (Source Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Distributor, // 发行商
    Pro,         // 表演权组织
    Publisher,   // 词曲版权方
    Platform,    // 平台直连
    Sync,        // 同步授权
    Other,       // 其他
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Distributor => "DISTRIBUTOR",
            SourceType::Pro => "PRO",
            SourceType::Publisher => "PUBLISHER",
            SourceType::Platform => "PLATFORM",
            SourceType::Sync => "SYNC",
            SourceType::Other => "OTHER",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_enum_text(raw).as_str() {
            "DISTRIBUTOR" => Some(SourceType::Distributor),
            "PRO" => Some(SourceType::Pro),
            "PUBLISHER" => Some(SourceType::Publisher),
            "PLATFORM" => Some(SourceType::Platform),
            "SYNC" => Some(SourceType::Sync),
            "OTHER" => Some(SourceType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 使用类型 (Usage Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageType {
    Stream,      // 流媒体
    Download,    // 下载
    Physical,    // 实体销售
    Sync,        // 同步
    Performance, // 公开表演
    Mechanical,  // 机械复制
}

impl UsageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageType::Stream => "STREAM",
            UsageType::Download => "DOWNLOAD",
            UsageType::Physical => "PHYSICAL",
            UsageType::Sync => "SYNC",
            UsageType::Performance => "PERFORMANCE",
            UsageType::Mechanical => "MECHANICAL",
        }
    }

    /// 解析使用类型（兼容报表里常见的复数/别名写法）
    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_enum_text(raw).as_str() {
            "STREAM" | "STREAMS" | "STREAMING" => Some(UsageType::Stream),
            "DOWNLOAD" | "DOWNLOADS" => Some(UsageType::Download),
            "PHYSICAL" => Some(UsageType::Physical),
            "SYNC" | "SYNCHRONIZATION" => Some(UsageType::Sync),
            "PERFORMANCE" => Some(UsageType::Performance),
            "MECHANICAL" => Some(UsageType::Mechanical),
            _ => None,
        }
    }
}

impl fmt::Display for UsageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 匹配状态 (Match State)
// ==========================================
// LOCKED 为人工终态: 自动匹配永不覆盖，只能显式解锁
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    Unmatched,       // 未匹配
    AutoMatched,     // 自动匹配
    ManuallyMatched, // 人工匹配
    Locked,          // 人工锁定
}

impl MatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchState::Unmatched => "UNMATCHED",
            MatchState::AutoMatched => "AUTO_MATCHED",
            MatchState::ManuallyMatched => "MANUALLY_MATCHED",
            MatchState::Locked => "LOCKED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_enum_text(raw).as_str() {
            "UNMATCHED" => Some(MatchState::Unmatched),
            "AUTO_MATCHED" => Some(MatchState::AutoMatched),
            "MANUALLY_MATCHED" => Some(MatchState::ManuallyMatched),
            "LOCKED" => Some(MatchState::Locked),
            _ => None,
        }
    }
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 回收桶 (Recoupment Bucket)
// ==========================================
// 声明顺序即交叉抵扣的遍历顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bucket {
    Recording,   // 录音
    Video,       // 视频
    TourSupport, // 巡演支持
    Marketing,   // 市场推广
    Other,       // 其他
}

impl Bucket {
    pub const ALL: [Bucket; 5] = [
        Bucket::Recording,
        Bucket::Video,
        Bucket::TourSupport,
        Bucket::Marketing,
        Bucket::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Recording => "RECORDING",
            Bucket::Video => "VIDEO",
            Bucket::TourSupport => "TOUR_SUPPORT",
            Bucket::Marketing => "MARKETING",
            Bucket::Other => "OTHER",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_enum_text(raw).as_str() {
            "RECORDING" => Some(Bucket::Recording),
            "VIDEO" => Some(Bucket::Video),
            "TOUR_SUPPORT" => Some(Bucket::TourSupport),
            "MARKETING" => Some(Bucket::Marketing),
            "OTHER" => Some(Bucket::Other),
            _ => None,
        }
    }
}

impl Default for Bucket {
    fn default() -> Self {
        Bucket::Recording
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 结算单状态 (Statement State)
// ==========================================
// 状态流: DRAFT → PROCESSING → SENT → APPROVED → PAID
// CANCELLED 可由任意非 PAID 状态进入；RESET 回 DRAFT 为唯一逆向操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementState {
    Draft,
    Processing,
    Sent,
    Approved,
    Paid,
    Cancelled,
}

impl StatementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementState::Draft => "DRAFT",
            StatementState::Processing => "PROCESSING",
            StatementState::Sent => "SENT",
            StatementState::Approved => "APPROVED",
            StatementState::Paid => "PAID",
            StatementState::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_enum_text(raw).as_str() {
            "DRAFT" => Some(StatementState::Draft),
            "PROCESSING" => Some(StatementState::Processing),
            "SENT" => Some(StatementState::Sent),
            "APPROVED" => Some(StatementState::Approved),
            "PAID" => Some(StatementState::Paid),
            "CANCELLED" => Some(StatementState::Cancelled),
            _ => None,
        }
    }

    /// 该状态下挂载的使用明细是否视为已处理
    pub fn marks_usage_processed(&self) -> bool {
        matches!(
            self,
            StatementState::Processing
                | StatementState::Sent
                | StatementState::Approved
                | StatementState::Paid
        )
    }

    /// 是否允许挂载/移除使用明细
    pub fn accepts_usage_changes(&self) -> bool {
        matches!(self, StatementState::Draft | StatementState::Processing)
    }

    /// 是否参与自动付清/回退判定
    pub fn tracks_payment(&self) -> bool {
        !matches!(self, StatementState::Draft | StatementState::Cancelled)
    }
}

impl fmt::Display for StatementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 付款状态 (Payment State)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Draft,
    Posted,
    Reconciled,
    Cancelled,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Draft => "DRAFT",
            PaymentState::Posted => "POSTED",
            PaymentState::Reconciled => "RECONCILED",
            PaymentState::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_enum_text(raw).as_str() {
            "DRAFT" => Some(PaymentState::Draft),
            "POSTED" => Some(PaymentState::Posted),
            "RECONCILED" => Some(PaymentState::Reconciled),
            "CANCELLED" => Some(PaymentState::Cancelled),
            _ => None,
        }
    }

    /// 分配金额是否计入结算单已付金额
    pub fn counts_as_paid(&self) -> bool {
        matches!(self, PaymentState::Posted | PaymentState::Reconciled)
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 付款方式 (Payment Method)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Ach,
    Wire,
    Check,
    Paypal,
    Manual,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Ach => "ACH",
            PaymentMethod::Wire => "WIRE",
            PaymentMethod::Check => "CHECK",
            PaymentMethod::Paypal => "PAYPAL",
            PaymentMethod::Manual => "MANUAL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_enum_text(raw).as_str() {
            "ACH" => Some(PaymentMethod::Ach),
            "WIRE" => Some(PaymentMethod::Wire),
            "CHECK" => Some(PaymentMethod::Check),
            "PAYPAL" => Some(PaymentMethod::Paypal),
            "MANUAL" => Some(PaymentMethod::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 合约状态 (Deal Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealStatus {
    Draft,
    Signed,
    Active,
    Expired,
    Terminated,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Draft => "DRAFT",
            DealStatus::Signed => "SIGNED",
            DealStatus::Active => "ACTIVE",
            DealStatus::Expired => "EXPIRED",
            DealStatus::Terminated => "TERMINATED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match normalize_enum_text(raw).as_str() {
            "DRAFT" => Some(DealStatus::Draft),
            "SIGNED" => Some(DealStatus::Signed),
            "ACTIVE" => Some(DealStatus::Active),
            "EXPIRED" => Some(DealStatus::Expired),
            "TERMINATED" => Some(DealStatus::Terminated),
            _ => None,
        }
    }

    /// 生效中的合约（可参与交叉抵扣）
    pub fn is_in_force(&self) -> bool {
        matches!(self, DealStatus::Signed | DealStatus::Active)
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_parse_is_lenient() {
        assert_eq!(UsageType::parse("streams"), Some(UsageType::Stream));
        assert_eq!(Bucket::parse("tour-support"), Some(Bucket::TourSupport));
        assert_eq!(MatchState::parse(" auto matched "), Some(MatchState::AutoMatched));
        assert_eq!(SourceType::parse("label"), None);
    }

    #[test]
    fn test_bucket_order_is_declaration_order() {
        let mut shuffled = vec![Bucket::Other, Bucket::Recording, Bucket::Marketing, Bucket::Video];
        shuffled.sort();
        assert_eq!(
            shuffled,
            vec![Bucket::Recording, Bucket::Video, Bucket::Marketing, Bucket::Other]
        );
    }

    #[test]
    fn test_statement_state_flags() {
        assert!(StatementState::Processing.marks_usage_processed());
        assert!(!StatementState::Cancelled.marks_usage_processed());
        assert!(StatementState::Draft.accepts_usage_changes());
        assert!(!StatementState::Sent.accepts_usage_changes());
        assert!(!StatementState::Draft.tracks_payment());
    }

    #[test]
    fn test_serde_matches_db_format() {
        let json = serde_json::to_string(&MatchState::ManuallyMatched).unwrap();
        assert_eq!(json, "\"MANUALLY_MATCHED\"");
        assert_eq!(MatchState::ManuallyMatched.as_str(), "MANUALLY_MATCHED");
    }
}
