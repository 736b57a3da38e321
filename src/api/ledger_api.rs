// ==========================================
// 版权结算对账系统 - 回收台账 API
// ==========================================
// 职责: 合约/预付款协作方入口（过账 / 预付款 / 余额 / 交叉抵扣）
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::validator::{parse_amount, parse_bucket, parse_date, parse_optional_date};
use crate::config::ConfigManager;
use crate::domain::deal::{AdvancePosting, Deal};
use crate::domain::ledger::{CrossTransfer, LedgerEntry, LedgerEntryPatch, LedgerStatement, NewLedgerEntry};
use crate::domain::types::Bucket;
use crate::engine::RecoupLedger;
use crate::repository::DealRepository;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 手工分录（字符串形式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntryInput {
    pub party_id: i64,
    pub deal_id: Option<i64>,
    pub bucket: Option<String>, // 缺省取配置的默认桶
    pub entry_date: String,
    pub description: String,
    pub debit: Decimal,
    pub credit: Decimal,
}

/// 分录修改（字符串形式）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerEntryPatchInput {
    pub entry_date: Option<String>,
    pub description: Option<String>,
    pub debit: Option<Decimal>,
    pub credit: Option<Decimal>,
}

/// 余额查询响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub party_id: i64,
    pub bucket: Bucket,
    pub balance: Decimal,
}

pub struct LedgerApi {
    ledger: Arc<RecoupLedger>,
    deal_repo: Arc<DealRepository>,
    config: Arc<ConfigManager>,
}

impl LedgerApi {
    pub fn new(ledger: Arc<RecoupLedger>, deal_repo: Arc<DealRepository>, config: Arc<ConfigManager>) -> Self {
        Self {
            ledger,
            deal_repo,
            config,
        }
    }

    fn bucket_or_default(&self, raw: Option<&str>) -> ApiResult<Bucket> {
        match raw {
            Some(raw) => parse_bucket(raw),
            None => self
                .config
                .default_bucket()
                .map_err(|e| ApiError::InternalError(e.to_string())),
        }
    }

    /// 手工过账
    pub fn post_entry(&self, input: &LedgerEntryInput) -> ApiResult<LedgerEntry> {
        let bucket = self.bucket_or_default(input.bucket.as_deref())?;
        let mut entry = NewLedgerEntry::debit(
            input.party_id,
            bucket,
            parse_date("entry_date", &input.entry_date)?,
            parse_amount("debit", input.debit)?,
            input.description.clone(),
        );
        entry.credit = parse_amount("credit", input.credit)?;
        entry.deal_id = input.deal_id;
        Ok(self.ledger.post(entry)?)
    }

    pub fn edit_entry(&self, entry_id: i64, input: &LedgerEntryPatchInput) -> ApiResult<LedgerEntry> {
        let patch = LedgerEntryPatch {
            entry_date: parse_optional_date("entry_date", input.entry_date.as_deref())?,
            description: input.description.clone(),
            debit: input.debit.map(|d| parse_amount("debit", d)).transpose()?,
            credit: input.credit.map(|c| parse_amount("credit", c)).transpose()?,
        };
        Ok(self.ledger.edit(entry_id, &patch)?)
    }

    /// 删除分录（交叉抵扣分录成对删除），返回被删除的分录 ID
    pub fn delete_entry(&self, entry_id: i64) -> ApiResult<Vec<i64>> {
        Ok(self.ledger.delete(entry_id)?)
    }

    /// 查询余额（as_of 缺省为全部分录）
    pub fn balance(&self, party_id: i64, bucket: &str, as_of: Option<&str>) -> ApiResult<BalanceResponse> {
        let bucket = parse_bucket(bucket)?;
        let as_of = parse_optional_date("as_of", as_of)?;
        Ok(BalanceResponse {
            party_id,
            bucket,
            balance: self.ledger.balance_of(party_id, bucket, as_of)?,
        })
    }

    /// 期间对账单（期初 + 明细 + 期末）
    pub fn statement(&self, party_id: i64, bucket: &str, from: &str, to: &str) -> ApiResult<LedgerStatement> {
        let from = parse_date("from", from)?;
        let to = parse_date("to", to)?;
        if to < from {
            return Err(ApiError::InvalidInput(format!("结束日 {} 早于开始日 {}", to, from)));
        }
        Ok(self.ledger.statement_of(party_id, parse_bucket(bucket)?, from, to)?)
    }

    // ==========================================
    // 合约 / 预付款
    // ==========================================

    pub fn register_deal(&self, deal: &Deal) -> ApiResult<i64> {
        deal.validate().map_err(ApiError::InvalidInput)?;
        Ok(self.deal_repo.insert(deal)?)
    }

    pub fn post_advance(
        &self,
        advance_id: i64,
        deal_id: i64,
        bucket: Option<&str>,
        amount: Decimal,
        paid_date: &str,
    ) -> ApiResult<LedgerEntry> {
        let posting = AdvancePosting {
            advance_id,
            deal_id,
            bucket: bucket.map(parse_bucket).transpose()?,
            amount: parse_amount("amount", amount)?,
            paid_date: parse_date("paid_date", paid_date)?,
            description: None,
        };
        Ok(self.ledger.post_advance(&posting)?)
    }

    /// 使用明细收益入账（amount 缺省时按合约费率计算）
    pub fn credit_usage(
        &self,
        usage_id: i64,
        deal_id: i64,
        amount: Option<Decimal>,
        units_to_date: i64,
    ) -> ApiResult<LedgerEntry> {
        match amount {
            Some(amount) => Ok(self
                .ledger
                .credit_from_usage(usage_id, deal_id, parse_amount("amount", amount)?, None)?),
            None => Ok(self.ledger.credit_royalty(usage_id, deal_id, units_to_date)?),
        }
    }

    pub fn cross_collateralize(&self, party_id: i64, as_of: &str) -> ApiResult<Vec<CrossTransfer>> {
        Ok(self
            .ledger
            .cross_collateralize(party_id, parse_date("as_of", as_of)?)?)
    }

    pub fn recoup_statement(&self, statement_id: i64, bucket: Option<&str>) -> ApiResult<Option<LedgerEntry>> {
        let bucket = self.bucket_or_default(bucket)?;
        Ok(self.ledger.recoup_statement(statement_id, bucket)?)
    }

    pub fn verify(&self, party_id: i64, bucket: &str) -> ApiResult<usize> {
        Ok(self.ledger.verify_series(party_id, parse_bucket(bucket)?)?)
    }
}
