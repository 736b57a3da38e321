// ==========================================
// 版权结算对账系统 - 会计过账钩子
// ==========================================
// 职责: 定义会计过账 trait，台账/付款动作完成后调用
// 说明: 引擎层只定义 trait，外部会计系统实现适配器
// 红线: 钩子失败只记录日志，不回滚核心状态
// ==========================================

use crate::domain::types::Bucket;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 会计事件
// ==========================================

/// 影响台账/现金的业务事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountingEvent {
    /// 预付款已支付（已过账借方分录）
    AdvancePaid {
        advance_id: i64,
        deal_id: i64,
        party_id: i64,
        bucket: Bucket,
        amount: Decimal,
        paid_date: NaiveDate,
        entry_id: i64,
    },
    /// 付款已过账
    PaymentPosted {
        payment_id: i64,
        partner_id: Option<i64>,
        payment_date: NaiveDate,
        amount: Decimal,
        statement_ids: Vec<i64>,
    },
}

impl AccountingEvent {
    /// 事件类型标识
    pub fn kind(&self) -> &'static str {
        match self {
            AccountingEvent::AdvancePaid { .. } => "ADVANCE_PAID",
            AccountingEvent::PaymentPosted { .. } => "PAYMENT_POSTED",
        }
    }
}

// ==========================================
// 过账 Trait
// ==========================================

/// 会计过账协作方
///
/// # 返回
/// - `Ok(journal_ref)`: 外部凭证号（不支持时为空字符串）
/// - `Err`: 过账失败
pub trait AccountingPoster: Send + Sync {
    fn post(&self, event: AccountingEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作过账者（未接入会计系统时使用）
#[derive(Debug, Clone, Default)]
pub struct NoOpAccountingPoster;

impl AccountingPoster for NoOpAccountingPoster {
    fn post(&self, event: AccountingEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(kind = event.kind(), "NoOpAccountingPoster: 跳过会计过账");
        Ok(String::new())
    }
}

/// 可选的过账者包装
#[derive(Clone, Default)]
pub struct OptionalAccountingPoster {
    inner: Option<Arc<dyn AccountingPoster>>,
}

impl OptionalAccountingPoster {
    pub fn with_poster(poster: Arc<dyn AccountingPoster>) -> Self {
        Self { inner: Some(poster) }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }

    /// 调用过账者；失败只记录告警
    ///
    /// # 返回
    /// - Some(journal_ref): 过账成功
    /// - None: 未配置或过账失败
    pub fn notify(&self, event: AccountingEvent) -> Option<String> {
        let poster = match &self.inner {
            Some(p) => p,
            None => {
                tracing::debug!(kind = event.kind(), "未配置会计过账者，跳过");
                return None;
            }
        };
        let kind = event.kind();
        match poster.post(event) {
            Ok(journal_ref) => Some(journal_ref),
            Err(e) => {
                tracing::warn!(kind = kind, error = %e, "会计过账失败（核心状态不受影响）");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct RecordingPoster {
        seen: Mutex<Vec<&'static str>>,
        fail: bool,
    }

    impl AccountingPoster for RecordingPoster {
        fn post(&self, event: AccountingEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
            self.seen.lock().unwrap().push(event.kind());
            if self.fail {
                return Err("ledger offline".into());
            }
            Ok("JE-1".to_string())
        }
    }

    fn payment_event() -> AccountingEvent {
        AccountingEvent::PaymentPosted {
            payment_id: 1,
            partner_id: Some(5),
            payment_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            amount: dec!(90),
            statement_ids: vec![3],
        }
    }

    #[test]
    fn test_noop_poster() {
        let result = NoOpAccountingPoster.post(payment_event());
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn test_optional_poster_none() {
        let poster = OptionalAccountingPoster::none();
        assert!(!poster.is_configured());
        assert_eq!(poster.notify(payment_event()), None);
    }

    #[test]
    fn test_optional_poster_swallows_failure() {
        let inner = Arc::new(RecordingPoster { seen: Mutex::new(Vec::new()), fail: true });
        let poster = OptionalAccountingPoster::with_poster(inner.clone());
        assert_eq!(poster.notify(payment_event()), None);
        assert_eq!(*inner.seen.lock().unwrap(), vec!["PAYMENT_POSTED"]);
    }

    #[test]
    fn test_optional_poster_returns_journal_ref() {
        let inner = Arc::new(RecordingPoster { seen: Mutex::new(Vec::new()), fail: false });
        let poster = OptionalAccountingPoster::with_poster(inner);
        assert_eq!(poster.notify(payment_event()).as_deref(), Some("JE-1"));
    }
}
