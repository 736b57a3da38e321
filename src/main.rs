// ==========================================
// 版权结算对账系统 - 命令行入口
// ==========================================
// 用法:
//   royalty-recon preview <文件>
//   royalty-recon import <文件> <来源类型> <期间开始> <期间结束> [--dry-run]
//   royalty-recon auto-match [批量]
//   royalty-recon balance <权利人ID> <回收桶> [截至日]
//   royalty-recon cross-collateralize <权利人ID> [截至日]
// 数据库: ROYALTY_RECON_DB_PATH 或用户数据目录
// ==========================================

use anyhow::{anyhow, bail, Context};
use royalty_recon::api::{FileFormatInput, ImportUsageInput};
use royalty_recon::app::{get_default_db_path, AppState};
use royalty_recon::logging;

const USAGE: &str = "用法: royalty-recon <preview|import|auto-match|balance|cross-collateralize> [参数...]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} - 系统版本: {}", royalty_recon::APP_NAME, royalty_recon::VERSION);
    tracing::info!("==================================================");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);
    let state = AppState::new(db_path).map_err(|e| anyhow!(e))?;

    match command.as_str() {
        "preview" => {
            let path = arg(&args, 1, "文件")?;
            let bytes = std::fs::read(path).with_context(|| format!("无法读取文件: {}", path))?;
            let preview = state
                .import_api
                .preview_file(path, bytes, &FileFormatInput::default())?;
            let suggested = state.import_api.suggest_mapping(&preview.columns);
            println!("{}", serde_json::to_string_pretty(&preview)?);
            println!("{}", serde_json::to_string_pretty(&suggested)?);
        }
        "import" => {
            let path = arg(&args, 1, "文件")?;
            let bytes = std::fs::read(path).with_context(|| format!("无法读取文件: {}", path))?;
            let format = FileFormatInput::default();
            let preview = state.import_api.preview_file(path, bytes.clone(), &format)?;
            let input = ImportUsageInput {
                file_name: path.clone(),
                bytes,
                format,
                mapping: state.import_api.suggest_mapping(&preview.columns),
                source_type: arg(&args, 2, "来源类型")?.clone(),
                source_reference: None,
                period_start: arg(&args, 3, "期间开始")?.clone(),
                period_end: arg(&args, 4, "期间结束")?.clone(),
                currency: None,
                exchange_rate: None,
                default_usage_type: None,
                auto_match: true,
                skip_duplicates: true,
                dry_run: args.iter().any(|a| a == "--dry-run"),
            };
            let response = state.import_api.import_usage(input).await?;
            println!("{}", response.message);
            for line in &response.summary.error_log {
                println!("  {}", line);
            }
        }
        "auto-match" => {
            let batch_size = match args.get(1) {
                Some(raw) => raw.parse::<usize>().with_context(|| format!("批量无效: {}", raw))?,
                None => state.config.batch_size().map_err(|e| anyhow!(e.to_string()))?,
            };
            let stats = state.catalog_api.auto_match_pending(batch_size)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        "balance" => {
            let party_id = party(&args)?;
            let bucket = arg(&args, 2, "回收桶")?;
            let response = state
                .ledger_api
                .balance(party_id, bucket, args.get(3).map(String::as_str))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        "cross-collateralize" => {
            let party_id = party(&args)?;
            // 截至日缺省为当天
            let as_of = args
                .get(2)
                .cloned()
                .unwrap_or_else(|| chrono::Utc::now().date_naive().to_string());
            let transfers = state.ledger_api.cross_collateralize(party_id, &as_of)?;
            println!("{}", serde_json::to_string_pretty(&transfers)?);
        }
        other => bail!("未知命令: {}\n{}", other, USAGE),
    }

    Ok(())
}

fn arg<'a>(args: &'a [String], idx: usize, name: &str) -> anyhow::Result<&'a String> {
    args.get(idx).ok_or_else(|| anyhow!("缺少参数: {}\n{}", name, USAGE))
}

fn party(args: &[String]) -> anyhow::Result<i64> {
    let raw = arg(args, 1, "权利人ID")?;
    raw.parse::<i64>().with_context(|| format!("权利人ID无效: {}", raw))
}
