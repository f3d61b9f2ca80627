//! 检查点存储服务 - 业务能力层
//!
//! 只负责"读写结果文件"能力，不关心流程
//!
//! 文件命名：
//! - `<name>_<id>_raw_reviews.csv`：原始评论
//! - `<name>_<id>_raw_reviews_progress.csv`：抓取中途的进度
//! - `<name>_<id>_<model>_analysed.csv`：分析结果
//! - `<name>_<id>_<model>_analyzed_progress.csv`：分析中途的进度
//! - `<name>_<id>_summary.json`：应用汇总

use crate::config::FilePathsConfig;
use crate::error::CheckpointError;
use crate::models::{merge, AnalysisRecord, Construct, RawReview, WorkItem};
use crate::services::csv_codec::{self, Row};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// 去掉文件名中的非法字符 `\/*?:"<>|`
pub fn sanitise_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect()
}

/// 应用汇总报告
#[derive(Debug, Clone, Serialize)]
pub struct AppSummary {
    pub app_name: String,
    pub app_id: u32,
    /// 已有最终分析文件的模型
    pub models_analysed: Vec<String>,
    /// 每个模型的统计
    pub aggregate_results: BTreeMap<String, ModelAggregate>,
    pub generated_at: String,
}

/// 单个模型的统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelAggregate {
    pub reviews: usize,
    /// 每个维度判断为真的数量
    pub true_counts: BTreeMap<String, usize>,
}

/// 原始评论文件可用性汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct RawAvailability {
    pub total_apps: usize,
    pub apps_with_reviews: usize,
    pub apps_without_reviews: usize,
    pub total_reviews: usize,
    pub app_details: Vec<RawAvailabilityEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RawAvailabilityEntry {
    pub app_id: u32,
    pub app_name: String,
    pub has_reviews: bool,
    pub review_count: usize,
    pub file_path: PathBuf,
}

/// 检查点存储服务
///
/// 职责：
/// - 决定各类结果文件的路径
/// - 原始评论、分析结果的读写
/// - 进度文件原子替换与清理
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    raw_dir: PathBuf,
    analysed_dir: PathBuf,
    summary_dir: PathBuf,
}

impl CheckpointStore {
    /// 按配置的目录创建
    pub fn new(paths: &FilePathsConfig) -> Self {
        Self {
            raw_dir: paths.raw_output_folder.clone(),
            analysed_dir: paths.analysed_output_folder.clone(),
            summary_dir: paths.summary_output_folder.clone(),
        }
    }

    /// 所有目录放在同一个根目录下
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            raw_dir: root.join("raw"),
            analysed_dir: root.join("analysed"),
            summary_dir: root.join("summary"),
        }
    }

    fn prefix(item: &WorkItem) -> String {
        format!("{}_{}", sanitise_filename(&item.name), item.app_id)
    }

    pub fn raw_path(&self, item: &WorkItem) -> PathBuf {
        self.raw_dir
            .join(format!("{}_raw_reviews.csv", Self::prefix(item)))
    }

    pub fn raw_progress_path(&self, item: &WorkItem) -> PathBuf {
        self.raw_dir
            .join(format!("{}_raw_reviews_progress.csv", Self::prefix(item)))
    }

    pub fn analysed_path(&self, item: &WorkItem, model: &str) -> PathBuf {
        self.analysed_dir.join(format!(
            "{}_{}_analysed.csv",
            Self::prefix(item),
            sanitise_filename(model)
        ))
    }

    pub fn analysed_progress_path(&self, item: &WorkItem, model: &str) -> PathBuf {
        self.analysed_dir.join(format!(
            "{}_{}_analyzed_progress.csv",
            Self::prefix(item),
            sanitise_filename(model)
        ))
    }

    pub fn summary_path(&self, item: &WorkItem) -> PathBuf {
        self.summary_dir
            .join(format!("{}_summary.json", Self::prefix(item)))
    }

    fn ensure_dir(dir: &Path) -> Result<(), CheckpointError> {
        fs::create_dir_all(dir).map_err(|e| CheckpointError::io(dir.display().to_string(), e))
    }

    // ========== 原始评论 ==========

    /// 原始评论文件是否存在
    pub fn raw_exists(&self, item: &WorkItem) -> bool {
        self.raw_path(item).exists()
    }

    /// 保存原始评论（最终文件）
    pub fn save_raw(&self, item: &WorkItem, reviews: &[RawReview]) -> Result<PathBuf, CheckpointError> {
        Self::ensure_dir(&self.raw_dir)?;
        let path = self.raw_path(item);
        let rows: Vec<Row> = reviews.iter().map(csv_codec::review_to_row).collect();
        csv_codec::write_rows(&path, &rows)?;
        info!("💾 已保存 {} 条原始评论: {}", reviews.len(), path.display());
        Ok(path)
    }

    /// 保存抓取进度（原子替换）
    pub fn save_raw_progress(&self, item: &WorkItem, reviews: &[RawReview]) -> Result<(), CheckpointError> {
        Self::ensure_dir(&self.raw_dir)?;
        let path = self.raw_progress_path(item);
        let rows: Vec<Row> = reviews.iter().map(csv_codec::review_to_row).collect();
        csv_codec::write_rows_atomic(&path, &rows)?;
        info!("💾 抓取进度: {} 条评论已写入 {}", reviews.len(), path.display());
        Ok(())
    }

    /// 删除抓取进度文件
    pub fn remove_raw_progress(&self, item: &WorkItem) {
        remove_if_exists(&self.raw_progress_path(item));
    }

    /// 读取原始评论
    pub fn load_raw(&self, item: &WorkItem) -> Result<Vec<RawReview>, CheckpointError> {
        let path = self.raw_path(item);
        let reviews: Vec<RawReview> = csv_codec::read_rows(&path)?
            .into_iter()
            .map(RawReview::new)
            .collect();
        info!("📂 从 {} 读取 {} 条原始评论", path.display(), reviews.len());
        Ok(reviews)
    }

    // ========== 分析结果 ==========

    /// 保存分析结果（最终文件）
    pub fn save_analysis(
        &self,
        item: &WorkItem,
        model: &str,
        records: &[AnalysisRecord],
    ) -> Result<PathBuf, CheckpointError> {
        Self::ensure_dir(&self.analysed_dir)?;
        let path = self.analysed_path(item, model);
        let rows: Vec<Row> = records.iter().map(csv_codec::record_to_row).collect();
        csv_codec::write_rows(&path, &rows)?;
        info!("💾 已保存 {} 条分析结果: {}", records.len(), path.display());
        Ok(path)
    }

    /// 保存分析进度（原子替换）
    pub fn save_analysis_progress(
        &self,
        item: &WorkItem,
        model: &str,
        records: &[AnalysisRecord],
    ) -> Result<(), CheckpointError> {
        Self::ensure_dir(&self.analysed_dir)?;
        let path = self.analysed_progress_path(item, model);
        let rows: Vec<Row> = records.iter().map(csv_codec::record_to_row).collect();
        csv_codec::write_rows_atomic(&path, &rows)?;
        debug!("分析进度: {} 条结果已写入 {}", records.len(), path.display());
        Ok(())
    }

    /// 读取已有分析结果：最终文件与进度文件合并
    pub fn load_existing_analysis(
        &self,
        item: &WorkItem,
        model: &str,
    ) -> Result<Vec<AnalysisRecord>, CheckpointError> {
        let final_records = read_records_if_exists(&self.analysed_path(item, model))?;
        let progress_records = read_records_if_exists(&self.analysed_progress_path(item, model))?;

        if !final_records.is_empty() || !progress_records.is_empty() {
            info!(
                "📂 {}@{} 已有结果: 最终文件 {} 条，进度文件 {} 条",
                item.name,
                model,
                final_records.len(),
                progress_records.len()
            );
        }
        Ok(merge(final_records, progress_records))
    }

    /// 最终分析文件中的记录数，文件不存在时为 None
    pub fn final_analysis_count(&self, item: &WorkItem, model: &str) -> Option<usize> {
        let path = self.analysed_path(item, model);
        if !path.exists() {
            return None;
        }
        match csv_codec::count_rows(&path) {
            Ok(count) => Some(count),
            Err(e) => {
                error!("读取分析文件失败: {}", e);
                None
            }
        }
    }

    /// 删除分析进度文件
    pub fn cleanup_analysis_progress(&self, item: &WorkItem, model: &str) {
        remove_if_exists(&self.analysed_progress_path(item, model));
    }

    // ========== 汇总 ==========

    /// 生成应用汇总报告
    pub fn write_summary(&self, item: &WorkItem, models: &[String]) -> Result<PathBuf, CheckpointError> {
        let mut summary = AppSummary {
            app_name: item.name.clone(),
            app_id: item.app_id,
            models_analysed: Vec::new(),
            aggregate_results: BTreeMap::new(),
            generated_at: chrono::Local::now().to_rfc3339(),
        };

        for model in models {
            let path = self.analysed_path(item, model);
            if !path.exists() {
                continue;
            }
            let records = read_records_if_exists(&path)?;
            let mut aggregate = ModelAggregate {
                reviews: records.len(),
                ..Default::default()
            };
            for construct in Construct::ALL {
                let count = records
                    .iter()
                    .filter(|r| r.judgement(construct).flag == Some(true))
                    .count();
                aggregate.true_counts.insert(construct.key().to_string(), count);
            }
            summary.models_analysed.push(model.clone());
            summary.aggregate_results.insert(model.clone(), aggregate);
        }

        Self::ensure_dir(&self.summary_dir)?;
        let path = self.summary_path(item);
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(&path, json).map_err(|e| CheckpointError::io(path.display().to_string(), e))?;
        info!("📊 已生成汇总报告: {}", path.display());
        Ok(path)
    }

    /// 统计各应用原始评论文件的可用性
    pub fn raw_availability(&self, items: &[WorkItem]) -> RawAvailability {
        let mut availability = RawAvailability {
            total_apps: items.len(),
            ..Default::default()
        };

        for item in items {
            let path = self.raw_path(item);
            let count = if path.exists() {
                match csv_codec::count_rows(&path) {
                    Ok(count) => Some(count),
                    Err(e) => {
                        error!("读取原始评论文件失败: {}", e);
                        None
                    }
                }
            } else {
                None
            };

            match count {
                Some(count) => {
                    availability.apps_with_reviews += 1;
                    availability.total_reviews += count;
                }
                None => availability.apps_without_reviews += 1,
            }
            availability.app_details.push(RawAvailabilityEntry {
                app_id: item.app_id,
                app_name: item.name.clone(),
                has_reviews: count.is_some(),
                review_count: count.unwrap_or(0),
                file_path: path,
            });
        }
        availability
    }
}

fn read_records_if_exists(path: &Path) -> Result<Vec<AnalysisRecord>, CheckpointError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    Ok(csv_codec::read_rows(path)?
        .into_iter()
        .map(csv_codec::record_from_fields)
        .collect())
}

fn remove_if_exists(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => info!("🧹 已清理进度文件: {}", path.display()),
        Err(e) => error!("清理进度文件失败 ({}): {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConstructJudgement;
    use serde_json::json;

    fn review(n: i64) -> RawReview {
        RawReview::from_value(json!({
            "review": format!("review number {}", n),
            "timestamp_created": 1700000000 + n,
            "author": {"steamid": format!("{}", 1000 + n), "playtime_forever": 60}
        }))
        .unwrap()
    }

    fn record(n: i64, flag: bool) -> AnalysisRecord {
        let mut judgements: [ConstructJudgement; 6] = Default::default();
        judgements[0].flag = Some(flag);
        AnalysisRecord::new(review(n), judgements, format!("output {}", n))
    }

    #[test]
    fn test_sanitise_filename() {
        assert_eq!(sanitise_filename("Half-Life: Alyx?"), "Half-Life Alyx");
        assert_eq!(sanitise_filename(r#"a\b/c*d"e<f>g|h"#), "abcdefgh");
    }

    #[test]
    fn test_paths() {
        let store = CheckpointStore::with_root("/tmp/out");
        let item = WorkItem::new(620, "Portal 2: Deluxe");

        assert_eq!(
            store.raw_path(&item),
            PathBuf::from("/tmp/out/raw/Portal 2 Deluxe_620_raw_reviews.csv")
        );
        assert_eq!(
            store.analysed_progress_path(&item, "gpt/4o"),
            PathBuf::from("/tmp/out/analysed/Portal 2 Deluxe_620_gpt4o_analyzed_progress.csv")
        );
        assert_eq!(
            store.summary_path(&item),
            PathBuf::from("/tmp/out/summary/Portal 2 Deluxe_620_summary.json")
        );
    }

    #[test]
    fn test_existing_analysis_merges_final_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::with_root(dir.path());
        let item = WorkItem::new(10, "Game");

        store
            .save_analysis(&item, "m", &[record(1, true), record(2, false)])
            .unwrap();
        store
            .save_analysis_progress(&item, "m", &[record(2, false), record(3, true)])
            .unwrap();

        let existing = store.load_existing_analysis(&item, "m").unwrap();
        let texts: Vec<String> = existing.iter().map(|r| r.review.text()).collect();
        assert_eq!(
            texts,
            vec!["review number 1", "review number 2", "review number 3"]
        );
        assert_eq!(store.final_analysis_count(&item, "m"), Some(2));

        store.cleanup_analysis_progress(&item, "m");
        assert!(!store.analysed_progress_path(&item, "m").exists());
    }

    #[test]
    fn test_summary_and_raw_availability() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::with_root(dir.path());
        let with_raw = WorkItem::new(1, "With");
        let without_raw = WorkItem::new(2, "Without");

        store.save_raw(&with_raw, &[review(1), review(2)]).unwrap();
        store
            .save_analysis(&with_raw, "m1", &[record(1, true), record(2, true)])
            .unwrap();

        let path = store
            .write_summary(&with_raw, &["m1".to_string(), "m2".to_string()])
            .unwrap();
        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(summary["models_analysed"], json!(["m1"]));
        assert_eq!(
            summary["aggregate_results"]["m1"]["true_counts"]["COMPETENCE SATISFACTION"],
            json!(2)
        );

        let availability = store.raw_availability(&[with_raw.clone(), without_raw]);
        assert_eq!(availability.apps_with_reviews, 1);
        assert_eq!(availability.apps_without_reviews, 1);
        assert_eq!(availability.total_reviews, 2);

        let loaded = store.load_raw(&with_raw).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].playtime_forever(), Some(60.0));
    }
}
