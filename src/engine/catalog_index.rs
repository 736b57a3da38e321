// ==========================================
// 版权结算对账系统 - 曲库索引 (Catalog Index)
// ==========================================
// 职责: 只读查找
// - 精确编码: ISRC → 录音，ISWC → 作品（至多一个）
// - 规范化 (曲目, 艺人): 候选录音，按文本相似度降序
// 说明: 不可变快照，可跨线程共享；曲库变更后重新加载
// ==========================================

use crate::domain::catalog::{normalize_isrc, normalize_iswc, Recording, Work};
use crate::engine::text_normalizer::{contains_either_way, normalize_text};
use crate::repository::{CatalogRepository, RepositoryResult};
use std::collections::HashMap;

/// 预先规范化的录音条目
#[derive(Debug, Clone)]
struct IndexedRecording {
    recording: Recording,
    norm_title: String,
    norm_artists: Vec<String>,
}

/// 模糊候选
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<'a> {
    pub recording: &'a Recording,
    pub similarity: f64,
}

// ==========================================
// CatalogIndex
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    recordings: Vec<IndexedRecording>,
    by_recording_id: HashMap<i64, usize>,
    by_isrc: HashMap<String, usize>,
    works: HashMap<i64, Work>,
    by_iswc: HashMap<String, i64>,
}

impl CatalogIndex {
    /// 由曲库数据构建索引
    pub fn from_parts(recordings: Vec<Recording>, works: Vec<Work>) -> Self {
        let mut index = CatalogIndex::default();

        for work in works {
            if let Some(code) = work.iswc.as_deref().and_then(|c| normalize_iswc(c).ok()) {
                index.by_iswc.insert(code, work.work_id);
            }
            index.works.insert(work.work_id, work);
        }

        for recording in recordings {
            let pos = index.recordings.len();
            if let Some(code) = recording.isrc.as_deref().and_then(|c| normalize_isrc(c).ok()) {
                index.by_isrc.insert(code, pos);
            }
            index.by_recording_id.insert(recording.recording_id, pos);
            index.recordings.push(IndexedRecording {
                norm_title: normalize_text(&recording.title),
                norm_artists: recording.artists.iter().map(|a| normalize_text(a)).collect(),
                recording,
            });
        }

        index
    }

    /// 从曲库仓储加载
    pub fn load(repo: &CatalogRepository) -> RepositoryResult<Self> {
        let recordings = repo.list_recordings()?;
        let works = repo.list_works()?;
        Ok(Self::from_parts(recordings, works))
    }

    pub fn recording_count(&self) -> usize {
        self.recordings.len()
    }

    pub fn recording(&self, recording_id: i64) -> Option<&Recording> {
        self.by_recording_id
            .get(&recording_id)
            .map(|pos| &self.recordings[*pos].recording)
    }

    pub fn work(&self, work_id: i64) -> Option<&Work> {
        self.works.get(&work_id)
    }

    /// ISRC 精确查找（输入允许带连字符/小写）
    pub fn lookup_isrc(&self, isrc: &str) -> Option<&Recording> {
        let code = normalize_isrc(isrc).ok()?;
        self.by_isrc
            .get(&code)
            .map(|pos| &self.recordings[*pos].recording)
    }

    /// ISWC 精确查找
    pub fn lookup_iswc(&self, iswc: &str) -> Option<&Work> {
        let code = normalize_iswc(iswc).ok()?;
        self.by_iswc.get(&code).and_then(|id| self.works.get(id))
    }

    /// 规范化 (曲目, 艺人) 候选
    ///
    /// 条件: 曲目双向包含，且艺人列表中至少一项与报告艺人双向包含
    /// 排序: 曲目相似度（归一化编辑距离）+ 艺人相似度（Jaro-Winkler），同分按录音 ID
    pub fn candidates(&self, title: &str, artist: &str) -> Vec<Candidate<'_>> {
        let norm_title = normalize_text(title);
        let norm_artist = normalize_text(artist);
        if norm_title.is_empty() || norm_artist.is_empty() {
            return Vec::new();
        }

        let mut found: Vec<Candidate<'_>> = self
            .recordings
            .iter()
            .filter(|r| contains_either_way(&r.norm_title, &norm_title))
            .filter_map(|r| {
                let artist_score = r
                    .norm_artists
                    .iter()
                    .filter(|a| contains_either_way(a, &norm_artist))
                    .map(|a| strsim::jaro_winkler(a, &norm_artist))
                    .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))))?;
                let title_score = strsim::normalized_levenshtein(&r.norm_title, &norm_title);
                Some(Candidate {
                    recording: &r.recording,
                    similarity: (title_score + artist_score) / 2.0,
                })
            })
            .collect();

        found.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.recording.recording_id.cmp(&b.recording.recording_id))
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(id: i64, title: &str, isrc: Option<&str>, work_id: Option<i64>, artists: &[&str]) -> Recording {
        Recording {
            recording_id: id,
            title: title.to_string(),
            isrc: isrc.map(str::to_string),
            work_id,
            artists: artists.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn index() -> CatalogIndex {
        CatalogIndex::from_parts(
            vec![
                recording(1, "Blue Moon", Some("USABC1234567"), Some(10), &["The Tides"]),
                recording(2, "Blue Moon (Live)", None, Some(10), &["The Tides"]),
                recording(3, "Señorita", None, None, &["Beyoncé", "Jay-Z"]),
            ],
            vec![Work { work_id: 10, title: "Blue Moon".to_string(), iswc: Some("T1234567890".to_string()) }],
        )
    }

    #[test]
    fn test_exact_code_lookup() {
        let idx = index();
        assert_eq!(idx.lookup_isrc("us-abc-12-34567").map(|r| r.recording_id), Some(1));
        assert!(idx.lookup_isrc("GBXYZ9999999").is_none());
        assert!(idx.lookup_isrc("garbage").is_none());
        assert_eq!(idx.lookup_iswc("T-123456789-0").map(|w| w.work_id), Some(10));
    }

    #[test]
    fn test_candidates_are_ordered_by_similarity() {
        let idx = index();
        let found = idx.candidates("blue moon", "the tides");
        let ids: Vec<i64> = found.iter().map(|c| c.recording.recording_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_candidates_ignore_punctuation_and_diacritics() {
        let idx = index();
        let found = idx.candidates("SENORITA!", "beyonce");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].recording.recording_id, 3);
    }

    #[test]
    fn test_candidates_require_artist_overlap() {
        let idx = index();
        assert!(idx.candidates("Blue Moon", "Someone Else").is_empty());
        assert!(idx.candidates("", "The Tides").is_empty());
    }

    #[test]
    fn test_index_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CatalogIndex>();
    }
}
