//! 查询缓存
//!
//! 纯数据结构，不做IO。键为`(路径, 查询串)`；失效按资源族：路径`/api/`
//! 后的第一段即资源族，变更请求使本族全部缓存键失效。病例与照片的变更
//! 额外使统计键失效（统计由病例数据派生）。

use serde_json::Value;
use std::collections::HashMap;

/// 从API路径提取资源族（`/api/cases/3` -> `cases`）
pub fn resource_family(path: &str) -> &str {
    path.strip_prefix("/api/")
        .unwrap_or(path)
        .split('/')
        .next()
        .unwrap_or("")
}

#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<(String, String), Value>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str, query: &str) -> Option<&Value> {
        self.entries.get(&(path.to_string(), query.to_string()))
    }

    pub fn insert(&mut self, path: &str, query: &str, value: Value) {
        self.entries
            .insert((path.to_string(), query.to_string()), value);
    }

    /// 变更后的失效：本资源族全部键，病例/照片变更连带统计
    pub fn invalidate_for_mutation(&mut self, path: &str) {
        let family = resource_family(path).to_string();
        self.entries.retain(|(cached_path, _), _| {
            let cached_family = resource_family(cached_path);
            if cached_family == family {
                return false;
            }
            // 照片挂在病例之下，统计由病例派生
            if (family == "cases" || family == "photos") && cached_family == "cases" {
                return false;
            }
            true
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn family_is_first_segment_after_api() {
        assert_eq!(resource_family("/api/cases/3"), "cases");
        assert_eq!(resource_family("/api/cases/stats"), "cases");
        assert_eq!(resource_family("/api/case-templates"), "case-templates");
        assert_eq!(resource_family("/api/patients"), "patients");
    }

    #[test]
    fn mutation_invalidates_only_its_family() {
        let mut cache = QueryCache::new();
        cache.insert("/api/patients", "", json!([1]));
        cache.insert("/api/patients", "search=doe", json!([2]));
        cache.insert("/api/surgeons", "", json!([3]));

        cache.invalidate_for_mutation("/api/patients/7");
        assert!(cache.get("/api/patients", "").is_none());
        assert!(cache.get("/api/patients", "search=doe").is_none());
        assert!(cache.get("/api/surgeons", "").is_some());
    }

    #[test]
    fn case_mutation_invalidates_stats() {
        let mut cache = QueryCache::new();
        cache.insert("/api/cases", "limit=50", json!([]));
        cache.insert("/api/cases/stats", "", json!({"totalCases": 4}));
        cache.insert("/api/user-preferences", "", json!({}));

        cache.invalidate_for_mutation("/api/cases");
        assert!(cache.get("/api/cases", "limit=50").is_none());
        assert!(cache.get("/api/cases/stats", "").is_none());
        assert!(cache.get("/api/user-preferences", "").is_some());
    }

    #[test]
    fn photo_mutation_invalidates_case_keys() {
        let mut cache = QueryCache::new();
        cache.insert("/api/cases/3", "", json!({}));
        cache.insert("/api/cases/stats", "", json!({}));

        cache.invalidate_for_mutation("/api/photos/9");
        assert!(cache.is_empty());
    }

    #[test]
    fn template_family_is_distinct_from_cases() {
        let mut cache = QueryCache::new();
        cache.insert("/api/cases", "", json!([]));

        cache.invalidate_for_mutation("/api/case-templates");
        assert!(cache.get("/api/cases", "").is_some());
    }
}
