//! API客户端
//!
//! 读路径先查缓存，未命中回源并写入；写路径直达并按资源族失效缓存。
//! 取数后端以trait注入，缓存逻辑可在无网络环境下测试。

use crate::cache::QueryCache;
use async_trait::async_trait;
use caselog_core::{CaselogError, Result};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

/// 取数后端
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn fetch(
        &self,
        method: &str,
        path: &str,
        query: &str,
        body: Option<&Value>,
    ) -> Result<Value>;
}

/// 基于reqwest的取数实现，cookie会话随客户端保持
pub struct ReqwestFetcher {
    base_url: String,
    http: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| CaselogError::Internal(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn fetch(
        &self,
        method: &str,
        path: &str,
        query: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| CaselogError::Internal(e.to_string()))?;
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| CaselogError::Internal(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => CaselogError::Unauthorized(message),
                403 => CaselogError::Forbidden(message),
                404 => CaselogError::NotFound(message),
                400 => CaselogError::Validation(message),
                _ => CaselogError::Internal(message),
            });
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response
            .json()
            .await
            .map_err(|e| CaselogError::Internal(e.to_string()))
    }
}

/// 带查询缓存的API客户端
pub struct ApiClient<F: HttpFetch> {
    fetcher: F,
    cache: Mutex<QueryCache>,
}

impl<F: HttpFetch> ApiClient<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            cache: Mutex::new(QueryCache::new()),
        }
    }

    /// 读：命中直接返回，未命中回源并缓存
    pub async fn get(&self, path: &str, query: &str) -> Result<Value> {
        {
            let cache = self.cache.lock().await;
            if let Some(value) = cache.get(path, query) {
                debug!("Cache hit: {} {}", path, query);
                return Ok(value.clone());
            }
        }
        let value = self.fetcher.fetch("GET", path, query, None).await?;
        self.cache.lock().await.insert(path, query, value.clone());
        Ok(value)
    }

    /// 写：成功后按资源族失效，保证下一次读取回源
    pub async fn mutate(&self, method: &str, path: &str, body: Option<&Value>) -> Result<Value> {
        let value = self.fetcher.fetch(method, path, "", body).await?;
        self.cache.lock().await.invalidate_for_mutation(path);
        Ok(value)
    }

    pub async fn invalidate_all(&self) {
        self.cache.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 计数取数器：每次回源计数加一
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    impl CountingFetcher {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl HttpFetch for CountingFetcher {
        async fn fetch(
            &self,
            _method: &str,
            path: &str,
            _query: &str,
            _body: Option<&Value>,
        ) -> Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "path": path, "fetch": n }))
        }
    }

    #[tokio::test]
    async fn repeated_reads_hit_the_cache() {
        let client = ApiClient::new(CountingFetcher::new());
        let first = client.get("/api/cases", "limit=50").await.unwrap();
        let second = client.get("/api/cases", "limit=50").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(client.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_queries_are_distinct_keys() {
        let client = ApiClient::new(CountingFetcher::new());
        client.get("/api/cases", "limit=50").await.unwrap();
        client.get("/api/cases", "limit=10").await.unwrap();
        assert_eq!(client.fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn mutation_forces_next_read_to_refetch() {
        let client = ApiClient::new(CountingFetcher::new());
        client.get("/api/cases", "").await.unwrap();
        client.get("/api/cases/stats", "").await.unwrap();
        client.get("/api/surgeons", "").await.unwrap();
        assert_eq!(client.fetcher.calls.load(Ordering::SeqCst), 3);

        client
            .mutate("POST", "/api/cases", Some(&json!({"anesthesiaType": "general"})))
            .await
            .unwrap();

        // 病例族与统计回源，外科医生仍命中缓存
        client.get("/api/cases", "").await.unwrap();
        client.get("/api/cases/stats", "").await.unwrap();
        client.get("/api/surgeons", "").await.unwrap();
        assert_eq!(client.fetcher.calls.load(Ordering::SeqCst), 6);
    }
}
