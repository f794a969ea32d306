//! # Caselog客户端模块
//!
//! 提供面向API的HTTP客户端与按键查询缓存：GET结果以`(路径, 查询串)`为键
//! 缓存，任何变更请求按资源族失效相关键，保证变更后的下一次读取必然回源。

pub mod cache;
pub mod client;

pub use cache::QueryCache;
pub use client::{ApiClient, HttpFetch, ReqwestFetcher};
