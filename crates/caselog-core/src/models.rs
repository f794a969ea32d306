//! 核心数据模型定义
//!
//! 所有实体的对外序列化采用camelCase，与既有客户端的API形状保持一致。

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 手术类别目录（固定清单，"Other" 兜底）
pub const PROCEDURE_CATEGORIES: &[&str] = &[
    "General Surgery",
    "Orthopedic Surgery",
    "Cardiothoracic Surgery",
    "Neurosurgery",
    "Obstetrics & Gynecology",
    "Urology",
    "ENT (Otolaryngology)",
    "Ophthalmology",
    "Plastic Surgery",
    "Vascular Surgery",
    "Pediatric Surgery",
    "Other",
];

/// 用户角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::User => write!(f, "user"),
            UserRole::Admin => write!(f, "admin"),
        }
    }
}

impl UserRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(UserRole::User),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

/// 用户信息
///
/// `id` 为身份提供方下发的subject字符串，首次认证回调时惰性插入。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: UserRole,
    pub specialty: Option<String>,
    pub license_number: Option<String>,
    pub institution: Option<String>,
    pub profile_image_url: Option<String>,
    pub is_active: bool,
    pub theme_preference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 患者信息
///
/// `patient_id` 为人工录入的院内标识，系统级唯一；病例写入按此键做upsert。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: i64,
    pub patient_id: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub weight: Option<String>,
    pub height: Option<String>,
    pub bmi: Option<f64>,
    pub allergies: Option<String>,
    pub medical_history: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 外科医生信息
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Surgeon {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub specialty: Option<String>,
    pub institution: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 手术目录条目（全局，不归属于单个用户）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Procedure {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 病例读取时内嵌的手术摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureRef {
    pub id: i64,
    pub name: String,
    pub category: String,
}

/// 病例状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    InProgress,
    Completed,
    Cancelled,
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseStatus::InProgress => write!(f, "in_progress"),
            CaseStatus::Completed => write!(f, "completed"),
            CaseStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl CaseStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(CaseStatus::InProgress),
            "completed" => Some(CaseStatus::Completed),
            "cancelled" => Some(CaseStatus::Cancelled),
            _ => None,
        }
    }
}

/// 病例记录
///
/// `anesthesiologist_id` 为唯一的归属/授权键；所有按用户范围的查询据此过滤。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: i64,
    pub case_number: String,
    pub anesthesiologist_id: String,
    pub supervisor_id: Option<String>,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub surgeon_name: Option<String>,
    pub procedure_id: Option<i64>,
    /// 读取时按 `procedure_id` 二次查询内嵌，目录缺失或未引用时为None
    pub procedure: Option<ProcedureRef>,
    pub custom_procedure_name: Option<String>,
    pub procedure_category: Option<String>,
    pub anesthesia_type: String,
    pub regional_block_type: Option<String>,
    pub custom_regional_block: Option<String>,
    pub asa_score: Option<String>,
    pub emergency_case: bool,
    pub case_date: NaiveDate,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub induction_time: Option<DateTime<Utc>>,
    pub incision_time: Option<DateTime<Utc>>,
    pub emergence_time: Option<DateTime<Utc>>,
    pub diagnosis: Option<String>,
    pub complications: Option<String>,
    pub notes: Option<String>,
    pub preop_medications: Option<String>,
    pub intraop_medications: Option<String>,
    pub postop_medications: Option<String>,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 病例模板（可归属单个用户，亦可标记为公共）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseTemplate {
    pub id: i64,
    pub name: String,
    pub owner_id: String,
    pub is_public: bool,
    /// 模板默认字段集合，结构由客户端决定
    pub fields: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 病例照片元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CasePhoto {
    pub id: i64,
    pub case_id: i64,
    pub file_name: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
}

/// 每用户一份的偏好设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    pub user_id: String,
    pub default_anesthesia_type: Option<String>,
    pub email_notifications: bool,
    pub case_reminders: bool,
    pub export_format: String,
    pub updated_at: DateTime<Utc>,
}

impl UserPreferences {
    pub fn default_for(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            default_anesthesia_type: None,
            email_notifications: true,
            case_reminders: true,
            export_format: "csv".to_string(),
            updated_at: Utc::now(),
        }
    }
}

/// 单用户病例统计
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseStats {
    pub total_cases: i64,
    pub cases_this_month: i64,
    pub cases_by_type: HashMap<String, i64>,
    #[serde(rename = "avgDuration")]
    pub avg_duration_minutes: f64,
}

/// 管理端按用户的病例量统计
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCaseCount {
    pub user_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub total_cases: i64,
    pub cases_this_month: i64,
}

/// 管理端系统级统计
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub total_users: i64,
    pub active_users: i64,
    pub total_cases: i64,
    pub total_patients: i64,
    pub total_procedures: i64,
}
