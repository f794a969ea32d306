//! 数据库模型
//!
//! `Db*` 为数据表行模型（FromRow），转换为核心领域模型；`New*`/`Update*`
//! 为写入模型，由HTTP层校验后构造。

use caselog_core::models::*;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ========== 行模型 ==========

/// 数据库用户表
#[derive(Debug, FromRow)]
pub struct DbUser {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: String, // 存储为字符串，转换为UserRole枚举
    pub specialty: Option<String>,
    pub license_number: Option<String>,
    pub institution: Option<String>,
    pub profile_image_url: Option<String>,
    pub is_active: bool,
    pub theme_preference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbUser> for User {
    fn from(row: DbUser) -> Self {
        User {
            id: row.id,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            role: UserRole::parse(&row.role).unwrap_or(UserRole::User),
            specialty: row.specialty,
            license_number: row.license_number,
            institution: row.institution,
            profile_image_url: row.profile_image_url,
            is_active: row.is_active,
            theme_preference: row.theme_preference,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
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

impl From<DbPatient> for Patient {
    fn from(row: DbPatient) -> Self {
        Patient {
            id: row.id,
            patient_id: row.patient_id,
            first_name: row.first_name,
            last_name: row.last_name,
            age: row.age,
            gender: row.gender,
            weight: row.weight,
            height: row.height,
            bmi: row.bmi,
            allergies: row.allergies,
            medical_history: row.medical_history,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 数据库外科医生表
#[derive(Debug, FromRow)]
pub struct DbSurgeon {
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

impl From<DbSurgeon> for Surgeon {
    fn from(row: DbSurgeon) -> Self {
        Surgeon {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            specialty: row.specialty,
            institution: row.institution,
            phone: row.phone,
            email: row.email,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 数据库手术目录表
#[derive(Debug, FromRow)]
pub struct DbProcedure {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbProcedure> for Procedure {
    fn from(row: DbProcedure) -> Self {
        Procedure {
            id: row.id,
            name: row.name,
            category: row.category,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

/// 数据库病例表
#[derive(Debug, FromRow)]
pub struct DbCase {
    pub id: i64,
    pub case_number: String,
    pub anesthesiologist_id: String,
    pub supervisor_id: Option<String>,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub surgeon_name: Option<String>,
    pub procedure_id: Option<i64>,
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
    pub status: String, // 存储为字符串，转换为CaseStatus枚举
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbCase> for Case {
    fn from(row: DbCase) -> Self {
        Case {
            id: row.id,
            case_number: row.case_number,
            anesthesiologist_id: row.anesthesiologist_id,
            supervisor_id: row.supervisor_id,
            patient_id: row.patient_id,
            patient_name: row.patient_name,
            surgeon_name: row.surgeon_name,
            procedure_id: row.procedure_id,
            // 手术摘要由读取路径按procedure_id二次查询后填充
            procedure: None,
            custom_procedure_name: row.custom_procedure_name,
            procedure_category: row.procedure_category,
            anesthesia_type: row.anesthesia_type,
            regional_block_type: row.regional_block_type,
            custom_regional_block: row.custom_regional_block,
            asa_score: row.asa_score,
            emergency_case: row.emergency_case,
            case_date: row.case_date,
            start_time: row.start_time,
            end_time: row.end_time,
            induction_time: row.induction_time,
            incision_time: row.incision_time,
            emergence_time: row.emergence_time,
            diagnosis: row.diagnosis,
            complications: row.complications,
            notes: row.notes,
            preop_medications: row.preop_medications,
            intraop_medications: row.intraop_medications,
            postop_medications: row.postop_medications,
            status: CaseStatus::parse(&row.status).unwrap_or(CaseStatus::InProgress),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 数据库病例模板表
#[derive(Debug, FromRow)]
pub struct DbCaseTemplate {
    pub id: i64,
    pub name: String,
    pub owner_id: String,
    pub is_public: bool,
    pub fields: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbCaseTemplate> for CaseTemplate {
    fn from(row: DbCaseTemplate) -> Self {
        CaseTemplate {
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            is_public: row.is_public,
            fields: row.fields,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 数据库病例照片表
#[derive(Debug, FromRow)]
pub struct DbCasePhoto {
    pub id: i64,
    pub case_id: i64,
    pub file_name: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<DbCasePhoto> for CasePhoto {
    fn from(row: DbCasePhoto) -> Self {
        CasePhoto {
            id: row.id,
            case_id: row.case_id,
            file_name: row.file_name,
            original_name: row.original_name,
            mime_type: row.mime_type,
            size_bytes: row.size_bytes,
            uploaded_by: row.uploaded_by,
            created_at: row.created_at,
        }
    }
}

/// 数据库用户偏好表
#[derive(Debug, FromRow)]
pub struct DbUserPreferences {
    pub user_id: String,
    pub default_anesthesia_type: Option<String>,
    pub email_notifications: bool,
    pub case_reminders: bool,
    pub export_format: String,
    pub updated_at: DateTime<Utc>,
}

impl From<DbUserPreferences> for UserPreferences {
    fn from(row: DbUserPreferences) -> Self {
        UserPreferences {
            user_id: row.user_id,
            default_anesthesia_type: row.default_anesthesia_type,
            email_notifications: row.email_notifications,
            case_reminders: row.case_reminders,
            export_format: row.export_format,
            updated_at: row.updated_at,
        }
    }
}

// ========== 写入模型 ==========

/// 认证回调携带的规范化声明（按subject做upsert）
#[derive(Debug, Clone)]
pub struct UpsertUser {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

/// 用户自助可改的档案字段
#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub specialty: Option<String>,
    pub license_number: Option<String>,
    pub institution: Option<String>,
    pub profile_image_url: Option<String>,
}

/// 管理员对用户的修改（角色与启用标记）
#[derive(Debug, Clone, Default)]
pub struct AdminUserUpdate {
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
}

/// 新患者插入模型
#[derive(Debug, Clone)]
pub struct NewPatient {
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
}

/// 患者部分更新模型
#[derive(Debug, Clone, Default)]
pub struct UpdatePatient {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub weight: Option<String>,
    pub height: Option<String>,
    pub bmi: Option<f64>,
    pub allergies: Option<String>,
    pub medical_history: Option<String>,
}

/// 新外科医生插入模型
#[derive(Debug, Clone)]
pub struct NewSurgeon {
    pub first_name: String,
    pub last_name: String,
    pub specialty: Option<String>,
    pub institution: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_by: String,
}

/// 外科医生部分更新模型
#[derive(Debug, Clone, Default)]
pub struct UpdateSurgeon {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub specialty: Option<String>,
    pub institution: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// 新手术目录条目（按name幂等upsert）
#[derive(Debug, Clone)]
pub struct NewProcedure {
    pub name: String,
    pub category: String,
    pub description: Option<String>,
}

/// 新病例插入模型
#[derive(Debug, Clone)]
pub struct NewCase {
    /// 省略时由存储层生成
    pub case_number: Option<String>,
    pub anesthesiologist_id: String,
    pub supervisor_id: Option<String>,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub surgeon_name: Option<String>,
    pub procedure_id: Option<i64>,
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
}

/// 病例部分更新模型（未提供的字段保持原值，末次写入生效）
#[derive(Debug, Clone, Default)]
pub struct UpdateCase {
    pub supervisor_id: Option<String>,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub surgeon_name: Option<String>,
    pub procedure_id: Option<i64>,
    pub custom_procedure_name: Option<String>,
    pub procedure_category: Option<String>,
    pub anesthesia_type: Option<String>,
    pub regional_block_type: Option<String>,
    pub custom_regional_block: Option<String>,
    pub asa_score: Option<String>,
    pub emergency_case: Option<bool>,
    pub case_date: Option<NaiveDate>,
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
    pub status: Option<CaseStatus>,
}

/// 病例列表过滤条件（归属用户之外的附加条件）
#[derive(Debug, Clone)]
pub struct CaseFilter {
    pub limit: i64,
    pub offset: i64,
    pub search: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl Default for CaseFilter {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
            search: None,
            start_date: None,
            end_date: None,
        }
    }
}

/// 新病例模板插入模型
#[derive(Debug, Clone)]
pub struct NewCaseTemplate {
    pub name: String,
    pub owner_id: String,
    pub is_public: bool,
    pub fields: serde_json::Value,
}

/// 新病例照片插入模型
#[derive(Debug, Clone)]
pub struct NewCasePhoto {
    pub case_id: i64,
    pub file_name: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub uploaded_by: String,
}

/// 用户偏好写入模型（整体PUT语义，缺省字段回落默认值）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutPreferences {
    pub default_anesthesia_type: Option<String>,
    pub email_notifications: Option<bool>,
    pub case_reminders: Option<bool>,
    pub export_format: Option<String>,
}
