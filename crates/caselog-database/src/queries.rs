//! PostgreSQL存储实现

use crate::connection::DatabasePool;
use crate::models::*;
use crate::storage::Storage;
use async_trait::async_trait;
use caselog_core::utils::generate_case_number;
use caselog_core::{
    Case, CaselogError, CaseStats, CaseTemplate, CasePhoto, Patient, Procedure, ProcedureRef,
    Result, Surgeon, SystemStats, User, UserCaseCount, UserPreferences,
};
use chrono::{Datelike, Local, NaiveDate, Utc};
use sqlx::Row;
use std::collections::HashMap;

fn db_err(e: sqlx::Error) -> CaselogError {
    CaselogError::Database(e.to_string())
}

/// 本地日历月起始日（统计口径：服务器本地时区）
fn month_start_local() -> NaiveDate {
    let today = Local::now().date_naive();
    today.with_day0(0).unwrap_or(today)
}

/// PostgreSQL存储
#[derive(Clone)]
pub struct PgStorage {
    pool: DatabasePool,
}

impl PgStorage {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 用户表：id为身份提供方subject
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT,
                first_name TEXT,
                last_name TEXT,
                role VARCHAR(16) NOT NULL DEFAULT 'user',
                specialty TEXT,
                license_number TEXT,
                institution TEXT,
                profile_image_url TEXT,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                theme_preference VARCHAR(16),
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(db_err)?;

        // 患者表：patient_id为系统级唯一的自然键
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS patients (
                id BIGSERIAL PRIMARY KEY,
                patient_id VARCHAR(64) UNIQUE NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT,
                age INTEGER,
                gender VARCHAR(32),
                weight VARCHAR(16),
                height VARCHAR(16),
                bmi DOUBLE PRECISION,
                allergies TEXT,
                medical_history TEXT,
                created_by TEXT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(db_err)?;

        // 外科医生表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS surgeons (
                id BIGSERIAL PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                specialty TEXT,
                institution TEXT,
                phone VARCHAR(32),
                email TEXT,
                created_by TEXT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(db_err)?;

        // 手术目录表：name唯一，播种幂等
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS procedures (
                id BIGSERIAL PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                category VARCHAR(64) NOT NULL,
                description TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(db_err)?;

        // 病例表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS cases (
                id BIGSERIAL PRIMARY KEY,
                case_number VARCHAR(64) UNIQUE NOT NULL,
                anesthesiologist_id TEXT NOT NULL,
                supervisor_id TEXT,
                patient_id VARCHAR(64),
                patient_name TEXT,
                surgeon_name TEXT,
                procedure_id BIGINT,
                custom_procedure_name TEXT,
                procedure_category VARCHAR(64),
                anesthesia_type TEXT NOT NULL,
                regional_block_type TEXT,
                custom_regional_block TEXT,
                asa_score VARCHAR(8),
                emergency_case BOOLEAN NOT NULL DEFAULT FALSE,
                case_date DATE NOT NULL,
                start_time TIMESTAMP WITH TIME ZONE,
                end_time TIMESTAMP WITH TIME ZONE,
                induction_time TIMESTAMP WITH TIME ZONE,
                incision_time TIMESTAMP WITH TIME ZONE,
                emergence_time TIMESTAMP WITH TIME ZONE,
                diagnosis TEXT,
                complications TEXT,
                notes TEXT,
                preop_medications TEXT,
                intraop_medications TEXT,
                postop_medications TEXT,
                status VARCHAR(20) NOT NULL DEFAULT 'in_progress',
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(db_err)?;

        // 病例模板表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS case_templates (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                is_public BOOLEAN NOT NULL DEFAULT FALSE,
                fields JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(db_err)?;

        // 病例照片表：case_id不设外键，病例删除后照片记录保留
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS case_photos (
                id BIGSERIAL PRIMARY KEY,
                case_id BIGINT NOT NULL,
                file_name VARCHAR(128) UNIQUE NOT NULL,
                original_name TEXT NOT NULL,
                mime_type VARCHAR(64) NOT NULL,
                size_bytes BIGINT NOT NULL,
                uploaded_by TEXT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(db_err)?;

        // 用户偏好表
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS user_preferences (
                user_id TEXT PRIMARY KEY,
                default_anesthesia_type TEXT,
                email_notifications BOOLEAN NOT NULL DEFAULT TRUE,
                case_reminders BOOLEAN NOT NULL DEFAULT TRUE,
                export_format VARCHAR(16) NOT NULL DEFAULT 'csv',
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#).execute(pool).await.map_err(db_err)?;

        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_patients_created_by ON patients(created_by)",
            "CREATE INDEX IF NOT EXISTS idx_patients_patient_id ON patients(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_surgeons_created_by ON surgeons(created_by)",
            "CREATE INDEX IF NOT EXISTS idx_cases_anesthesiologist ON cases(anesthesiologist_id)",
            "CREATE INDEX IF NOT EXISTS idx_cases_case_number ON cases(case_number)",
            "CREATE INDEX IF NOT EXISTS idx_cases_case_date ON cases(case_date)",
            "CREATE INDEX IF NOT EXISTS idx_cases_status ON cases(status)",
            "CREATE INDEX IF NOT EXISTS idx_case_photos_case_id ON case_photos(case_id)",
            "CREATE INDEX IF NOT EXISTS idx_case_templates_owner ON case_templates(owner_id)",
            "CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await.map_err(db_err)?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }

    /// 为一批病例内嵌手术摘要（读取时反规范化）
    async fn attach_procedures(&self, cases: &mut [Case]) -> Result<()> {
        let mut ids: Vec<i64> = cases.iter().filter_map(|c| c.procedure_id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(());
        }

        let pool = self.pool.pool();
        let rows = sqlx::query_as::<_, DbProcedure>(
            "SELECT * FROM procedures WHERE id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;

        let by_id: HashMap<i64, Procedure> =
            rows.into_iter().map(Procedure::from).map(|p| (p.id, p)).collect();

        for case in cases.iter_mut() {
            case.procedure = case.procedure_id.and_then(|id| {
                by_id.get(&id).map(|p| ProcedureRef {
                    id: p.id,
                    name: p.name.clone(),
                    category: p.category.clone(),
                })
            });
        }
        Ok(())
    }

    async fn persist_case_update(&self, merged: &Case) -> Result<DbCase> {
        let pool = self.pool.pool();
        sqlx::query_as::<_, DbCase>(r#"
            UPDATE cases SET
                supervisor_id = $2, patient_id = $3, patient_name = $4, surgeon_name = $5,
                procedure_id = $6, custom_procedure_name = $7, procedure_category = $8,
                anesthesia_type = $9, regional_block_type = $10, custom_regional_block = $11,
                asa_score = $12, emergency_case = $13, case_date = $14,
                start_time = $15, end_time = $16, induction_time = $17,
                incision_time = $18, emergence_time = $19,
                diagnosis = $20, complications = $21, notes = $22,
                preop_medications = $23, intraop_medications = $24, postop_medications = $25,
                status = $26, updated_at = NOW()
            WHERE id = $1
            RETURNING *
        "#)
        .bind(merged.id)
        .bind(&merged.supervisor_id)
        .bind(&merged.patient_id)
        .bind(&merged.patient_name)
        .bind(&merged.surgeon_name)
        .bind(merged.procedure_id)
        .bind(&merged.custom_procedure_name)
        .bind(&merged.procedure_category)
        .bind(&merged.anesthesia_type)
        .bind(&merged.regional_block_type)
        .bind(&merged.custom_regional_block)
        .bind(&merged.asa_score)
        .bind(merged.emergency_case)
        .bind(merged.case_date)
        .bind(merged.start_time)
        .bind(merged.end_time)
        .bind(merged.induction_time)
        .bind(merged.incision_time)
        .bind(merged.emergence_time)
        .bind(&merged.diagnosis)
        .bind(&merged.complications)
        .bind(&merged.notes)
        .bind(&merged.preop_medications)
        .bind(&merged.intraop_medications)
        .bind(&merged.postop_medications)
        .bind(merged.status.to_string())
        .fetch_one(pool)
        .await
        .map_err(db_err)
    }
}

#[async_trait]
impl Storage for PgStorage {
    // ========== 用户 ==========

    async fn upsert_user(&self, user: &UpsertUser) -> Result<User> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbUser>(r#"
            INSERT INTO users (id, email, first_name, last_name, profile_image_url)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                first_name = COALESCE(EXCLUDED.first_name, users.first_name),
                last_name = COALESCE(EXCLUDED.last_name, users.last_name),
                profile_image_url = COALESCE(EXCLUDED.profile_image_url, users.profile_image_url),
                updated_at = NOW()
            RETURNING *
        "#)
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.profile_image_url)
        .fetch_one(pool)
        .await
        .map_err(db_err)?;

        Ok(User::from(row))
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(User::from))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(User::from))
    }

    async fn update_user(&self, id: &str, update: &UpdateUser) -> Result<Option<User>> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbUser>(r#"
            UPDATE users SET
                first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                specialty = COALESCE($4, specialty),
                license_number = COALESCE($5, license_number),
                institution = COALESCE($6, institution),
                profile_image_url = COALESCE($7, profile_image_url),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
        "#)
        .bind(id)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.specialty)
        .bind(&update.license_number)
        .bind(&update.institution)
        .bind(&update.profile_image_url)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(User::from))
    }

    async fn update_theme(&self, id: &str, theme: &str) -> Result<Option<User>> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbUser>(
            "UPDATE users SET theme_preference = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(theme)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(User::from))
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let pool = self.pool.pool();
        let rows = sqlx::query_as::<_, DbUser>("SELECT * FROM users ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn admin_update_user(&self, id: &str, update: &AdminUserUpdate) -> Result<Option<User>> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbUser>(r#"
            UPDATE users SET
                role = COALESCE($2, role),
                is_active = COALESCE($3, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
        "#)
        .bind(id)
        .bind(update.role.map(|r| r.to_string()))
        .bind(update.is_active)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(User::from))
    }

    // ========== 患者 ==========

    async fn list_patients(
        &self,
        owner: &str,
        limit: i64,
        search: Option<&str>,
    ) -> Result<Vec<Patient>> {
        let pool = self.pool.pool();
        let rows = sqlx::query_as::<_, DbPatient>(r#"
            SELECT * FROM patients
            WHERE created_by = $1
              AND ($2::text IS NULL
                   OR first_name ILIKE '%' || $2 || '%'
                   OR last_name ILIKE '%' || $2 || '%'
                   OR patient_id ILIKE '%' || $2 || '%')
            ORDER BY updated_at DESC
            LIMIT $3
        "#)
        .bind(owner)
        .bind(search)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Patient::from).collect())
    }

    async fn get_patient(&self, id: i64) -> Result<Option<Patient>> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Patient::from))
    }

    async fn get_patient_by_patient_id(&self, patient_id: &str) -> Result<Option<Patient>> {
        let pool = self.pool.pool();
        let row =
            sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE patient_id = $1")
                .bind(patient_id)
                .fetch_optional(pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(Patient::from))
    }

    async fn create_patient(&self, patient: &NewPatient) -> Result<Patient> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbPatient>(r#"
            INSERT INTO patients (patient_id, first_name, last_name, age, gender, weight,
                                  height, bmi, allergies, medical_history, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
        "#)
        .bind(&patient.patient_id)
        .bind(&patient.first_name)
        .bind(&patient.last_name)
        .bind(patient.age)
        .bind(&patient.gender)
        .bind(&patient.weight)
        .bind(&patient.height)
        .bind(patient.bmi)
        .bind(&patient.allergies)
        .bind(&patient.medical_history)
        .bind(&patient.created_by)
        .fetch_one(pool)
        .await
        .map_err(db_err)?;
        Ok(Patient::from(row))
    }

    async fn update_patient(
        &self,
        id: i64,
        owner: &str,
        update: &UpdatePatient,
    ) -> Result<Option<Patient>> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbPatient>(r#"
            UPDATE patients SET
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                age = COALESCE($5, age),
                gender = COALESCE($6, gender),
                weight = COALESCE($7, weight),
                height = COALESCE($8, height),
                bmi = COALESCE($9, bmi),
                allergies = COALESCE($10, allergies),
                medical_history = COALESCE($11, medical_history),
                updated_at = NOW()
            WHERE id = $1 AND created_by = $2
            RETURNING *
        "#)
        .bind(id)
        .bind(owner)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(update.age)
        .bind(&update.gender)
        .bind(&update.weight)
        .bind(&update.height)
        .bind(update.bmi)
        .bind(&update.allergies)
        .bind(&update.medical_history)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Patient::from))
    }

    async fn delete_patient(&self, id: i64, owner: &str) -> Result<bool> {
        let pool = self.pool.pool();
        let result = sqlx::query("DELETE FROM patients WHERE id = $1 AND created_by = $2")
            .bind(id)
            .bind(owner)
            .execute(pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    // ========== 外科医生 ==========

    async fn list_surgeons(&self, owner: &str) -> Result<Vec<Surgeon>> {
        let pool = self.pool.pool();
        let rows = sqlx::query_as::<_, DbSurgeon>(
            "SELECT * FROM surgeons WHERE created_by = $1 ORDER BY last_name, first_name",
        )
        .bind(owner)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Surgeon::from).collect())
    }

    async fn create_surgeon(&self, surgeon: &NewSurgeon) -> Result<Surgeon> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbSurgeon>(r#"
            INSERT INTO surgeons (first_name, last_name, specialty, institution, phone, email, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
        "#)
        .bind(&surgeon.first_name)
        .bind(&surgeon.last_name)
        .bind(&surgeon.specialty)
        .bind(&surgeon.institution)
        .bind(&surgeon.phone)
        .bind(&surgeon.email)
        .bind(&surgeon.created_by)
        .fetch_one(pool)
        .await
        .map_err(db_err)?;
        Ok(Surgeon::from(row))
    }

    async fn update_surgeon(
        &self,
        id: i64,
        owner: &str,
        update: &UpdateSurgeon,
    ) -> Result<Option<Surgeon>> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbSurgeon>(r#"
            UPDATE surgeons SET
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                specialty = COALESCE($5, specialty),
                institution = COALESCE($6, institution),
                phone = COALESCE($7, phone),
                email = COALESCE($8, email),
                updated_at = NOW()
            WHERE id = $1 AND created_by = $2
            RETURNING *
        "#)
        .bind(id)
        .bind(owner)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.specialty)
        .bind(&update.institution)
        .bind(&update.phone)
        .bind(&update.email)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Surgeon::from))
    }

    async fn delete_surgeon(&self, id: i64, owner: &str) -> Result<bool> {
        let pool = self.pool.pool();
        let result = sqlx::query("DELETE FROM surgeons WHERE id = $1 AND created_by = $2")
            .bind(id)
            .bind(owner)
            .execute(pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    // ========== 手术目录 ==========

    async fn list_procedures(&self, limit: i64) -> Result<Vec<Procedure>> {
        let pool = self.pool.pool();
        let rows = sqlx::query_as::<_, DbProcedure>(
            "SELECT * FROM procedures ORDER BY category, name LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Procedure::from).collect())
    }

    async fn get_procedure(&self, id: i64) -> Result<Option<Procedure>> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbProcedure>("SELECT * FROM procedures WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Procedure::from))
    }

    async fn create_procedure(&self, procedure: &NewProcedure) -> Result<Procedure> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbProcedure>(r#"
            INSERT INTO procedures (name, category, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET
                category = EXCLUDED.category,
                description = COALESCE(EXCLUDED.description, procedures.description)
            RETURNING *
        "#)
        .bind(&procedure.name)
        .bind(&procedure.category)
        .bind(&procedure.description)
        .fetch_one(pool)
        .await
        .map_err(db_err)?;
        Ok(Procedure::from(row))
    }

    // ========== 病例 ==========

    async fn list_cases(&self, owner: &str, filter: &CaseFilter) -> Result<Vec<Case>> {
        let pool = self.pool.pool();
        let rows = sqlx::query_as::<_, DbCase>(r#"
            SELECT * FROM cases
            WHERE anesthesiologist_id = $1
              AND ($2::text IS NULL
                   OR case_number ILIKE '%' || $2 || '%'
                   OR patient_name ILIKE '%' || $2 || '%'
                   OR patient_id ILIKE '%' || $2 || '%'
                   OR surgeon_name ILIKE '%' || $2 || '%')
              AND ($3::date IS NULL OR case_date >= $3)
              AND ($4::date IS NULL OR case_date <= $4)
            ORDER BY case_date DESC, id DESC
            LIMIT $5 OFFSET $6
        "#)
        .bind(owner)
        .bind(filter.search.as_deref())
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;

        let mut cases: Vec<Case> = rows.into_iter().map(Case::from).collect();
        self.attach_procedures(&mut cases).await?;
        Ok(cases)
    }

    async fn get_case(&self, id: i64) -> Result<Option<Case>> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbCase>("SELECT * FROM cases WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(db_case) => {
                let mut cases = vec![Case::from(db_case)];
                self.attach_procedures(&mut cases).await?;
                Ok(cases.pop())
            }
            None => Ok(None),
        }
    }

    async fn create_case(&self, case: &NewCase) -> Result<Case> {
        let pool = self.pool.pool();
        let case_number = case
            .case_number
            .clone()
            .unwrap_or_else(generate_case_number);

        let row = sqlx::query_as::<_, DbCase>(r#"
            INSERT INTO cases (case_number, anesthesiologist_id, supervisor_id, patient_id,
                               patient_name, surgeon_name, procedure_id, custom_procedure_name,
                               procedure_category, anesthesia_type, regional_block_type,
                               custom_regional_block, asa_score, emergency_case, case_date,
                               start_time, end_time, induction_time, incision_time, emergence_time,
                               diagnosis, complications, notes, preop_medications,
                               intraop_medications, postop_medications, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)
            RETURNING *
        "#)
        .bind(&case_number)
        .bind(&case.anesthesiologist_id)
        .bind(&case.supervisor_id)
        .bind(&case.patient_id)
        .bind(&case.patient_name)
        .bind(&case.surgeon_name)
        .bind(case.procedure_id)
        .bind(&case.custom_procedure_name)
        .bind(&case.procedure_category)
        .bind(&case.anesthesia_type)
        .bind(&case.regional_block_type)
        .bind(&case.custom_regional_block)
        .bind(&case.asa_score)
        .bind(case.emergency_case)
        .bind(case.case_date)
        .bind(case.start_time)
        .bind(case.end_time)
        .bind(case.induction_time)
        .bind(case.incision_time)
        .bind(case.emergence_time)
        .bind(&case.diagnosis)
        .bind(&case.complications)
        .bind(&case.notes)
        .bind(&case.preop_medications)
        .bind(&case.intraop_medications)
        .bind(&case.postop_medications)
        .bind(case.status.to_string())
        .fetch_one(pool)
        .await
        .map_err(db_err)?;

        let mut cases = vec![Case::from(row)];
        self.attach_procedures(&mut cases).await?;
        cases
            .pop()
            .ok_or_else(|| CaselogError::Internal("case insert returned no row".to_string()))
    }

    async fn update_case(
        &self,
        id: i64,
        owner: &str,
        update: &UpdateCase,
    ) -> Result<Option<Case>> {
        let pool = self.pool.pool();
        // 先读后写：取回现值在内存合并，整行覆盖（末次写入生效）
        let existing = sqlx::query_as::<_, DbCase>(
            "SELECT * FROM cases WHERE id = $1 AND anesthesiologist_id = $2",
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;

        let Some(existing) = existing else {
            return Ok(None);
        };
        let mut merged = Case::from(existing);
        apply_case_update(&mut merged, update);

        let row = self.persist_case_update(&merged).await?;
        let mut cases = vec![Case::from(row)];
        self.attach_procedures(&mut cases).await?;
        Ok(cases.pop())
    }

    async fn complete_case(&self, id: i64, owner: &str) -> Result<Option<Case>> {
        let pool = self.pool.pool();
        // 无条件转移：不检查当前状态，重复调用刷新end_time
        let row = sqlx::query_as::<_, DbCase>(r#"
            UPDATE cases SET status = 'completed', end_time = NOW(), updated_at = NOW()
            WHERE id = $1 AND anesthesiologist_id = $2
            RETURNING *
        "#)
        .bind(id)
        .bind(owner)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(db_case) => {
                let mut cases = vec![Case::from(db_case)];
                self.attach_procedures(&mut cases).await?;
                Ok(cases.pop())
            }
            None => Ok(None),
        }
    }

    async fn delete_case(&self, id: i64, owner: &str) -> Result<bool> {
        let pool = self.pool.pool();
        // 不级联删除照片：记录与磁盘文件保留
        let result = sqlx::query("DELETE FROM cases WHERE id = $1 AND anesthesiologist_id = $2")
            .bind(id)
            .bind(owner)
            .execute(pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_case_stats(&self, owner: &str) -> Result<CaseStats> {
        let pool = self.pool.pool();
        let month_start = month_start_local();

        let total_cases: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cases WHERE anesthesiologist_id = $1")
                .bind(owner)
                .fetch_one(pool)
                .await
                .map_err(db_err)?;

        let cases_this_month: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cases WHERE anesthesiologist_id = $1 AND case_date >= $2",
        )
        .bind(owner)
        .bind(month_start)
        .fetch_one(pool)
        .await
        .map_err(db_err)?;

        let type_rows = sqlx::query(
            "SELECT anesthesia_type, COUNT(*) AS n FROM cases WHERE anesthesiologist_id = $1 GROUP BY anesthesia_type",
        )
        .bind(owner)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;

        let mut cases_by_type = HashMap::new();
        for row in type_rows {
            let anesthesia_type: String = row.get("anesthesia_type");
            let n: i64 = row.get("n");
            cases_by_type.insert(anesthesia_type, n);
        }

        // 平均时长：仅统计起止时间齐全的病例，单位分钟
        let avg_duration: Option<f64> = sqlx::query_scalar(r#"
            SELECT AVG(EXTRACT(EPOCH FROM (end_time - start_time)) / 60.0)::double precision
            FROM cases
            WHERE anesthesiologist_id = $1 AND start_time IS NOT NULL AND end_time IS NOT NULL
        "#)
        .bind(owner)
        .fetch_one(pool)
        .await
        .map_err(db_err)?;

        Ok(CaseStats {
            total_cases,
            cases_this_month,
            cases_by_type,
            avg_duration_minutes: avg_duration.unwrap_or(0.0),
        })
    }

    // ========== 病例模板 ==========

    async fn list_templates(&self, owner: &str) -> Result<Vec<CaseTemplate>> {
        let pool = self.pool.pool();
        let rows = sqlx::query_as::<_, DbCaseTemplate>(
            "SELECT * FROM case_templates WHERE owner_id = $1 OR is_public ORDER BY name",
        )
        .bind(owner)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(CaseTemplate::from).collect())
    }

    async fn create_template(&self, template: &NewCaseTemplate) -> Result<CaseTemplate> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbCaseTemplate>(r#"
            INSERT INTO case_templates (name, owner_id, is_public, fields)
            VALUES ($1, $2, $3, $4)
            RETURNING *
        "#)
        .bind(&template.name)
        .bind(&template.owner_id)
        .bind(template.is_public)
        .bind(&template.fields)
        .fetch_one(pool)
        .await
        .map_err(db_err)?;
        Ok(CaseTemplate::from(row))
    }

    async fn delete_template(&self, id: i64, owner: &str) -> Result<bool> {
        let pool = self.pool.pool();
        let result = sqlx::query("DELETE FROM case_templates WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner)
            .execute(pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    // ========== 病例照片 ==========

    async fn create_case_photo(&self, photo: &NewCasePhoto) -> Result<CasePhoto> {
        let pool = self.pool.pool();

        // 创建时要求父病例存在；无外键约束，后续病例删除不影响已有照片
        let case_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM cases WHERE id = $1)")
                .bind(photo.case_id)
                .fetch_one(pool)
                .await
                .map_err(db_err)?;
        if !case_exists {
            return Err(CaselogError::Validation(format!(
                "case {} does not exist",
                photo.case_id
            )));
        }

        let row = sqlx::query_as::<_, DbCasePhoto>(r#"
            INSERT INTO case_photos (case_id, file_name, original_name, mime_type, size_bytes, uploaded_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
        "#)
        .bind(photo.case_id)
        .bind(&photo.file_name)
        .bind(&photo.original_name)
        .bind(&photo.mime_type)
        .bind(photo.size_bytes)
        .bind(&photo.uploaded_by)
        .fetch_one(pool)
        .await
        .map_err(db_err)?;
        Ok(CasePhoto::from(row))
    }

    async fn list_case_photos(&self, case_id: i64) -> Result<Vec<CasePhoto>> {
        let pool = self.pool.pool();
        let rows = sqlx::query_as::<_, DbCasePhoto>(
            "SELECT * FROM case_photos WHERE case_id = $1 ORDER BY created_at",
        )
        .bind(case_id)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(CasePhoto::from).collect())
    }

    async fn get_photo(&self, id: i64) -> Result<Option<CasePhoto>> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbCasePhoto>("SELECT * FROM case_photos WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(CasePhoto::from))
    }

    async fn delete_case_photo(&self, id: i64) -> Result<bool> {
        let pool = self.pool.pool();
        let result = sqlx::query("DELETE FROM case_photos WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    // ========== 用户偏好 ==========

    async fn get_preferences(&self, user_id: &str) -> Result<UserPreferences> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbUserPreferences>(
            "SELECT * FROM user_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(db_err)?;
        Ok(row
            .map(UserPreferences::from)
            .unwrap_or_else(|| UserPreferences::default_for(user_id)))
    }

    async fn put_preferences(
        &self,
        user_id: &str,
        prefs: &PutPreferences,
    ) -> Result<UserPreferences> {
        let pool = self.pool.pool();
        let row = sqlx::query_as::<_, DbUserPreferences>(r#"
            INSERT INTO user_preferences (user_id, default_anesthesia_type, email_notifications,
                                          case_reminders, export_format, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                default_anesthesia_type = EXCLUDED.default_anesthesia_type,
                email_notifications = EXCLUDED.email_notifications,
                case_reminders = EXCLUDED.case_reminders,
                export_format = EXCLUDED.export_format,
                updated_at = NOW()
            RETURNING *
        "#)
        .bind(user_id)
        .bind(&prefs.default_anesthesia_type)
        .bind(prefs.email_notifications.unwrap_or(true))
        .bind(prefs.case_reminders.unwrap_or(true))
        .bind(prefs.export_format.as_deref().unwrap_or("csv"))
        .fetch_one(pool)
        .await
        .map_err(db_err)?;
        Ok(UserPreferences::from(row))
    }

    // ========== 管理端聚合 ==========

    async fn user_case_counts(&self) -> Result<Vec<UserCaseCount>> {
        let pool = self.pool.pool();
        let month_start = month_start_local();
        let rows = sqlx::query(r#"
            SELECT u.id, u.email, u.first_name, u.last_name,
                   COUNT(c.id) AS total_cases,
                   COUNT(c.id) FILTER (WHERE c.case_date >= $1) AS cases_this_month
            FROM users u
            LEFT JOIN cases c ON c.anesthesiologist_id = u.id
            GROUP BY u.id, u.email, u.first_name, u.last_name
            ORDER BY total_cases DESC
        "#)
        .bind(month_start)
        .fetch_all(pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|row| UserCaseCount {
                user_id: row.get("id"),
                email: row.get("email"),
                first_name: row.get("first_name"),
                last_name: row.get("last_name"),
                total_cases: row.get("total_cases"),
                cases_this_month: row.get("cases_this_month"),
            })
            .collect())
    }

    async fn system_stats(&self) -> Result<SystemStats> {
        let pool = self.pool.pool();

        let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(pool)
            .await
            .map_err(db_err)?;
        let active_users: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active")
                .fetch_one(pool)
                .await
                .map_err(db_err)?;
        let total_cases: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cases")
            .fetch_one(pool)
            .await
            .map_err(db_err)?;
        let total_patients: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patients")
            .fetch_one(pool)
            .await
            .map_err(db_err)?;
        let total_procedures: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM procedures")
            .fetch_one(pool)
            .await
            .map_err(db_err)?;

        Ok(SystemStats {
            total_users,
            active_users,
            total_cases,
            total_patients,
            total_procedures,
        })
    }
}

/// 将部分更新合并进现有病例（Some字段覆盖，None保持原值）
pub(crate) fn apply_case_update(case: &mut Case, update: &UpdateCase) {
    if let Some(v) = &update.supervisor_id {
        case.supervisor_id = Some(v.clone());
    }
    if let Some(v) = &update.patient_id {
        case.patient_id = Some(v.clone());
    }
    if let Some(v) = &update.patient_name {
        case.patient_name = Some(v.clone());
    }
    if let Some(v) = &update.surgeon_name {
        case.surgeon_name = Some(v.clone());
    }
    if let Some(v) = update.procedure_id {
        case.procedure_id = Some(v);
    }
    if let Some(v) = &update.custom_procedure_name {
        case.custom_procedure_name = Some(v.clone());
    }
    if let Some(v) = &update.procedure_category {
        case.procedure_category = Some(v.clone());
    }
    if let Some(v) = &update.anesthesia_type {
        case.anesthesia_type = v.clone();
    }
    if let Some(v) = &update.regional_block_type {
        case.regional_block_type = Some(v.clone());
    }
    if let Some(v) = &update.custom_regional_block {
        case.custom_regional_block = Some(v.clone());
    }
    if let Some(v) = &update.asa_score {
        case.asa_score = Some(v.clone());
    }
    if let Some(v) = update.emergency_case {
        case.emergency_case = v;
    }
    if let Some(v) = update.case_date {
        case.case_date = v;
    }
    if let Some(v) = update.start_time {
        case.start_time = Some(v);
    }
    if let Some(v) = update.end_time {
        case.end_time = Some(v);
    }
    if let Some(v) = update.induction_time {
        case.induction_time = Some(v);
    }
    if let Some(v) = update.incision_time {
        case.incision_time = Some(v);
    }
    if let Some(v) = update.emergence_time {
        case.emergence_time = Some(v);
    }
    if let Some(v) = &update.diagnosis {
        case.diagnosis = Some(v.clone());
    }
    if let Some(v) = &update.complications {
        case.complications = Some(v.clone());
    }
    if let Some(v) = &update.notes {
        case.notes = Some(v.clone());
    }
    if let Some(v) = &update.preop_medications {
        case.preop_medications = Some(v.clone());
    }
    if let Some(v) = &update.intraop_medications {
        case.intraop_medications = Some(v.clone());
    }
    if let Some(v) = &update.postop_medications {
        case.postop_medications = Some(v.clone());
    }
    if let Some(v) = update.status {
        case.status = v;
    }
    case.updated_at = Utc::now();
}
