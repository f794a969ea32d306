//! 内存存储实现
//!
//! 与`PgStorage`同一套`Storage`语义：用于单元测试，以及未配置数据库时的
//! 开发回退。数据不落盘，进程退出即丢失。

use crate::models::*;
use crate::queries::apply_case_update;
use crate::storage::Storage;
use async_trait::async_trait;
use caselog_core::utils::generate_case_number;
use caselog_core::{
    Case, CaselogError, CaseStats, CaseTemplate, CasePhoto, Patient, Procedure, ProcedureRef,
    Result, Surgeon, SystemStats, User, UserCaseCount, UserPreferences, UserRole,
};
use chrono::{Datelike, Local, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

fn month_start_local() -> NaiveDate {
    let today = Local::now().date_naive();
    today.with_day0(0).unwrap_or(today)
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, User>,
    patients: HashMap<i64, Patient>,
    surgeons: HashMap<i64, Surgeon>,
    procedures: HashMap<i64, Procedure>,
    cases: HashMap<i64, Case>,
    templates: HashMap<i64, CaseTemplate>,
    photos: HashMap<i64, CasePhoto>,
    preferences: HashMap<String, UserPreferences>,
}

/// 内存存储
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
    next_id: AtomicI64,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            next_id: AtomicI64::new(1),
        }
    }

    fn alloc_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn embed_procedure(state: &MemoryState, case: &mut Case) {
        case.procedure = case.procedure_id.and_then(|id| {
            state.procedures.get(&id).map(|p| ProcedureRef {
                id: p.id,
                name: p.name.clone(),
                category: p.category.clone(),
            })
        });
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    // ========== 用户 ==========

    async fn upsert_user(&self, user: &UpsertUser) -> Result<User> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let entry = state.users.entry(user.id.clone()).or_insert_with(|| User {
            id: user.id.clone(),
            email: None,
            first_name: None,
            last_name: None,
            role: UserRole::User,
            specialty: None,
            license_number: None,
            institution: None,
            profile_image_url: None,
            is_active: true,
            theme_preference: None,
            created_at: now,
            updated_at: now,
        });
        entry.email = user.email.clone();
        if user.first_name.is_some() {
            entry.first_name = user.first_name.clone();
        }
        if user.last_name.is_some() {
            entry.last_name = user.last_name.clone();
        }
        if user.profile_image_url.is_some() {
            entry.profile_image_url = user.profile_image_url.clone();
        }
        entry.updated_at = now;
        Ok(entry.clone())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn update_user(&self, id: &str, update: &UpdateUser) -> Result<Option<User>> {
        let mut state = self.state.write().await;
        let Some(user) = state.users.get_mut(id) else {
            return Ok(None);
        };
        if let Some(v) = &update.first_name {
            user.first_name = Some(v.clone());
        }
        if let Some(v) = &update.last_name {
            user.last_name = Some(v.clone());
        }
        if let Some(v) = &update.specialty {
            user.specialty = Some(v.clone());
        }
        if let Some(v) = &update.license_number {
            user.license_number = Some(v.clone());
        }
        if let Some(v) = &update.institution {
            user.institution = Some(v.clone());
        }
        if let Some(v) = &update.profile_image_url {
            user.profile_image_url = Some(v.clone());
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn update_theme(&self, id: &str, theme: &str) -> Result<Option<User>> {
        let mut state = self.state.write().await;
        let Some(user) = state.users.get_mut(id) else {
            return Ok(None);
        };
        user.theme_preference = Some(theme.to_string());
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn admin_update_user(&self, id: &str, update: &AdminUserUpdate) -> Result<Option<User>> {
        let mut state = self.state.write().await;
        let Some(user) = state.users.get_mut(id) else {
            return Ok(None);
        };
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(active) = update.is_active {
            user.is_active = active;
        }
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    // ========== 患者 ==========

    async fn list_patients(
        &self,
        owner: &str,
        limit: i64,
        search: Option<&str>,
    ) -> Result<Vec<Patient>> {
        let state = self.state.read().await;
        let mut patients: Vec<Patient> = state
            .patients
            .values()
            .filter(|p| p.created_by == owner)
            .filter(|p| match search {
                Some(term) => {
                    contains_ci(&p.first_name, term)
                        || p.last_name.as_deref().map(|n| contains_ci(n, term)).unwrap_or(false)
                        || contains_ci(&p.patient_id, term)
                }
                None => true,
            })
            .cloned()
            .collect();
        patients.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        patients.truncate(limit.max(0) as usize);
        Ok(patients)
    }

    async fn get_patient(&self, id: i64) -> Result<Option<Patient>> {
        Ok(self.state.read().await.patients.get(&id).cloned())
    }

    async fn get_patient_by_patient_id(&self, patient_id: &str) -> Result<Option<Patient>> {
        Ok(self
            .state
            .read()
            .await
            .patients
            .values()
            .find(|p| p.patient_id == patient_id)
            .cloned())
    }

    async fn create_patient(&self, patient: &NewPatient) -> Result<Patient> {
        let mut state = self.state.write().await;
        if state
            .patients
            .values()
            .any(|p| p.patient_id == patient.patient_id)
        {
            return Err(CaselogError::Validation(format!(
                "patient_id {} already exists",
                patient.patient_id
            )));
        }
        let now = Utc::now();
        let created = Patient {
            id: self.alloc_id(),
            patient_id: patient.patient_id.clone(),
            first_name: patient.first_name.clone(),
            last_name: patient.last_name.clone(),
            age: patient.age,
            gender: patient.gender.clone(),
            weight: patient.weight.clone(),
            height: patient.height.clone(),
            bmi: patient.bmi,
            allergies: patient.allergies.clone(),
            medical_history: patient.medical_history.clone(),
            created_by: patient.created_by.clone(),
            created_at: now,
            updated_at: now,
        };
        state.patients.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_patient(
        &self,
        id: i64,
        owner: &str,
        update: &UpdatePatient,
    ) -> Result<Option<Patient>> {
        let mut state = self.state.write().await;
        let Some(patient) = state
            .patients
            .get_mut(&id)
            .filter(|p| p.created_by == owner)
        else {
            return Ok(None);
        };
        if let Some(v) = &update.first_name {
            patient.first_name = v.clone();
        }
        if let Some(v) = &update.last_name {
            patient.last_name = Some(v.clone());
        }
        if let Some(v) = update.age {
            patient.age = Some(v);
        }
        if let Some(v) = &update.gender {
            patient.gender = Some(v.clone());
        }
        if let Some(v) = &update.weight {
            patient.weight = Some(v.clone());
        }
        if let Some(v) = &update.height {
            patient.height = Some(v.clone());
        }
        if let Some(v) = update.bmi {
            patient.bmi = Some(v);
        }
        if let Some(v) = &update.allergies {
            patient.allergies = Some(v.clone());
        }
        if let Some(v) = &update.medical_history {
            patient.medical_history = Some(v.clone());
        }
        patient.updated_at = Utc::now();
        Ok(Some(patient.clone()))
    }

    async fn delete_patient(&self, id: i64, owner: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let owned = state
            .patients
            .get(&id)
            .map(|p| p.created_by == owner)
            .unwrap_or(false);
        if owned {
            state.patients.remove(&id);
        }
        Ok(owned)
    }

    // ========== 外科医生 ==========

    async fn list_surgeons(&self, owner: &str) -> Result<Vec<Surgeon>> {
        let state = self.state.read().await;
        let mut surgeons: Vec<Surgeon> = state
            .surgeons
            .values()
            .filter(|s| s.created_by == owner)
            .cloned()
            .collect();
        surgeons.sort_by(|a, b| {
            (a.last_name.as_str(), a.first_name.as_str())
                .cmp(&(b.last_name.as_str(), b.first_name.as_str()))
        });
        Ok(surgeons)
    }

    async fn create_surgeon(&self, surgeon: &NewSurgeon) -> Result<Surgeon> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let created = Surgeon {
            id: self.alloc_id(),
            first_name: surgeon.first_name.clone(),
            last_name: surgeon.last_name.clone(),
            specialty: surgeon.specialty.clone(),
            institution: surgeon.institution.clone(),
            phone: surgeon.phone.clone(),
            email: surgeon.email.clone(),
            created_by: surgeon.created_by.clone(),
            created_at: now,
            updated_at: now,
        };
        state.surgeons.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_surgeon(
        &self,
        id: i64,
        owner: &str,
        update: &UpdateSurgeon,
    ) -> Result<Option<Surgeon>> {
        let mut state = self.state.write().await;
        let Some(surgeon) = state
            .surgeons
            .get_mut(&id)
            .filter(|s| s.created_by == owner)
        else {
            return Ok(None);
        };
        if let Some(v) = &update.first_name {
            surgeon.first_name = v.clone();
        }
        if let Some(v) = &update.last_name {
            surgeon.last_name = v.clone();
        }
        if let Some(v) = &update.specialty {
            surgeon.specialty = Some(v.clone());
        }
        if let Some(v) = &update.institution {
            surgeon.institution = Some(v.clone());
        }
        if let Some(v) = &update.phone {
            surgeon.phone = Some(v.clone());
        }
        if let Some(v) = &update.email {
            surgeon.email = Some(v.clone());
        }
        surgeon.updated_at = Utc::now();
        Ok(Some(surgeon.clone()))
    }

    async fn delete_surgeon(&self, id: i64, owner: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let owned = state
            .surgeons
            .get(&id)
            .map(|s| s.created_by == owner)
            .unwrap_or(false);
        if owned {
            state.surgeons.remove(&id);
        }
        Ok(owned)
    }

    // ========== 手术目录 ==========

    async fn list_procedures(&self, limit: i64) -> Result<Vec<Procedure>> {
        let state = self.state.read().await;
        let mut procedures: Vec<Procedure> = state.procedures.values().cloned().collect();
        procedures.sort_by(|a, b| {
            (a.category.as_str(), a.name.as_str()).cmp(&(b.category.as_str(), b.name.as_str()))
        });
        procedures.truncate(limit.max(0) as usize);
        Ok(procedures)
    }

    async fn get_procedure(&self, id: i64) -> Result<Option<Procedure>> {
        Ok(self.state.read().await.procedures.get(&id).cloned())
    }

    async fn create_procedure(&self, procedure: &NewProcedure) -> Result<Procedure> {
        let mut state = self.state.write().await;
        // upsert-by-name，与PostgreSQL的唯一约束语义一致
        if let Some(existing) = state
            .procedures
            .values_mut()
            .find(|p| p.name == procedure.name)
        {
            existing.category = procedure.category.clone();
            if procedure.description.is_some() {
                existing.description = procedure.description.clone();
            }
            return Ok(existing.clone());
        }
        let created = Procedure {
            id: self.alloc_id(),
            name: procedure.name.clone(),
            category: procedure.category.clone(),
            description: procedure.description.clone(),
            created_at: Utc::now(),
        };
        state.procedures.insert(created.id, created.clone());
        Ok(created)
    }

    // ========== 病例 ==========

    async fn list_cases(&self, owner: &str, filter: &CaseFilter) -> Result<Vec<Case>> {
        let state = self.state.read().await;
        let mut cases: Vec<Case> = state
            .cases
            .values()
            .filter(|c| c.anesthesiologist_id == owner)
            .filter(|c| match &filter.search {
                Some(term) => {
                    contains_ci(&c.case_number, term)
                        || c.patient_name.as_deref().map(|v| contains_ci(v, term)).unwrap_or(false)
                        || c.patient_id.as_deref().map(|v| contains_ci(v, term)).unwrap_or(false)
                        || c.surgeon_name.as_deref().map(|v| contains_ci(v, term)).unwrap_or(false)
                }
                None => true,
            })
            .filter(|c| filter.start_date.map(|d| c.case_date >= d).unwrap_or(true))
            .filter(|c| filter.end_date.map(|d| c.case_date <= d).unwrap_or(true))
            .cloned()
            .collect();
        cases.sort_by(|a, b| b.case_date.cmp(&a.case_date).then(b.id.cmp(&a.id)));

        let offset = filter.offset.max(0) as usize;
        let limit = filter.limit.max(0) as usize;
        let mut page: Vec<Case> = cases.into_iter().skip(offset).take(limit).collect();
        for case in page.iter_mut() {
            Self::embed_procedure(&state, case);
        }
        Ok(page)
    }

    async fn get_case(&self, id: i64) -> Result<Option<Case>> {
        let state = self.state.read().await;
        let mut case = state.cases.get(&id).cloned();
        if let Some(case) = case.as_mut() {
            Self::embed_procedure(&state, case);
        }
        Ok(case)
    }

    async fn create_case(&self, case: &NewCase) -> Result<Case> {
        let mut state = self.state.write().await;
        let case_number = case
            .case_number
            .clone()
            .unwrap_or_else(generate_case_number);
        if state.cases.values().any(|c| c.case_number == case_number) {
            return Err(CaselogError::Validation(format!(
                "case_number {} already exists",
                case_number
            )));
        }
        let now = Utc::now();
        let mut created = Case {
            id: self.alloc_id(),
            case_number,
            anesthesiologist_id: case.anesthesiologist_id.clone(),
            supervisor_id: case.supervisor_id.clone(),
            patient_id: case.patient_id.clone(),
            patient_name: case.patient_name.clone(),
            surgeon_name: case.surgeon_name.clone(),
            procedure_id: case.procedure_id,
            procedure: None,
            custom_procedure_name: case.custom_procedure_name.clone(),
            procedure_category: case.procedure_category.clone(),
            anesthesia_type: case.anesthesia_type.clone(),
            regional_block_type: case.regional_block_type.clone(),
            custom_regional_block: case.custom_regional_block.clone(),
            asa_score: case.asa_score.clone(),
            emergency_case: case.emergency_case,
            case_date: case.case_date,
            start_time: case.start_time,
            end_time: case.end_time,
            induction_time: case.induction_time,
            incision_time: case.incision_time,
            emergence_time: case.emergence_time,
            diagnosis: case.diagnosis.clone(),
            complications: case.complications.clone(),
            notes: case.notes.clone(),
            preop_medications: case.preop_medications.clone(),
            intraop_medications: case.intraop_medications.clone(),
            postop_medications: case.postop_medications.clone(),
            status: case.status,
            created_at: now,
            updated_at: now,
        };
        state.cases.insert(created.id, created.clone());
        Self::embed_procedure(&state, &mut created);
        Ok(created)
    }

    async fn update_case(
        &self,
        id: i64,
        owner: &str,
        update: &UpdateCase,
    ) -> Result<Option<Case>> {
        let mut state = self.state.write().await;
        let Some(case) = state
            .cases
            .get_mut(&id)
            .filter(|c| c.anesthesiologist_id == owner)
        else {
            return Ok(None);
        };
        apply_case_update(case, update);
        let mut updated = case.clone();
        Self::embed_procedure(&state, &mut updated);
        Ok(Some(updated))
    }

    async fn complete_case(&self, id: i64, owner: &str) -> Result<Option<Case>> {
        let mut state = self.state.write().await;
        let Some(case) = state
            .cases
            .get_mut(&id)
            .filter(|c| c.anesthesiologist_id == owner)
        else {
            return Ok(None);
        };
        // 无条件转移：重复调用覆盖end_time
        case.status = caselog_core::CaseStatus::Completed;
        case.end_time = Some(Utc::now());
        case.updated_at = Utc::now();
        let mut updated = case.clone();
        Self::embed_procedure(&state, &mut updated);
        Ok(Some(updated))
    }

    async fn delete_case(&self, id: i64, owner: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let owned = state
            .cases
            .get(&id)
            .map(|c| c.anesthesiologist_id == owner)
            .unwrap_or(false);
        if owned {
            // 不级联删除照片
            state.cases.remove(&id);
        }
        Ok(owned)
    }

    async fn get_case_stats(&self, owner: &str) -> Result<CaseStats> {
        let state = self.state.read().await;
        let month_start = month_start_local();

        let owned: Vec<&Case> = state
            .cases
            .values()
            .filter(|c| c.anesthesiologist_id == owner)
            .collect();

        let total_cases = owned.len() as i64;
        let cases_this_month = owned.iter().filter(|c| c.case_date >= month_start).count() as i64;

        let mut cases_by_type: HashMap<String, i64> = HashMap::new();
        for case in &owned {
            *cases_by_type.entry(case.anesthesia_type.clone()).or_insert(0) += 1;
        }

        let durations: Vec<f64> = owned
            .iter()
            .filter_map(|c| match (c.start_time, c.end_time) {
                (Some(start), Some(end)) => Some((end - start).num_seconds() as f64 / 60.0),
                _ => None,
            })
            .collect();
        let avg_duration_minutes = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        Ok(CaseStats {
            total_cases,
            cases_this_month,
            cases_by_type,
            avg_duration_minutes,
        })
    }

    // ========== 病例模板 ==========

    async fn list_templates(&self, owner: &str) -> Result<Vec<CaseTemplate>> {
        let state = self.state.read().await;
        let mut templates: Vec<CaseTemplate> = state
            .templates
            .values()
            .filter(|t| t.owner_id == owner || t.is_public)
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn create_template(&self, template: &NewCaseTemplate) -> Result<CaseTemplate> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let created = CaseTemplate {
            id: self.alloc_id(),
            name: template.name.clone(),
            owner_id: template.owner_id.clone(),
            is_public: template.is_public,
            fields: template.fields.clone(),
            created_at: now,
            updated_at: now,
        };
        state.templates.insert(created.id, created.clone());
        Ok(created)
    }

    async fn delete_template(&self, id: i64, owner: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let owned = state
            .templates
            .get(&id)
            .map(|t| t.owner_id == owner)
            .unwrap_or(false);
        if owned {
            state.templates.remove(&id);
        }
        Ok(owned)
    }

    // ========== 病例照片 ==========

    async fn create_case_photo(&self, photo: &NewCasePhoto) -> Result<CasePhoto> {
        let mut state = self.state.write().await;
        if !state.cases.contains_key(&photo.case_id) {
            return Err(CaselogError::Validation(format!(
                "case {} does not exist",
                photo.case_id
            )));
        }
        let created = CasePhoto {
            id: self.alloc_id(),
            case_id: photo.case_id,
            file_name: photo.file_name.clone(),
            original_name: photo.original_name.clone(),
            mime_type: photo.mime_type.clone(),
            size_bytes: photo.size_bytes,
            uploaded_by: photo.uploaded_by.clone(),
            created_at: Utc::now(),
        };
        state.photos.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_case_photos(&self, case_id: i64) -> Result<Vec<CasePhoto>> {
        let state = self.state.read().await;
        let mut photos: Vec<CasePhoto> = state
            .photos
            .values()
            .filter(|p| p.case_id == case_id)
            .cloned()
            .collect();
        photos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(photos)
    }

    async fn get_photo(&self, id: i64) -> Result<Option<CasePhoto>> {
        Ok(self.state.read().await.photos.get(&id).cloned())
    }

    async fn delete_case_photo(&self, id: i64) -> Result<bool> {
        Ok(self.state.write().await.photos.remove(&id).is_some())
    }

    // ========== 用户偏好 ==========

    async fn get_preferences(&self, user_id: &str) -> Result<UserPreferences> {
        let state = self.state.read().await;
        Ok(state
            .preferences
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserPreferences::default_for(user_id)))
    }

    async fn put_preferences(
        &self,
        user_id: &str,
        prefs: &PutPreferences,
    ) -> Result<UserPreferences> {
        let mut state = self.state.write().await;
        let stored = UserPreferences {
            user_id: user_id.to_string(),
            default_anesthesia_type: prefs.default_anesthesia_type.clone(),
            email_notifications: prefs.email_notifications.unwrap_or(true),
            case_reminders: prefs.case_reminders.unwrap_or(true),
            export_format: prefs.export_format.clone().unwrap_or_else(|| "csv".to_string()),
            updated_at: Utc::now(),
        };
        state.preferences.insert(user_id.to_string(), stored.clone());
        Ok(stored)
    }

    // ========== 管理端聚合 ==========

    async fn user_case_counts(&self) -> Result<Vec<UserCaseCount>> {
        let state = self.state.read().await;
        let month_start = month_start_local();
        let mut counts: Vec<UserCaseCount> = state
            .users
            .values()
            .map(|user| {
                let owned: Vec<&Case> = state
                    .cases
                    .values()
                    .filter(|c| c.anesthesiologist_id == user.id)
                    .collect();
                UserCaseCount {
                    user_id: user.id.clone(),
                    email: user.email.clone(),
                    first_name: user.first_name.clone(),
                    last_name: user.last_name.clone(),
                    total_cases: owned.len() as i64,
                    cases_this_month: owned
                        .iter()
                        .filter(|c| c.case_date >= month_start)
                        .count() as i64,
                }
            })
            .collect();
        counts.sort_by(|a, b| b.total_cases.cmp(&a.total_cases));
        Ok(counts)
    }

    async fn system_stats(&self) -> Result<SystemStats> {
        let state = self.state.read().await;
        Ok(SystemStats {
            total_users: state.users.len() as i64,
            active_users: state.users.values().filter(|u| u.is_active).count() as i64,
            total_cases: state.cases.len() as i64,
            total_patients: state.patients.len() as i64,
            total_procedures: state.procedures.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caselog_core::CaseStatus;
    use chrono::Duration;

    fn new_case(owner: &str, date: NaiveDate) -> NewCase {
        NewCase {
            case_number: None,
            anesthesiologist_id: owner.to_string(),
            supervisor_id: None,
            patient_id: None,
            patient_name: None,
            surgeon_name: None,
            procedure_id: None,
            custom_procedure_name: None,
            procedure_category: None,
            anesthesia_type: "General anesthesia".to_string(),
            regional_block_type: None,
            custom_regional_block: None,
            asa_score: None,
            emergency_case: false,
            case_date: date,
            start_time: None,
            end_time: None,
            induction_time: None,
            incision_time: None,
            emergence_time: None,
            diagnosis: None,
            complications: None,
            notes: None,
            preop_medications: None,
            intraop_medications: None,
            postop_medications: None,
            status: CaseStatus::InProgress,
        }
    }

    fn new_patient(owner: &str, patient_id: &str) -> NewPatient {
        NewPatient {
            patient_id: patient_id.to_string(),
            first_name: "Jane".to_string(),
            last_name: Some("Doe".to_string()),
            age: Some(42),
            gender: None,
            weight: Some("60".to_string()),
            height: Some("170".to_string()),
            bmi: Some(20.8),
            allergies: None,
            medical_history: None,
            created_by: owner.to_string(),
        }
    }

    fn today() -> NaiveDate {
        Local::now().date_naive()
    }

    #[tokio::test]
    async fn ownership_isolation_for_cases_and_patients() {
        let storage = MemoryStorage::new();
        storage.create_case(&new_case("alice", today())).await.unwrap();
        storage.create_case(&new_case("bob", today())).await.unwrap();
        storage.create_patient(&new_patient("alice", "PT-100")).await.unwrap();

        let alice_cases = storage.list_cases("alice", &CaseFilter::default()).await.unwrap();
        let bob_cases = storage.list_cases("bob", &CaseFilter::default()).await.unwrap();
        assert_eq!(alice_cases.len(), 1);
        assert_eq!(bob_cases.len(), 1);
        assert!(alice_cases.iter().all(|c| c.anesthesiologist_id == "alice"));

        let bob_patients = storage.list_patients("bob", 50, None).await.unwrap();
        assert!(bob_patients.is_empty());

        let bob_stats = storage.get_case_stats("bob").await.unwrap();
        assert_eq!(bob_stats.total_cases, 1);
    }

    #[tokio::test]
    async fn generated_case_numbers_are_unique_and_well_formed() {
        let storage = MemoryStorage::new();
        let a = storage.create_case(&new_case("u", today())).await.unwrap();
        let b = storage.create_case(&new_case("u", today())).await.unwrap();
        assert_ne!(a.case_number, b.case_number);
        assert!(caselog_core::utils::is_valid_case_number(&a.case_number));
    }

    #[tokio::test]
    async fn explicit_duplicate_case_number_is_rejected() {
        let storage = MemoryStorage::new();
        let mut case = new_case("u", today());
        case.case_number = Some("CASE-1-abc123".to_string());
        storage.create_case(&case).await.unwrap();
        let err = storage.create_case(&case).await.unwrap_err();
        assert!(matches!(err, CaselogError::Validation(_)));
    }

    #[tokio::test]
    async fn complete_case_is_unconditional_and_overwrites() {
        let storage = MemoryStorage::new();
        let case = storage.create_case(&new_case("u", today())).await.unwrap();
        assert_eq!(case.status, CaseStatus::InProgress);

        let completed = storage.complete_case(case.id, "u").await.unwrap().unwrap();
        assert_eq!(completed.status, CaseStatus::Completed);
        let first_end = completed.end_time.unwrap();

        // 第二次调用仍成功，end_time刷新为更晚的时刻
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let again = storage.complete_case(case.id, "u").await.unwrap().unwrap();
        assert_eq!(again.status, CaseStatus::Completed);
        assert!(again.end_time.unwrap() >= first_end);

        // 非归属用户走不到这条转移
        assert!(storage.complete_case(case.id, "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn case_reads_embed_procedure_summary() {
        let storage = MemoryStorage::new();
        let procedure = storage
            .create_procedure(&NewProcedure {
                name: "Laparoscopic cholecystectomy".to_string(),
                category: "General Surgery".to_string(),
                description: None,
            })
            .await
            .unwrap();

        let mut with_ref = new_case("u", today());
        with_ref.procedure_id = Some(procedure.id);
        let created = storage.create_case(&with_ref).await.unwrap();
        let fetched = storage.get_case(created.id).await.unwrap().unwrap();
        let embedded = fetched.procedure.unwrap();
        assert_eq!(embedded.name, "Laparoscopic cholecystectomy");
        assert_eq!(embedded.category, "General Surgery");

        let mut custom = new_case("u", today());
        custom.custom_procedure_name = Some("Rare bespoke operation".to_string());
        let created = storage.create_case(&custom).await.unwrap();
        let fetched = storage.get_case(created.id).await.unwrap().unwrap();
        assert!(fetched.procedure.is_none());
        assert_eq!(
            fetched.custom_procedure_name.as_deref(),
            Some("Rare bespoke operation")
        );
    }

    #[tokio::test]
    async fn procedure_seeding_is_idempotent_by_name() {
        let storage = MemoryStorage::new();
        let p1 = storage
            .create_procedure(&NewProcedure {
                name: "Appendectomy".to_string(),
                category: "General Surgery".to_string(),
                description: None,
            })
            .await
            .unwrap();
        let p2 = storage
            .create_procedure(&NewProcedure {
                name: "Appendectomy".to_string(),
                category: "General Surgery".to_string(),
                description: Some("Open or laparoscopic".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(p1.id, p2.id);
        assert_eq!(storage.list_procedures(100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_patient_id_is_rejected() {
        let storage = MemoryStorage::new();
        storage.create_patient(&new_patient("u", "PT-001")).await.unwrap();
        let err = storage
            .create_patient(&new_patient("u", "PT-001"))
            .await
            .unwrap_err();
        assert!(matches!(err, CaselogError::Validation(_)));
    }

    #[tokio::test]
    async fn patient_update_merges_latest_demographics() {
        let storage = MemoryStorage::new();
        let patient = storage.create_patient(&new_patient("u", "PT-001")).await.unwrap();
        let updated = storage
            .update_patient(
                patient.id,
                "u",
                &UpdatePatient {
                    weight: Some("65".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.weight.as_deref(), Some("65"));
        // 未提供的字段保持原值
        assert_eq!(updated.height.as_deref(), Some("170"));
    }

    #[tokio::test]
    async fn stats_average_duration_and_month_boundary() {
        let storage = MemoryStorage::new();
        let start = Utc::now();

        let mut timed = new_case("u", today());
        timed.start_time = Some(start);
        timed.end_time = Some(start + Duration::minutes(90));
        storage.create_case(&timed).await.unwrap();

        let mut timed2 = new_case("u", today());
        timed2.anesthesia_type = "Regional anesthesia".to_string();
        timed2.start_time = Some(start);
        timed2.end_time = Some(start + Duration::minutes(30));
        storage.create_case(&timed2).await.unwrap();

        // 上个月的病例不计入本月，也不影响平均（无起止时间）
        let last_month = today() - Duration::days(40);
        storage.create_case(&new_case("u", last_month)).await.unwrap();

        let stats = storage.get_case_stats("u").await.unwrap();
        assert_eq!(stats.total_cases, 3);
        assert_eq!(stats.cases_this_month, 2);
        assert!((stats.avg_duration_minutes - 60.0).abs() < 1e-9);
        assert_eq!(stats.cases_by_type.get("General anesthesia"), Some(&2));
        assert_eq!(stats.cases_by_type.get("Regional anesthesia"), Some(&1));
    }

    #[tokio::test]
    async fn photos_survive_case_deletion() {
        let storage = MemoryStorage::new();
        let case = storage.create_case(&new_case("u", today())).await.unwrap();
        storage
            .create_case_photo(&NewCasePhoto {
                case_id: case.id,
                file_name: "case-1-abcd.jpg".to_string(),
                original_name: "wound.jpg".to_string(),
                mime_type: "image/jpeg".to_string(),
                size_bytes: 1024,
                uploaded_by: "u".to_string(),
            })
            .await
            .unwrap();

        assert!(storage.delete_case(case.id, "u").await.unwrap());
        // 无级联：照片记录保留
        assert_eq!(storage.list_case_photos(case.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn photo_requires_existing_case() {
        let storage = MemoryStorage::new();
        let err = storage
            .create_case_photo(&NewCasePhoto {
                case_id: 9999,
                file_name: "case-x.jpg".to_string(),
                original_name: "x.jpg".to_string(),
                mime_type: "image/jpeg".to_string(),
                size_bytes: 1,
                uploaded_by: "u".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CaselogError::Validation(_)));
    }

    #[tokio::test]
    async fn upsert_user_defaults_and_admin_update() {
        let storage = MemoryStorage::new();
        let user = storage
            .upsert_user(&UpsertUser {
                id: "sub-1".to_string(),
                email: Some("doc@example.org".to_string()),
                first_name: Some("Ada".to_string()),
                last_name: None,
                profile_image_url: None,
            })
            .await
            .unwrap();
        assert_eq!(user.role, UserRole::User);
        assert!(user.is_active);

        let promoted = storage
            .admin_update_user(
                "sub-1",
                &AdminUserUpdate {
                    role: Some(UserRole::Admin),
                    is_active: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(promoted.role, UserRole::Admin);

        // 再次upsert不回退角色
        let again = storage
            .upsert_user(&UpsertUser {
                id: "sub-1".to_string(),
                email: Some("doc@example.org".to_string()),
                first_name: None,
                last_name: None,
                profile_image_url: None,
            })
            .await
            .unwrap();
        assert_eq!(again.role, UserRole::Admin);
        assert_eq!(again.first_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn preferences_default_until_put() {
        let storage = MemoryStorage::new();
        let prefs = storage.get_preferences("u").await.unwrap();
        assert_eq!(prefs.export_format, "csv");
        assert!(prefs.email_notifications);

        let stored = storage
            .put_preferences(
                "u",
                &PutPreferences {
                    default_anesthesia_type: Some("Regional anesthesia".to_string()),
                    email_notifications: Some(false),
                    case_reminders: None,
                    export_format: Some("json".to_string()),
                },
            )
            .await
            .unwrap();
        assert!(!stored.email_notifications);
        assert!(stored.case_reminders);
        assert_eq!(stored.export_format, "json");

        let reread = storage.get_preferences("u").await.unwrap();
        assert_eq!(
            reread.default_anesthesia_type.as_deref(),
            Some("Regional anesthesia")
        );
    }

    #[tokio::test]
    async fn case_search_and_date_window() {
        let storage = MemoryStorage::new();
        let mut named = new_case("u", today());
        named.patient_name = Some("Jane Doe".to_string());
        named.surgeon_name = Some("Dr. Smith".to_string());
        storage.create_case(&named).await.unwrap();
        storage.create_case(&new_case("u", today() - Duration::days(10))).await.unwrap();

        let filter = CaseFilter {
            search: Some("jane".to_string()),
            ..Default::default()
        };
        let hits = storage.list_cases("u", &filter).await.unwrap();
        assert_eq!(hits.len(), 1);

        let window = CaseFilter {
            start_date: Some(today() - Duration::days(3)),
            ..Default::default()
        };
        let recent = storage.list_cases("u", &window).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn templates_visible_to_owner_and_public() {
        let storage = MemoryStorage::new();
        storage
            .create_template(&NewCaseTemplate {
                name: "My defaults".to_string(),
                owner_id: "alice".to_string(),
                is_public: false,
                fields: serde_json::json!({"anesthesiaType": "General anesthesia"}),
            })
            .await
            .unwrap();
        storage
            .create_template(&NewCaseTemplate {
                name: "Shared defaults".to_string(),
                owner_id: "bob".to_string(),
                is_public: true,
                fields: serde_json::json!({}),
            })
            .await
            .unwrap();

        let alice_view = storage.list_templates("alice").await.unwrap();
        assert_eq!(alice_view.len(), 2);
        let carol_view = storage.list_templates("carol").await.unwrap();
        assert_eq!(carol_view.len(), 1);
    }
}
