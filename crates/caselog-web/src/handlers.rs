//! HTTP处理器
//!
//! 校验先于持久化：请求体先收集字段级错误，全部通过后才落库。病例创建是
//! 一个saga：病例为主写入，患者upsert与照片记录为尽力而为的从属写入，
//! 失败只记日志不回滚主写入。

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::{auth::Claims, uploads};
use axum::{
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{header, StatusCode},
    Extension, Json,
};
use caselog_admin::{run_setup, SetupReport};
use caselog_core::utils::calculate_bmi;
use caselog_core::{
    Case, CaseStats, CaseStatus, CaseTemplate, CaselogError, FieldError, Patient, Procedure,
    Surgeon, UserPreferences, PROCEDURE_CATEGORIES,
};
use caselog_database::{
    CaseFilter, NewCase, NewCasePhoto, NewCaseTemplate, NewPatient, NewProcedure, NewSurgeon,
    PutPreferences, UpdateCase, UpdatePatient, UpdateSurgeon,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

fn parse_date(field: &str, value: &str, errors: &mut Vec<FieldError>) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            errors.push(FieldError::new(field, "expected date in YYYY-MM-DD format"));
            None
        }
    }
}

fn parse_timestamp(
    field: &str,
    value: &Option<String>,
    errors: &mut Vec<FieldError>,
) -> Option<DateTime<Utc>> {
    let value = value.as_deref()?.trim();
    if value.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(value) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(_) => {
            errors.push(FieldError::new(field, "expected an RFC 3339 timestamp"));
            None
        }
    }
}

fn required(field: &str, value: &Option<String>, errors: &mut Vec<FieldError>) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => {
            errors.push(FieldError::new(field, "is required"));
            String::new()
        }
    }
}

fn reject_if_invalid(errors: Vec<FieldError>) -> ApiResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError(CaselogError::Invalid(errors)))
    }
}

// ========== 患者 ==========

#[derive(Debug, Deserialize)]
pub struct PatientListQuery {
    pub limit: Option<i64>,
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatientRequest {
    pub patient_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub weight: Option<String>,
    pub height: Option<String>,
    pub allergies: Option<String>,
    pub medical_history: Option<String>,
}

pub async fn list_patients(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PatientListQuery>,
) -> ApiResult<Json<Vec<Patient>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let patients = state
        .storage
        .list_patients(&claims.sub, limit, query.search.as_deref())
        .await?;
    Ok(Json(patients))
}

pub async fn get_patient(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Patient>> {
    let patient = state
        .storage
        .get_patient(id)
        .await?
        .filter(|p| p.created_by == claims.sub)
        .ok_or_else(|| CaselogError::NotFound("Patient not found".to_string()))?;
    Ok(Json(patient))
}

pub async fn create_patient(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<PatientRequest>,
) -> ApiResult<(StatusCode, Json<Patient>)> {
    let mut errors = Vec::new();
    let patient_id = required("patientId", &body.patient_id, &mut errors);
    let first_name = required("firstName", &body.first_name, &mut errors);
    reject_if_invalid(errors)?;

    let bmi = match (&body.weight, &body.height) {
        (Some(w), Some(h)) => calculate_bmi(w, h),
        _ => None,
    };
    let patient = state
        .storage
        .create_patient(&NewPatient {
            patient_id,
            first_name,
            last_name: body.last_name,
            age: body.age,
            gender: body.gender,
            weight: body.weight,
            height: body.height,
            bmi,
            allergies: body.allergies,
            medical_history: body.medical_history,
            created_by: claims.sub,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(patient)))
}

pub async fn update_patient(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(body): Json<PatientRequest>,
) -> ApiResult<Json<Patient>> {
    let existing = state
        .storage
        .get_patient(id)
        .await?
        .filter(|p| p.created_by == claims.sub)
        .ok_or_else(|| CaselogError::NotFound("Patient not found".to_string()))?;

    // 体重或身高变化时按合并后的值重算BMI
    let weight = body.weight.clone().or(existing.weight);
    let height = body.height.clone().or(existing.height);
    let bmi = match (&weight, &height) {
        (Some(w), Some(h)) => calculate_bmi(w, h),
        _ => None,
    };
    let patient = state
        .storage
        .update_patient(
            id,
            &claims.sub,
            &UpdatePatient {
                first_name: body.first_name,
                last_name: body.last_name,
                age: body.age,
                gender: body.gender,
                weight: body.weight,
                height: body.height,
                bmi,
                allergies: body.allergies,
                medical_history: body.medical_history,
            },
        )
        .await?
        .ok_or_else(|| CaselogError::NotFound("Patient not found".to_string()))?;
    Ok(Json(patient))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.storage.delete_patient(id, &claims.sub).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(CaselogError::NotFound(
            "Patient not found".to_string(),
        )))
    }
}

// ========== 外科医生 ==========

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SurgeonRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub specialty: Option<String>,
    pub institution: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

pub async fn list_surgeons(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Surgeon>>> {
    Ok(Json(state.storage.list_surgeons(&claims.sub).await?))
}

pub async fn create_surgeon(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<SurgeonRequest>,
) -> ApiResult<(StatusCode, Json<Surgeon>)> {
    let mut errors = Vec::new();
    let first_name = required("firstName", &body.first_name, &mut errors);
    let last_name = required("lastName", &body.last_name, &mut errors);
    reject_if_invalid(errors)?;

    let surgeon = state
        .storage
        .create_surgeon(&NewSurgeon {
            first_name,
            last_name,
            specialty: body.specialty,
            institution: body.institution,
            phone: body.phone,
            email: body.email,
            created_by: claims.sub,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(surgeon)))
}

pub async fn update_surgeon(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(body): Json<SurgeonRequest>,
) -> ApiResult<Json<Surgeon>> {
    let surgeon = state
        .storage
        .update_surgeon(
            id,
            &claims.sub,
            &UpdateSurgeon {
                first_name: body.first_name,
                last_name: body.last_name,
                specialty: body.specialty,
                institution: body.institution,
                phone: body.phone,
                email: body.email,
            },
        )
        .await?
        .ok_or_else(|| CaselogError::NotFound("Surgeon not found".to_string()))?;
    Ok(Json(surgeon))
}

pub async fn delete_surgeon(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.storage.delete_surgeon(id, &claims.sub).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(CaselogError::NotFound(
            "Surgeon not found".to_string(),
        )))
    }
}

// ========== 手术目录 ==========

#[derive(Debug, Deserialize)]
pub struct ProcedureListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcedureRequest {
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
}

pub async fn list_procedures(
    State(state): State<AppState>,
    Query(query): Query<ProcedureListQuery>,
) -> ApiResult<Json<Vec<Procedure>>> {
    let limit = query.limit.unwrap_or(200).clamp(1, 1000);
    Ok(Json(state.storage.list_procedures(limit).await?))
}

pub async fn create_procedure(
    State(state): State<AppState>,
    Json(body): Json<ProcedureRequest>,
) -> ApiResult<(StatusCode, Json<Procedure>)> {
    let mut errors = Vec::new();
    let name = required("name", &body.name, &mut errors);
    let category = required("category", &body.category, &mut errors);
    if !category.is_empty() && !PROCEDURE_CATEGORIES.contains(&category.as_str()) {
        errors.push(FieldError::new("category", "unknown procedure category"));
    }
    reject_if_invalid(errors)?;

    let procedure = state
        .storage
        .create_procedure(&NewProcedure {
            name,
            category,
            description: body.description,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(procedure)))
}

// ========== 病例 ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// 病例创建/更新请求体。病例字段之外还携带患者人口学字段，
/// 用于按patientId的患者upsert从属写入。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaseRequest {
    pub case_number: Option<String>,
    pub supervisor_id: Option<String>,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub weight: Option<String>,
    pub height: Option<String>,
    pub allergies: Option<String>,
    pub medical_history: Option<String>,
    pub surgeon_name: Option<String>,
    pub procedure_id: Option<i64>,
    pub custom_procedure_name: Option<String>,
    pub procedure_category: Option<String>,
    pub anesthesia_type: Option<String>,
    pub regional_block_type: Option<String>,
    pub custom_regional_block: Option<String>,
    pub asa_score: Option<String>,
    pub emergency_case: Option<bool>,
    pub case_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub induction_time: Option<String>,
    pub incision_time: Option<String>,
    pub emergence_time: Option<String>,
    pub diagnosis: Option<String>,
    pub complications: Option<String>,
    pub notes: Option<String>,
    pub preop_medications: Option<String>,
    pub intraop_medications: Option<String>,
    pub postop_medications: Option<String>,
    pub status: Option<String>,
}

impl CaseRequest {
    fn into_new_case(self, owner: &str) -> ApiResult<(NewCase, PatientDemographics)> {
        let mut errors = Vec::new();
        let anesthesia_type = required("anesthesiaType", &self.anesthesia_type, &mut errors);
        let case_date = match self.case_date.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => parse_date("caseDate", raw, &mut errors),
            _ => {
                errors.push(FieldError::new("caseDate", "is required"));
                None
            }
        };
        let status = match self.status.as_deref() {
            None => CaseStatus::InProgress,
            Some(raw) => CaseStatus::parse(raw).unwrap_or_else(|| {
                errors.push(FieldError::new("status", "unknown case status"));
                CaseStatus::InProgress
            }),
        };
        let start_time = parse_timestamp("startTime", &self.start_time, &mut errors);
        let end_time = parse_timestamp("endTime", &self.end_time, &mut errors);
        let induction_time = parse_timestamp("inductionTime", &self.induction_time, &mut errors);
        let incision_time = parse_timestamp("incisionTime", &self.incision_time, &mut errors);
        let emergence_time = parse_timestamp("emergenceTime", &self.emergence_time, &mut errors);
        reject_if_invalid(errors)?;

        let demographics = PatientDemographics {
            patient_id: self.patient_id.clone(),
            patient_name: self.patient_name.clone(),
            age: self.age,
            gender: self.gender,
            weight: self.weight,
            height: self.height,
            allergies: self.allergies,
            medical_history: self.medical_history,
        };
        let case = NewCase {
            case_number: self.case_number,
            anesthesiologist_id: owner.to_string(),
            supervisor_id: self.supervisor_id,
            patient_id: self.patient_id,
            patient_name: self.patient_name,
            surgeon_name: self.surgeon_name,
            procedure_id: self.procedure_id,
            custom_procedure_name: self.custom_procedure_name,
            procedure_category: self.procedure_category,
            anesthesia_type,
            regional_block_type: self.regional_block_type,
            custom_regional_block: self.custom_regional_block,
            asa_score: self.asa_score,
            emergency_case: self.emergency_case.unwrap_or(false),
            case_date: case_date.unwrap_or_default(),
            start_time,
            end_time,
            induction_time,
            incision_time,
            emergence_time,
            diagnosis: self.diagnosis,
            complications: self.complications,
            notes: self.notes,
            preop_medications: self.preop_medications,
            intraop_medications: self.intraop_medications,
            postop_medications: self.postop_medications,
            status,
        };
        Ok((case, demographics))
    }

    fn into_update(self) -> ApiResult<(UpdateCase, PatientDemographics)> {
        let mut errors = Vec::new();
        let case_date = match self.case_date.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => parse_date("caseDate", raw, &mut errors),
            _ => None,
        };
        let status = match self.status.as_deref() {
            None => None,
            Some(raw) => match CaseStatus::parse(raw) {
                Some(status) => Some(status),
                None => {
                    errors.push(FieldError::new("status", "unknown case status"));
                    None
                }
            },
        };
        let start_time = parse_timestamp("startTime", &self.start_time, &mut errors);
        let end_time = parse_timestamp("endTime", &self.end_time, &mut errors);
        let induction_time = parse_timestamp("inductionTime", &self.induction_time, &mut errors);
        let incision_time = parse_timestamp("incisionTime", &self.incision_time, &mut errors);
        let emergence_time = parse_timestamp("emergenceTime", &self.emergence_time, &mut errors);
        reject_if_invalid(errors)?;

        let demographics = PatientDemographics {
            patient_id: self.patient_id.clone(),
            patient_name: self.patient_name.clone(),
            age: self.age,
            gender: self.gender,
            weight: self.weight,
            height: self.height,
            allergies: self.allergies,
            medical_history: self.medical_history,
        };
        let update = UpdateCase {
            supervisor_id: self.supervisor_id,
            patient_id: self.patient_id,
            patient_name: self.patient_name,
            surgeon_name: self.surgeon_name,
            procedure_id: self.procedure_id,
            custom_procedure_name: self.custom_procedure_name,
            procedure_category: self.procedure_category,
            anesthesia_type: self.anesthesia_type,
            regional_block_type: self.regional_block_type,
            custom_regional_block: self.custom_regional_block,
            asa_score: self.asa_score,
            emergency_case: self.emergency_case,
            case_date,
            start_time,
            end_time,
            induction_time,
            incision_time,
            emergence_time,
            diagnosis: self.diagnosis,
            complications: self.complications,
            notes: self.notes,
            preop_medications: self.preop_medications,
            intraop_medications: self.intraop_medications,
            postop_medications: self.postop_medications,
            status,
        };
        Ok((update, demographics))
    }
}

/// 病例请求上随行的患者字段
#[derive(Debug, Clone)]
struct PatientDemographics {
    patient_id: Option<String>,
    patient_name: Option<String>,
    age: Option<i32>,
    gender: Option<String>,
    weight: Option<String>,
    height: Option<String>,
    allergies: Option<String>,
    medical_history: Option<String>,
}

/// 按patientId的患者upsert从属写入。失败只记日志：病例主写入已成功，
/// 不向调用方暴露从属写入的错误。
async fn sync_patient_from_case(state: &AppState, owner: &str, demo: &PatientDemographics) {
    let Some(patient_id) = demo.patient_id.as_deref().map(str::trim) else {
        return;
    };
    if patient_id.is_empty() {
        return;
    }

    let result = upsert_patient(state, owner, patient_id, demo).await;
    if let Err(e) = result {
        warn!("Patient sync for {} failed: {}", patient_id, e);
    }
}

async fn upsert_patient(
    state: &AppState,
    owner: &str,
    patient_id: &str,
    demo: &PatientDemographics,
) -> caselog_core::Result<()> {
    match state.storage.get_patient_by_patient_id(patient_id).await? {
        Some(existing) => {
            // 最近一次病例提供的值生效
            let weight = demo.weight.clone().or(existing.weight);
            let height = demo.height.clone().or(existing.height);
            let bmi = match (&weight, &height) {
                (Some(w), Some(h)) => calculate_bmi(w, h),
                _ => None,
            };
            let (first_name, last_name) = match demo.patient_name.as_deref() {
                Some(name) => split_name(name),
                None => (None, None),
            };
            state
                .storage
                .update_patient(
                    existing.id,
                    &existing.created_by,
                    &UpdatePatient {
                        first_name,
                        last_name,
                        age: demo.age,
                        gender: demo.gender.clone(),
                        weight: demo.weight.clone(),
                        height: demo.height.clone(),
                        bmi,
                        allergies: demo.allergies.clone(),
                        medical_history: demo.medical_history.clone(),
                    },
                )
                .await?;
        }
        None => {
            let Some(name) = demo.patient_name.as_deref() else {
                return Ok(());
            };
            let (first_name, last_name) = split_name(name);
            let Some(first_name) = first_name else {
                return Ok(());
            };
            let bmi = match (&demo.weight, &demo.height) {
                (Some(w), Some(h)) => calculate_bmi(w, h),
                _ => None,
            };
            state
                .storage
                .create_patient(&NewPatient {
                    patient_id: patient_id.to_string(),
                    first_name,
                    last_name,
                    age: demo.age,
                    gender: demo.gender.clone(),
                    weight: demo.weight.clone(),
                    height: demo.height.clone(),
                    bmi,
                    allergies: demo.allergies.clone(),
                    medical_history: demo.medical_history.clone(),
                    created_by: owner.to_string(),
                })
                .await?;
        }
    }
    Ok(())
}

fn split_name(full: &str) -> (Option<String>, Option<String>) {
    let mut parts = full.split_whitespace();
    let first = parts.next().map(str::to_string);
    let rest = parts.collect::<Vec<_>>().join(" ");
    let last = if rest.is_empty() { None } else { Some(rest) };
    (first, last)
}

pub async fn list_cases(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<CaseListQuery>,
) -> ApiResult<Json<Vec<Case>>> {
    let mut errors = Vec::new();
    let start_date = match query.start_date.as_deref() {
        Some(raw) => parse_date("startDate", raw, &mut errors),
        None => None,
    };
    let end_date = match query.end_date.as_deref() {
        Some(raw) => parse_date("endDate", raw, &mut errors),
        None => None,
    };
    reject_if_invalid(errors)?;

    let filter = CaseFilter {
        limit: query.limit.unwrap_or(50).clamp(1, 500),
        offset: query.offset.unwrap_or(0).max(0),
        search: query.search,
        start_date,
        end_date,
    };
    Ok(Json(state.storage.list_cases(&claims.sub, &filter).await?))
}

pub async fn get_case(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Case>> {
    let case = state
        .storage
        .get_case(id)
        .await?
        .filter(|c| c.anesthesiologist_id == claims.sub)
        .ok_or_else(|| CaselogError::NotFound("Case not found".to_string()))?;
    Ok(Json(case))
}

/// 从multipart文本字段还原请求体。前端以表单提交时数字与布尔到达为
/// 字符串，这里先按字段名做类型回转再走统一反序列化。
fn coerce_form_fields(fields: Vec<(String, String)>) -> ApiResult<CaseRequest> {
    let mut map = Map::new();
    for (name, value) in fields {
        let value = value.trim().to_string();
        if value.is_empty() {
            continue;
        }
        let coerced = match name.as_str() {
            "emergencyCase" => Value::Bool(value == "true" || value == "on"),
            "procedureId" => match value.parse::<i64>() {
                Ok(id) => Value::from(id),
                Err(_) => {
                    return Err(ApiError(CaselogError::invalid_field(
                        "procedureId",
                        "expected a numeric id",
                    )))
                }
            },
            "age" => match value.parse::<i32>() {
                Ok(age) => Value::from(age),
                Err(_) => {
                    return Err(ApiError(CaselogError::invalid_field(
                        "age",
                        "expected a number",
                    )))
                }
            },
            _ => Value::String(value),
        };
        map.insert(name, coerced);
    }
    serde_json::from_value(Value::Object(map)).map_err(|e| {
        ApiError(CaselogError::Validation(format!(
            "Malformed case payload: {}",
            e
        )))
    })
}

struct UploadedPart {
    original_name: String,
    mime_type: String,
    data: Vec<u8>,
}

/// 拆解multipart：casePhoto文件字段剥离，其余文本字段收集
async fn read_case_multipart(
    mut multipart: Multipart,
) -> ApiResult<(Vec<(String, String)>, Option<UploadedPart>)> {
    let mut fields = Vec::new();
    let mut photo = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CaselogError::Upload(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "casePhoto" {
            let original_name = field.file_name().unwrap_or("photo").to_string();
            let mime_type = field.content_type().unwrap_or("").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| CaselogError::Upload(e.to_string()))?
                .to_vec();
            photo = Some(UploadedPart {
                original_name,
                mime_type,
                data,
            });
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| CaselogError::Upload(e.to_string()))?;
            fields.push((name, value));
        }
    }
    Ok((fields, photo))
}

pub async fn create_case(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    request: Request,
) -> ApiResult<(StatusCode, Json<Case>)> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    let (body, photo) = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| CaselogError::Upload(e.to_string()))?;
        let (fields, photo) = read_case_multipart(multipart).await?;
        (coerce_form_fields(fields)?, photo)
    } else {
        let Json(body) = Json::<CaseRequest>::from_request(request, &state)
            .await
            .map_err(|e| CaselogError::Validation(format!("Malformed case payload: {}", e)))?;
        (body, None)
    };

    let (new_case, demographics) = body.into_new_case(&claims.sub)?;
    let case = state.storage.create_case(&new_case).await?;
    info!("Case created: {} ({})", case.case_number, case.id);

    // 从属写入：患者upsert与照片落盘，失败不影响已创建的病例
    sync_patient_from_case(&state, &claims.sub, &demographics).await;
    if let Some(part) = photo {
        if let Err(e) =
            persist_case_photo(&state, case.id, &claims.sub, part).await
        {
            warn!("Photo persistence for case {} failed: {}", case.id, e);
        }
    }

    // 返回读取路径的形态（内嵌手术摘要）
    let case = state.storage.get_case(case.id).await?.unwrap_or(case);
    Ok((StatusCode::CREATED, Json(case)))
}

async fn persist_case_photo(
    state: &AppState,
    case_id: i64,
    owner: &str,
    part: UploadedPart,
) -> caselog_core::Result<()> {
    let stored = uploads::store_image(
        &state.config,
        &part.original_name,
        &part.mime_type,
        &part.data,
    )
    .await?;
    state
        .storage
        .create_case_photo(&NewCasePhoto {
            case_id,
            file_name: stored.file_name,
            original_name: stored.original_name,
            mime_type: stored.mime_type,
            size_bytes: stored.size_bytes,
            uploaded_by: owner.to_string(),
        })
        .await?;
    Ok(())
}

pub async fn update_case(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(body): Json<CaseRequest>,
) -> ApiResult<Json<Case>> {
    let (update, demographics) = body.into_update()?;
    let case = state
        .storage
        .update_case(id, &claims.sub, &update)
        .await?
        .ok_or_else(|| CaselogError::NotFound("Case not found".to_string()))?;
    sync_patient_from_case(&state, &claims.sub, &demographics).await;
    Ok(Json(case))
}

pub async fn complete_case(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Case>> {
    let case = state
        .storage
        .complete_case(id, &claims.sub)
        .await?
        .ok_or_else(|| CaselogError::NotFound("Case not found".to_string()))?;
    Ok(Json(case))
}

pub async fn delete_case(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.storage.delete_case(id, &claims.sub).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(CaselogError::NotFound(
            "Case not found".to_string(),
        )))
    }
}

pub async fn case_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<CaseStats>> {
    Ok(Json(state.storage.get_case_stats(&claims.sub).await?))
}

// ========== 病例模板 ==========

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateRequest {
    pub name: Option<String>,
    pub is_public: Option<bool>,
    pub fields: Option<Value>,
}

pub async fn list_templates(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<CaseTemplate>>> {
    Ok(Json(state.storage.list_templates(&claims.sub).await?))
}

pub async fn create_template(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<TemplateRequest>,
) -> ApiResult<(StatusCode, Json<CaseTemplate>)> {
    let mut errors = Vec::new();
    let name = required("name", &body.name, &mut errors);
    reject_if_invalid(errors)?;

    let template = state
        .storage
        .create_template(&NewCaseTemplate {
            name,
            owner_id: claims.sub,
            is_public: body.is_public.unwrap_or(false),
            fields: body.fields.unwrap_or_else(|| Value::Object(Map::new())),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn delete_template(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.storage.delete_template(id, &claims.sub).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(CaselogError::NotFound(
            "Template not found".to_string(),
        )))
    }
}

// ========== 用户偏好 ==========

pub async fn get_preferences(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UserPreferences>> {
    Ok(Json(state.storage.get_preferences(&claims.sub).await?))
}

pub async fn put_preferences(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<PutPreferences>,
) -> ApiResult<Json<UserPreferences>> {
    Ok(Json(state.storage.put_preferences(&claims.sub, &body).await?))
}

// ========== 初始化 ==========

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    pub email: String,
    pub secret: String,
}

/// 免认证但凭secret门禁：提升指定邮箱为管理员并播种手术目录
pub async fn setup(
    State(state): State<AppState>,
    Json(body): Json<SetupRequest>,
) -> ApiResult<Json<SetupReport>> {
    let report = run_setup(
        state.storage.as_ref(),
        &body.email,
        &body.secret,
        &state.config.setup.secret,
    )
    .await?;
    info!("Setup completed for {}", body.email);
    Ok(Json(report))
}

// ========== 健康检查 ==========

pub async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthService;
    use caselog_admin::AppConfig;
    use caselog_database::MemoryStorage;
    use std::sync::Arc;

    fn test_state() -> AppState {
        let config = Arc::new(AppConfig::load(None).unwrap());
        AppState {
            storage: Arc::new(MemoryStorage::new()),
            auth: AuthService::new(config.clone()),
            config,
        }
    }

    fn case_with_demographics(weight: &str) -> CaseRequest {
        CaseRequest {
            anesthesia_type: Some("general".to_string()),
            case_date: Some("2024-03-01".to_string()),
            patient_id: Some("PT-001".to_string()),
            patient_name: Some("Jane Doe".to_string()),
            weight: Some(weight.to_string()),
            height: Some("170".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn form_fields_are_coerced_by_name() {
        let request = coerce_form_fields(vec![
            ("anesthesiaType".to_string(), "general".to_string()),
            ("caseDate".to_string(), "2024-03-01".to_string()),
            ("emergencyCase".to_string(), "true".to_string()),
            ("procedureId".to_string(), "7".to_string()),
            ("age".to_string(), "44".to_string()),
            ("notes".to_string(), "".to_string()),
        ])
        .unwrap();
        assert_eq!(request.anesthesia_type.as_deref(), Some("general"));
        assert_eq!(request.emergency_case, Some(true));
        assert_eq!(request.procedure_id, Some(7));
        assert_eq!(request.age, Some(44));
        assert!(request.notes.is_none());
    }

    #[test]
    fn non_numeric_procedure_id_is_a_field_error() {
        let result = coerce_form_fields(vec![("procedureId".to_string(), "abc".to_string())]);
        assert!(result.is_err());
    }

    #[test]
    fn case_request_requires_type_and_date() {
        let request = CaseRequest::default();
        let err = request.into_new_case("user-1").unwrap_err();
        match err.0 {
            CaselogError::Invalid(errors) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert!(fields.contains(&"anesthesiaType"));
                assert!(fields.contains(&"caseDate"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn bad_timestamp_is_a_field_error() {
        let request = CaseRequest {
            anesthesia_type: Some("general".to_string()),
            case_date: Some("2024-03-01".to_string()),
            start_time: Some("yesterday".to_string()),
            ..Default::default()
        };
        let err = request.into_new_case("user-1").unwrap_err();
        match err.0 {
            CaselogError::Invalid(errors) => {
                assert_eq!(errors[0].field, "startTime");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn repeated_case_demographics_keep_one_patient_with_latest_values() {
        let state = test_state();

        let (case, demographics) = case_with_demographics("60")
            .into_new_case("user-1")
            .unwrap();
        state.storage.create_case(&case).await.unwrap();
        sync_patient_from_case(&state, "user-1", &demographics).await;

        let patients = state
            .storage
            .list_patients("user-1", 50, None)
            .await
            .unwrap();
        assert_eq!(patients.len(), 1);
        assert_eq!(patients[0].weight.as_deref(), Some("60"));
        assert_eq!(patients[0].bmi, Some(20.8));

        let (case, demographics) = case_with_demographics("65")
            .into_new_case("user-1")
            .unwrap();
        state.storage.create_case(&case).await.unwrap();
        sync_patient_from_case(&state, "user-1", &demographics).await;

        // 同一patientId仍是一条记录，值取最近一次提交
        let patients = state
            .storage
            .list_patients("user-1", 50, None)
            .await
            .unwrap();
        assert_eq!(patients.len(), 1);
        assert_eq!(patients[0].patient_id, "PT-001");
        assert_eq!(patients[0].first_name, "Jane");
        assert_eq!(patients[0].last_name.as_deref(), Some("Doe"));
        assert_eq!(patients[0].weight.as_deref(), Some("65"));
        assert_eq!(patients[0].bmi, Some(22.5));
    }

    #[tokio::test]
    async fn demographics_without_patient_id_create_nothing() {
        let state = test_state();
        let mut request = case_with_demographics("60");
        request.patient_id = None;
        let (_, demographics) = request.into_new_case("user-1").unwrap();
        sync_patient_from_case(&state, "user-1", &demographics).await;

        let patients = state
            .storage
            .list_patients("user-1", 50, None)
            .await
            .unwrap();
        assert!(patients.is_empty());
    }

    #[test]
    fn patient_name_splits_into_parts() {
        assert_eq!(
            split_name("Jane Doe"),
            (Some("Jane".to_string()), Some("Doe".to_string()))
        );
        assert_eq!(split_name("Cher"), (Some("Cher".to_string()), None));
        assert_eq!(
            split_name("Ana de la Cruz"),
            (Some("Ana".to_string()), Some("de la Cruz".to_string()))
        );
    }
}
