//! 病例导出
//!
//! 把调用者自己的病例列表整形为可下载文件。CSV转义按RFC 4180手写：
//! 含逗号、引号或换行的字段加引号，内部引号加倍。

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::auth::Claims;
use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Extension,
};
use caselog_core::{Case, CaselogError};
use caselog_database::CaseFilter;
use serde::Deserialize;

const EXPORT_LIMIT: i64 = 10_000;

const CSV_HEADER: &str = "Case Number,Date,Patient,Patient ID,Surgeon,Procedure,Category,\
Anesthesia Type,Regional Block,ASA,Emergency,Start Time,End Time,Status,Diagnosis,\
Complications,Notes";

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn csv_row(case: &Case) -> String {
    let procedure = case
        .procedure
        .as_ref()
        .map(|p| p.name.clone())
        .or_else(|| case.custom_procedure_name.clone())
        .unwrap_or_default();
    let category = case
        .procedure
        .as_ref()
        .map(|p| p.category.clone())
        .or_else(|| case.procedure_category.clone())
        .unwrap_or_default();
    let fields = [
        case.case_number.clone(),
        case.case_date.format("%Y-%m-%d").to_string(),
        opt(&case.patient_name).to_string(),
        opt(&case.patient_id).to_string(),
        opt(&case.surgeon_name).to_string(),
        procedure,
        category,
        case.anesthesia_type.clone(),
        opt(&case.regional_block_type).to_string(),
        opt(&case.asa_score).to_string(),
        if case.emergency_case { "yes" } else { "no" }.to_string(),
        case.start_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
        case.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
        case.status.to_string(),
        opt(&case.diagnosis).to_string(),
        opt(&case.complications).to_string(),
        opt(&case.notes).to_string(),
    ];
    fields
        .iter()
        .map(|f| csv_escape(f))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn cases_to_csv(cases: &[Case]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for case in cases {
        out.push_str(&csv_row(case));
        out.push('\n');
    }
    out
}

/// GET /api/cases/export?format=csv|json
pub async fn export_cases(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let format = query.format.as_deref().unwrap_or("csv");
    let filter = CaseFilter {
        limit: EXPORT_LIMIT,
        ..CaseFilter::default()
    };
    let cases = state.storage.list_cases(&claims.sub, &filter).await?;

    let stamp = chrono::Utc::now().format("%Y%m%d");
    let response = match format {
        "csv" => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"cases-{}.csv\"", stamp),
                ),
            ],
            cases_to_csv(&cases),
        )
            .into_response(),
        "json" => (
            [
                (header::CONTENT_TYPE, "application/json".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"cases-{}.json\"", stamp),
                ),
            ],
            serde_json::to_string_pretty(&cases)?,
        )
            .into_response(),
        other => {
            return Err(ApiError(CaselogError::invalid_field(
                "format",
                format!("unsupported export format \"{}\"", other),
            )))
        }
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use caselog_core::{CaseStatus, ProcedureRef};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn sample_case() -> Case {
        Case {
            id: 1,
            case_number: "CASE-1700000000000-ab12cd34".to_string(),
            anesthesiologist_id: "user-1".to_string(),
            supervisor_id: None,
            patient_id: Some("PT-001".to_string()),
            patient_name: Some("Doe, Jane".to_string()),
            surgeon_name: Some("Dr. Smith".to_string()),
            procedure_id: Some(3),
            procedure: Some(ProcedureRef {
                id: 3,
                name: "Laparoscopic Cholecystectomy".to_string(),
                category: "General Surgery".to_string(),
            }),
            custom_procedure_name: None,
            procedure_category: None,
            anesthesia_type: "general".to_string(),
            regional_block_type: None,
            custom_regional_block: None,
            asa_score: Some("II".to_string()),
            emergency_case: false,
            case_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            start_time: Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()),
            end_time: Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()),
            induction_time: None,
            incision_time: None,
            emergence_time: None,
            diagnosis: Some("Cholelithiasis".to_string()),
            complications: None,
            notes: Some("uneventful".to_string()),
            preop_medications: None,
            intraop_medications: None,
            postop_medications: None,
            status: CaseStatus::Completed,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn fields_with_separators_are_quoted() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn row_prefers_joined_procedure_over_custom() {
        let row = csv_row(&sample_case());
        assert!(row.contains("Laparoscopic Cholecystectomy"));
        assert!(row.contains("\"Doe, Jane\""));
        assert!(row.contains("completed"));
    }

    #[test]
    fn csv_has_header_and_one_row_per_case() {
        let csv = cases_to_csv(&[sample_case(), sample_case()]);
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.starts_with("Case Number,"));
    }
}
