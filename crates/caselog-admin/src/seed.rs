//! 一次性初始化：管理员提升与手术目录播种
//!
//! 口令比对通过后，按email查找用户并提升为管理员，同时幂等播种手术目录
//! （目录按name唯一，重复执行不产生重复行）。

use caselog_core::{CaselogError, Result, UserRole};
use caselog_database::{AdminUserUpdate, NewProcedure, Storage};
use serde::Serialize;
use tracing::{info, warn};

/// 默认手术目录
const DEFAULT_PROCEDURES: &[(&str, &str)] = &[
    ("Appendectomy", "General Surgery"),
    ("Laparoscopic cholecystectomy", "General Surgery"),
    ("Inguinal hernia repair", "General Surgery"),
    ("Total knee arthroplasty", "Orthopedic Surgery"),
    ("Total hip arthroplasty", "Orthopedic Surgery"),
    ("Arthroscopic meniscectomy", "Orthopedic Surgery"),
    ("Coronary artery bypass grafting", "Cardiothoracic Surgery"),
    ("Lobectomy", "Cardiothoracic Surgery"),
    ("Craniotomy", "Neurosurgery"),
    ("Lumbar laminectomy", "Neurosurgery"),
    ("Cesarean section", "Obstetrics & Gynecology"),
    ("Hysterectomy", "Obstetrics & Gynecology"),
    ("Transurethral resection of the prostate", "Urology"),
    ("Tonsillectomy", "ENT (Otolaryngology)"),
    ("Cataract extraction", "Ophthalmology"),
    ("Carotid endarterectomy", "Vascular Surgery"),
];

/// 初始化执行结果
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupReport {
    pub promoted_user_id: String,
    pub seeded_procedures: usize,
}

/// 执行初始化流程
pub async fn run_setup(
    storage: &dyn Storage,
    email: &str,
    secret: &str,
    expected_secret: &str,
) -> Result<SetupReport> {
    if secret != expected_secret {
        warn!("Setup attempt with invalid secret for email {}", email);
        return Err(CaselogError::Forbidden("invalid setup secret".to_string()));
    }

    let user = storage
        .get_user_by_email(email)
        .await?
        .ok_or_else(|| CaselogError::NotFound(format!("no user with email {}", email)))?;

    let promoted = storage
        .admin_update_user(
            &user.id,
            &AdminUserUpdate {
                role: Some(UserRole::Admin),
                is_active: None,
            },
        )
        .await?
        .ok_or_else(|| CaselogError::NotFound(format!("no user with email {}", email)))?;

    let mut seeded = 0;
    for (name, category) in DEFAULT_PROCEDURES {
        storage
            .create_procedure(&NewProcedure {
                name: (*name).to_string(),
                category: (*category).to_string(),
                description: None,
            })
            .await?;
        seeded += 1;
    }

    info!(
        "Setup complete: promoted {} to admin, seeded {} procedures",
        promoted.id, seeded
    );
    Ok(SetupReport {
        promoted_user_id: promoted.id,
        seeded_procedures: seeded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use caselog_database::{MemoryStorage, UpsertUser};

    async fn storage_with_user(email: &str) -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage
            .upsert_user(&UpsertUser {
                id: "sub-1".to_string(),
                email: Some(email.to_string()),
                first_name: None,
                last_name: None,
                profile_image_url: None,
            })
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn setup_promotes_and_seeds_idempotently() {
        let storage = storage_with_user("doc@example.org").await;

        let report = run_setup(&storage, "doc@example.org", "s3cret", "s3cret")
            .await
            .unwrap();
        assert_eq!(report.promoted_user_id, "sub-1");
        let user = storage.get_user("sub-1").await.unwrap().unwrap();
        assert_eq!(user.role, UserRole::Admin);

        let first_count = storage.list_procedures(1000).await.unwrap().len();
        assert!(first_count > 0);

        // 再次执行不产生重复目录条目
        run_setup(&storage, "doc@example.org", "s3cret", "s3cret")
            .await
            .unwrap();
        assert_eq!(storage.list_procedures(1000).await.unwrap().len(), first_count);
    }

    #[tokio::test]
    async fn setup_rejects_wrong_secret() {
        let storage = storage_with_user("doc@example.org").await;
        let err = run_setup(&storage, "doc@example.org", "nope", "s3cret")
            .await
            .unwrap_err();
        assert!(matches!(err, CaselogError::Forbidden(_)));
        let user = storage.get_user("sub-1").await.unwrap().unwrap();
        assert_eq!(user.role, UserRole::User);
    }

    #[tokio::test]
    async fn setup_unknown_email_is_not_found() {
        let storage = storage_with_user("doc@example.org").await;
        let err = run_setup(&storage, "other@example.org", "s3cret", "s3cret")
            .await
            .unwrap_err();
        assert!(matches!(err, CaselogError::NotFound(_)));
    }
}
