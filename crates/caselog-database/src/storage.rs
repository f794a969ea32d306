//! 统一存储访问接口
//!
//! 每个实体×操作一个异步方法；持久化失败统一抛`CaselogError`，读取未命中
//! 以`Ok(None)`表示，由HTTP层映射为404。用户私有实体（患者、外科医生、
//! 病例）的列表/搜索方法强制携带归属用户id。

use crate::models::*;
use async_trait::async_trait;
use caselog_core::models::*;
use caselog_core::Result;

#[async_trait]
pub trait Storage: Send + Sync {
    // ========== 用户 ==========

    /// 按身份提供方subject做创建或更新（认证回调的惰性同步）
    async fn upsert_user(&self, user: &UpsertUser) -> Result<User>;
    async fn get_user(&self, id: &str) -> Result<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    /// 用户自助更新档案字段
    async fn update_user(&self, id: &str, update: &UpdateUser) -> Result<Option<User>>;
    /// 主题偏好更新（取值已在HTTP层校验）
    async fn update_theme(&self, id: &str, theme: &str) -> Result<Option<User>>;
    async fn list_users(&self) -> Result<Vec<User>>;
    /// 管理员修改角色/启用标记
    async fn admin_update_user(&self, id: &str, update: &AdminUserUpdate) -> Result<Option<User>>;

    // ========== 患者 ==========

    async fn list_patients(
        &self,
        owner: &str,
        limit: i64,
        search: Option<&str>,
    ) -> Result<Vec<Patient>>;
    async fn get_patient(&self, id: i64) -> Result<Option<Patient>>;
    /// 按院内患者标识查找（病例写入的upsert键）
    async fn get_patient_by_patient_id(&self, patient_id: &str) -> Result<Option<Patient>>;
    async fn create_patient(&self, patient: &NewPatient) -> Result<Patient>;
    async fn update_patient(
        &self,
        id: i64,
        owner: &str,
        update: &UpdatePatient,
    ) -> Result<Option<Patient>>;
    async fn delete_patient(&self, id: i64, owner: &str) -> Result<bool>;

    // ========== 外科医生 ==========

    async fn list_surgeons(&self, owner: &str) -> Result<Vec<Surgeon>>;
    async fn create_surgeon(&self, surgeon: &NewSurgeon) -> Result<Surgeon>;
    async fn update_surgeon(
        &self,
        id: i64,
        owner: &str,
        update: &UpdateSurgeon,
    ) -> Result<Option<Surgeon>>;
    async fn delete_surgeon(&self, id: i64, owner: &str) -> Result<bool>;

    // ========== 手术目录 ==========

    async fn list_procedures(&self, limit: i64) -> Result<Vec<Procedure>>;
    async fn get_procedure(&self, id: i64) -> Result<Option<Procedure>>;
    /// 按name幂等upsert（重复播种不产生重复行）
    async fn create_procedure(&self, procedure: &NewProcedure) -> Result<Procedure>;

    // ========== 病例 ==========

    /// 归属用户的病例列表；读取路径内嵌手术摘要
    async fn list_cases(&self, owner: &str, filter: &CaseFilter) -> Result<Vec<Case>>;
    async fn get_case(&self, id: i64) -> Result<Option<Case>>;
    /// 创建病例；case_number缺省时生成
    async fn create_case(&self, case: &NewCase) -> Result<Case>;
    async fn update_case(&self, id: i64, owner: &str, update: &UpdateCase)
        -> Result<Option<Case>>;
    /// 专用状态转移：无条件置completed并刷新end_time（重复调用覆盖写）
    async fn complete_case(&self, id: i64, owner: &str) -> Result<Option<Case>>;
    async fn delete_case(&self, id: i64, owner: &str) -> Result<bool>;
    async fn get_case_stats(&self, owner: &str) -> Result<CaseStats>;

    // ========== 病例模板 ==========

    /// 自有模板加公共模板
    async fn list_templates(&self, owner: &str) -> Result<Vec<CaseTemplate>>;
    async fn create_template(&self, template: &NewCaseTemplate) -> Result<CaseTemplate>;
    async fn delete_template(&self, id: i64, owner: &str) -> Result<bool>;

    // ========== 病例照片 ==========

    /// 创建照片记录；父病例不存在时报校验错误（无外键，删除病例不级联）
    async fn create_case_photo(&self, photo: &NewCasePhoto) -> Result<CasePhoto>;
    async fn list_case_photos(&self, case_id: i64) -> Result<Vec<CasePhoto>>;
    async fn get_photo(&self, id: i64) -> Result<Option<CasePhoto>>;
    async fn delete_case_photo(&self, id: i64) -> Result<bool>;

    // ========== 用户偏好 ==========

    /// 无记录时返回默认偏好
    async fn get_preferences(&self, user_id: &str) -> Result<UserPreferences>;
    async fn put_preferences(
        &self,
        user_id: &str,
        prefs: &PutPreferences,
    ) -> Result<UserPreferences>;

    // ========== 管理端聚合 ==========

    async fn user_case_counts(&self) -> Result<Vec<UserCaseCount>>;
    async fn system_stats(&self) -> Result<SystemStats>;
}
