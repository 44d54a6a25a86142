use chrono::Utc;
use serde::de::DeserializeOwned;
use sled::{Transactional, Tree};
use std::path::Path;
use tracing::info;

use crate::error::{abort, StoreError};
use crate::model::{Complaint, Decision, DetectionRecord, NewComplaint, NewUser, Role, User};

const USERS_TREE: &str = "users";
const EMAILS_TREE: &str = "users_by_email";
const COMPLAINTS_TREE: &str = "complaints";
const DETECTIONS_TREE: &str = "detections";

/// 未登录提交的投诉统一记在这个账号名下
pub const ANONYMOUS_EMAIL: &str = "anonymous@civiceye.local";

/// 持久化存储 (Store)
///
/// **职责**: 管理四棵 sled 树：
/// - `users`: 用户与角色，审核流程只读取角色
/// - `users_by_email`: 邮箱 → 用户 id 的唯一索引
/// - `complaints`: 投诉及其决定子记录
/// - `detections`: 检测记录，键为 `complaint_id || record_id` (大端序)，
///   前缀扫描即可按写入顺序取出某个投诉的全部历史
///
/// 句柄本身很轻（内部是引用计数），显式传给账本和审核流程的各个操作。
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    users: Tree,
    emails: Tree,
    complaints: Tree,
    detections: Tree,
}

pub(crate) fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

pub(crate) fn detection_key(complaint_id: u64, record_id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&complaint_id.to_be_bytes());
    key[8..].copy_from_slice(&record_id.to_be_bytes());
    key
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(serde_json::from_slice(bytes)?)
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        info!("存储已打开: {}", path.as_ref().display());
        Self::from_db(db)
    }

    /// 进程退出即删除的临时库，测试与基准使用
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            users: db.open_tree(USERS_TREE)?,
            emails: db.open_tree(EMAILS_TREE)?,
            complaints: db.open_tree(COMPLAINTS_TREE)?,
            detections: db.open_tree(DETECTIONS_TREE)?,
            db,
        })
    }

    pub(crate) fn complaints(&self) -> &Tree {
        &self.complaints
    }

    pub(crate) fn detections(&self) -> &Tree {
        &self.detections
    }

    fn next_id(&self) -> Result<u64, StoreError> {
        // sled 的 id 从 0 开始，对外的 id 从 1 开始
        Ok(self.db.generate_id()? + 1)
    }

    /// 邮箱已被占用时返回 `EmailTaken`，不写任何数据
    pub fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let user = User {
            id: self.next_id()?,
            name: new.name,
            email: new.email,
            role: new.role,
            created_at: Utc::now(),
        };
        let key = id_key(user.id);
        let bytes = serde_json::to_vec(&user)?;

        (&self.users, &self.emails).transaction(|(users, emails)| {
            if emails.get(user.email.as_bytes())?.is_some() {
                return Err(abort(StoreError::EmailTaken(user.email.clone())));
            }
            emails.insert(user.email.as_bytes(), &key[..])?;
            users.insert(&key[..], bytes.clone())?;
            Ok(())
        })?;

        info!("新用户 {} ({:?})", user.id, user.role);
        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        match self.emails.get(email.as_bytes())? {
            Some(key) => self.users.get(key)?.map(|bytes| decode(&bytes)).transpose(),
            None => Ok(None),
        }
    }

    /// 匿名账号，第一次用到时创建
    pub fn anonymous_user(&self) -> Result<User, StoreError> {
        if let Some(user) = self.get_user_by_email(ANONYMOUS_EMAIL)? {
            return Ok(user);
        }
        let created = self.create_user(NewUser {
            name: Some("Anonymous".to_string()),
            email: ANONYMOUS_EMAIL.to_string(),
            role: Role::User,
        });
        match created {
            // 并发提交时别人先建好了
            Err(StoreError::EmailTaken(email)) => self
                .get_user_by_email(&email)?
                .ok_or(StoreError::EmailTaken(email)),
            other => other,
        }
    }

    pub fn get_user(&self, id: u64) -> Result<Option<User>, StoreError> {
        self.users
            .get(id_key(id))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// 新投诉的决定子记录为 pending，决定来源为空
    ///
    /// 给了 `user_id` 就必须是已存在的用户；没给则记在匿名账号名下。
    pub fn create_complaint(&self, new: NewComplaint) -> Result<Complaint, StoreError> {
        let user_id = match new.user_id {
            Some(id) => {
                if self.get_user(id)?.is_none() {
                    return Err(StoreError::UserNotFound(id));
                }
                id
            }
            None => self.anonymous_user()?.id,
        };

        let now = Utc::now();
        let complaint = Complaint {
            id: self.next_id()?,
            user_id,
            complaint_type: new.complaint_type,
            image_path: new.image_path,
            address: new.address,
            description: new.description,
            decision: Decision::default(),
            ledger_head: None,
            created_at: now,
            updated_at: now,
        };
        self.complaints
            .insert(&id_key(complaint.id)[..], serde_json::to_vec(&complaint)?)?;
        Ok(complaint)
    }

    pub fn get_complaint(&self, id: u64) -> Result<Option<Complaint>, StoreError> {
        self.complaints
            .get(id_key(id))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// 全部投诉，最新的在前
    pub fn list_complaints(&self) -> Result<Vec<Complaint>, StoreError> {
        self.complaints
            .iter()
            .rev()
            .map(|entry| {
                let (_, bytes) = entry?;
                decode(&bytes)
            })
            .collect()
    }

    /// 某个用户提交的投诉，最新的在前
    pub fn complaints_for_user(&self, user_id: u64) -> Result<Vec<Complaint>, StoreError> {
        if self.get_user(user_id)?.is_none() {
            return Err(StoreError::UserNotFound(user_id));
        }
        Ok(self
            .list_complaints()?
            .into_iter()
            .filter(|c| c.user_id == user_id)
            .collect())
    }

    /// 某个投诉的全部检测记录，按写入顺序
    pub fn detections_for(&self, complaint_id: u64) -> Result<Vec<DetectionRecord>, StoreError> {
        self.detections
            .scan_prefix(id_key(complaint_id))
            .map(|entry| {
                let (_, bytes) = entry?;
                decode(&bytes)
            })
            .collect()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
