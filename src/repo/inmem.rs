use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::*;
use crate::trending;

const SNAPSHOT_FILE: &str = "state.json";

#[derive(Default, Serialize, Deserialize)]
struct State {
    users: HashMap<Id, User>,
    incidents: HashMap<String, Incident>,
    comments: HashMap<Id, Comment>,
    next_id: Id,
}

impl State {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }
}

/// Map-backed store for development and tests. With a snapshot path every
/// write is flushed to a JSON file that is reloaded on start.
#[derive(Clone, Default)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
}

impl InMemRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `<dir>/state.json` if present and persist to it on every write.
    pub fn with_snapshot(dir: impl AsRef<Path>) -> Self {
        let path = dir.as_ref().join(SNAPSHOT_FILE);
        let state = Self::load_state_from(&path);
        Self {
            state: Arc::new(RwLock::new(state)),
            snapshot_path: Some(Arc::new(path)),
        }
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    tracing::info!(path = %path.display(), "loaded in-memory snapshot");
                    s
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable snapshot, starting empty");
                    State::default()
                }
            },
            Err(e) => {
                tracing::info!(path = %path.display(), error = %e, "no snapshot, starting empty");
                State::default()
            }
        }
    }

    fn persist(&self) {
        let Some(path) = self.snapshot_path.as_ref() else { return };
        let Ok(state) = self.read() else { return };
        match serde_json::to_vec_pretty(&*state) {
            Ok(bytes) => {
                if let Some(dir) = path.parent() {
                    if let Err(e) = std::fs::create_dir_all(dir) {
                        tracing::error!(dir = %dir.display(), error = %e, "failed to create snapshot directory");
                    }
                }
                if let Err(e) = std::fs::write(path.as_path(), bytes) {
                    tracing::error!(path = %path.display(), error = %e, "failed to write snapshot");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize snapshot"),
        }
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    /// Run a mutation under the write lock, then flush the snapshot.
    fn mutate<T>(&self, f: impl FnOnce(&mut State) -> RepoResult<T>) -> RepoResult<T> {
        let out = {
            let mut s = self.write()?;
            f(&mut s)?
        };
        self.persist();
        Ok(out)
    }
}

fn contains_ci(haystack: &Option<String>, needle: &str) -> bool {
    haystack
        .as_deref()
        .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

fn page<T>(items: Vec<T>, skip: i64, limit: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(skip.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

fn newest_first(a: &Comment, b: &Comment) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
}

#[async_trait]
impl IncidentRepo for InMemRepo {
    async fn insert_incidents(&self, docs: Vec<NewIncident>) -> RepoResult<u64> {
        self.mutate(|s| {
            let now = Utc::now();
            let mut inserted = 0;
            for d in docs {
                if s.incidents.contains_key(&d.open_data_id) {
                    continue;
                }
                let incident = Incident {
                    open_data_id: d.open_data_id.clone(),
                    complaint_type: d.complaint_type,
                    descriptor: d.descriptor,
                    incident_zip: d.incident_zip,
                    agency: d.agency,
                    status: d.status,
                    created_date: d.created_date,
                    latitude: d.latitude,
                    longitude: d.longitude,
                    ingested_at: now,
                };
                s.incidents.insert(d.open_data_id, incident);
                inserted += 1;
            }
            Ok(inserted)
        })
    }

    async fn get_incident(&self, open_data_id: &str) -> RepoResult<Incident> {
        let s = self.read()?;
        s.incidents.get(open_data_id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_incidents_by_zip(&self, zip: &str, skip: i64, limit: i64) -> RepoResult<Vec<Incident>> {
        let s = self.read()?;
        let mut v: Vec<_> = s
            .incidents
            .values()
            .filter(|i| i.incident_zip.as_deref() == Some(zip))
            .cloned()
            .collect();
        // Option orders None first, so reversing puts undated rows last.
        v.sort_by(|a, b| b.created_date.cmp(&a.created_date).then(a.open_data_id.cmp(&b.open_data_id)));
        Ok(page(v, skip, limit))
    }

    async fn list_incidents(&self, f: &IncidentFilter) -> RepoResult<Vec<Incident>> {
        let s = self.read()?;
        let mut v: Vec<_> = s
            .incidents
            .values()
            .filter(|i| i.incident_zip.as_deref() == Some(f.zip.as_str()) && i.created_date.is_some())
            .filter(|i| f.status.as_ref().map(|st| i.status.as_ref() == Some(st)).unwrap_or(true))
            .filter(|i| f.complaint_type.as_deref().map(|ct| contains_ci(&i.complaint_type, ct)).unwrap_or(true))
            .filter(|i| f.agency.as_deref().map(|ag| contains_ci(&i.agency, ag)).unwrap_or(true))
            .cloned()
            .collect();
        v.sort_by(|a, b| {
            let by_date = match f.sort {
                SortOrder::Newest => b.created_date.cmp(&a.created_date),
                SortOrder::Oldest => a.created_date.cmp(&b.created_date),
            };
            by_date.then(a.open_data_id.cmp(&b.open_data_id))
        });
        Ok(page(v, f.skip, f.limit))
    }
}

#[async_trait]
impl CommentRepo for InMemRepo {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
        self.mutate(|s| {
            let id = s.next_id();
            let comment = Comment {
                id,
                incident_id: new.incident_id,
                user_id: new.user_id,
                username: new.username,
                content: new.content,
                created_at: Utc::now(),
                status: CommentStatus::Approved,
                moderated_by: None,
                moderated_at: None,
                likes: vec![],
                dislikes: vec![],
                reports: vec![],
            };
            s.comments.insert(id, comment.clone());
            Ok(comment)
        })
    }

    async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
        let s = self.read()?;
        s.comments.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_comments(&self, incident_id: &str) -> RepoResult<Vec<Comment>> {
        let s = self.read()?;
        let mut v: Vec<_> = s
            .comments
            .values()
            .filter(|c| c.incident_id == incident_id && c.status == CommentStatus::Approved)
            .cloned()
            .collect();
        v.sort_by(newest_first);
        Ok(v)
    }

    async fn vote_comment(&self, id: Id, user_id: Id, kind: VoteKind) -> RepoResult<VoteCounts> {
        // The whole toggle runs under one write lock, so it is atomic per comment.
        self.mutate(|s| {
            let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            comment.apply_vote(user_id, kind);
            Ok(comment.counts())
        })
    }

    async fn report_comment(&self, id: Id, user_id: Id, reason: String) -> RepoResult<Comment> {
        self.mutate(|s| {
            let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            if comment.reported_by(user_id) {
                return Err(RepoError::Conflict(ALREADY_REPORTED.into()));
            }
            comment.reports.push(Report { user_id, reason, created_at: Utc::now() });
            Ok(comment.clone())
        })
    }

    async fn list_for_moderation(&self, filter: &ModerationFilter) -> RepoResult<Vec<Comment>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.comments.values().filter(|c| filter.matches(c)).cloned().collect();
        v.sort_by(newest_first);
        Ok(page(v, filter.skip, filter.limit))
    }

    async fn set_comment_status(&self, id: Id, status: CommentStatus, moderator: Id) -> RepoResult<Comment> {
        self.mutate(|s| {
            let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            comment.status = status;
            comment.moderated_by = Some(moderator);
            comment.moderated_at = Some(Utc::now());
            Ok(comment.clone())
        })
    }

    async fn delete_comment(&self, id: Id) -> RepoResult<()> {
        self.mutate(|s| s.comments.remove(&id).map(|_| ()).ok_or(RepoError::NotFound))
    }

    async fn trending(&self, query: &TrendQuery, since: Option<DateTime<Utc>>) -> RepoResult<Vec<TrendingEntry>> {
        let s = self.read()?;
        Ok(trending::rank(s.comments.values(), query, since))
    }
}

#[async_trait]
impl UserRepo for InMemRepo {
    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        self.mutate(|s| {
            let email_lower = new.email.to_lowercase();
            let username_lower = new.username.to_lowercase();
            if s
                .users
                .values()
                .any(|u| u.email_lower == email_lower || u.username_lower == username_lower)
            {
                return Err(RepoError::Conflict(DUPLICATE_ACCOUNT.into()));
            }
            let id = s.next_id();
            let user = User {
                id,
                email: new.email,
                email_lower,
                username: new.username,
                username_lower,
                password_hash: new.password_hash,
                role: Role::User,
                status: AccountStatus::Active,
                created_at: Utc::now(),
                last_login_at: None,
                profile: new.profile,
                auth_meta: AuthMeta::default(),
            };
            s.users.insert(id, user.clone());
            Ok(user)
        })
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        let s = self.read()?;
        s.users.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn find_user_by_identifier(&self, identifier: &str) -> RepoResult<User> {
        let needle = identifier.trim().to_lowercase();
        let s = self.read()?;
        s.users
            .values()
            .find(|u| u.email_lower == needle || u.username_lower == needle)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn record_login_success(&self, id: Id, at: DateTime<Utc>) -> RepoResult<()> {
        self.mutate(|s| {
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            user.last_login_at = Some(at);
            user.auth_meta = AuthMeta::default();
            Ok(())
        })
    }

    async fn record_login_failure(&self, id: Id, max_failures: i32, lock_until: DateTime<Utc>) -> RepoResult<AuthMeta> {
        self.mutate(|s| {
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            let fails = user.auth_meta.failed_login_count + 1;
            user.auth_meta = AuthMeta {
                failed_login_count: fails,
                locked_until: (fails >= max_failures).then_some(lock_until),
            };
            Ok(user.auth_meta.clone())
        })
    }

    async fn set_user_role(&self, id: Id, role: Role) -> RepoResult<User> {
        self.mutate(|s| {
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            user.role = role;
            Ok(user.clone())
        })
    }

    async fn set_user_status(&self, id: Id, status: AccountStatus) -> RepoResult<User> {
        self.mutate(|s| {
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            user.status = status;
            Ok(user.clone())
        })
    }
}
