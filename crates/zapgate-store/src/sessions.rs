use chrono::Utc;
use tracing::instrument;

use zapgate_core::{ProxyConfig, Session, SessionId, SessionStatus, WebhookConfig};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Durable session records. Every lookup miss is `StoreError::NotFound`.
pub trait SessionStore: Send + Sync {
    fn create(&self, session: &Session) -> Result<(), StoreError>;

    fn get_by_id(&self, id: &SessionId) -> Result<Session, StoreError>;

    fn get_by_name(&self, name: &str) -> Result<Session, StoreError>;

    /// Overwrite the mutable fields of an existing record.
    fn update(&self, session: &Session) -> Result<(), StoreError>;

    fn delete(&self, id: &SessionId) -> Result<(), StoreError>;

    fn list(&self) -> Result<Vec<Session>, StoreError>;

    fn exists_by_name(&self, name: &str) -> Result<bool, StoreError>;

    /// Sessions that completed pairing and can reconnect silently.
    fn get_sessions_with_device_identity(&self) -> Result<Vec<Session>, StoreError>;

    fn update_status(&self, id: &SessionId, status: SessionStatus) -> Result<(), StoreError>;

    /// Record (or clear, with an empty `jid`) the paired device identity.
    fn set_device(&self, id: &SessionId, jid: &str, phone: Option<&str>) -> Result<(), StoreError>;
}

const SELECT_COLUMNS: &str =
    "SELECT id, name, status, device_jid, phone, proxy, webhook, created_at, updated_at FROM sessions";

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn query_one(&self, sql: &str, param: &str, what: String) -> Result<Session, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([param])?;
            let session = match rows.next()? {
                Some(row) => row_to_session(row)?,
                None => return Err(StoreError::NotFound(what)),
            };
            Ok(session)
        })
    }

    fn query_many(&self, sql: &str) -> Result<Vec<Session>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_session(row)?);
            }
            Ok(results)
        })
    }
}

impl SessionStore for SessionRepo {
    #[instrument(skip(self, session), fields(session_id = %session.id, name = %session.name))]
    fn create(&self, session: &Session) -> Result<(), StoreError> {
        let proxy = encode_proxy(session.proxy.as_ref())?;
        let webhook = serde_json::to_string(&session.webhook)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, name, status, device_jid, phone, proxy, webhook, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    session.id.as_str(),
                    session.name,
                    session.status.to_string(),
                    session.device_jid,
                    session.phone,
                    proxy,
                    webhook,
                    session.created_at,
                    session.updated_at,
                ],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict(format!("session name {:?} already exists", session.name))
                }
                other => other,
            })?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    fn get_by_id(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.query_one(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            id.as_str(),
            format!("session {id}"),
        )
    }

    #[instrument(skip(self))]
    fn get_by_name(&self, name: &str) -> Result<Session, StoreError> {
        self.query_one(
            &format!("{SELECT_COLUMNS} WHERE name = ?1"),
            name,
            format!("session named {name:?}"),
        )
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    fn update(&self, session: &Session) -> Result<(), StoreError> {
        let proxy = encode_proxy(session.proxy.as_ref())?;
        let webhook = serde_json::to_string(&session.webhook)?;
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET name = ?1, status = ?2, device_jid = ?3, phone = ?4,
                        proxy = ?5, webhook = ?6, updated_at = ?7
                 WHERE id = ?8",
                rusqlite::params![
                    session.name,
                    session.status.to_string(),
                    session.device_jid,
                    session.phone,
                    proxy,
                    webhook,
                    now,
                    session.id.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {}", session.id)));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self))]
    fn list(&self) -> Result<Vec<Session>, StoreError> {
        self.query_many(&format!("{SELECT_COLUMNS} ORDER BY created_at ASC, id ASC"))
    }

    #[instrument(skip(self))]
    fn exists_by_name(&self, name: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE name = ?1",
                [name],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    #[instrument(skip(self))]
    fn get_sessions_with_device_identity(&self) -> Result<Vec<Session>, StoreError> {
        self.query_many(&format!(
            "{SELECT_COLUMNS} WHERE device_jid != '' ORDER BY created_at ASC, id ASC"
        ))
    }

    #[instrument(skip(self), fields(session_id = %id, status = %status))]
    fn update_status(&self, id: &SessionId, status: SessionStatus) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status.to_string(), now, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    fn set_device(&self, id: &SessionId, jid: &str, phone: Option<&str>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE sessions SET device_jid = ?1, phone = COALESCE(?2, phone), updated_at = ?3
                 WHERE id = ?4",
                rusqlite::params![jid, phone, now, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }
}

fn encode_proxy(proxy: Option<&ProxyConfig>) -> Result<Option<String>, StoreError> {
    proxy.map(serde_json::to_string).transpose().map_err(StoreError::from)
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, StoreError> {
    let status: String = row_helpers::get(row, 2, "sessions", "status")?;
    let proxy: Option<String> = row_helpers::get_opt(row, 5, "sessions", "proxy")?;
    let webhook: String = row_helpers::get(row, 6, "sessions", "webhook")?;

    Ok(Session {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        name: row_helpers::get(row, 1, "sessions", "name")?,
        status: row_helpers::parse_enum(&status, "sessions", "status")?,
        device_jid: row_helpers::get(row, 3, "sessions", "device_jid")?,
        phone: row_helpers::get_opt(row, 4, "sessions", "phone")?,
        proxy: proxy
            .map(|raw| row_helpers::parse_json::<ProxyConfig>(&raw, "sessions", "proxy"))
            .transpose()?,
        webhook: row_helpers::parse_json::<WebhookConfig>(&webhook, "sessions", "webhook")?,
        created_at: row_helpers::get(row, 7, "sessions", "created_at")?,
        updated_at: row_helpers::get(row, 8, "sessions", "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SessionRepo {
        SessionRepo::new(Database::in_memory().unwrap())
    }

    fn paired(name: &str, jid: &str) -> Session {
        let mut session = Session::new(name);
        session.device_jid = jid.into();
        session
    }

    #[test]
    fn create_and_get() {
        let repo = repo();
        let session = Session::new("sales");
        repo.create(&session).unwrap();

        let fetched = repo.get_by_id(&session.id).unwrap();
        assert_eq!(fetched.name, "sales");
        assert_eq!(fetched.status, SessionStatus::Disconnected);
        assert!(fetched.device_jid.is_empty());

        let by_name = repo.get_by_name("sales").unwrap();
        assert_eq!(by_name.id, session.id);
    }

    #[test]
    fn missing_session_is_not_found() {
        let repo = repo();
        let err = repo.get_by_id(&SessionId::from_raw("sess_missing")).unwrap_err();
        assert!(err.is_not_found(), "got {err:?}");
        assert!(repo.get_by_name("nobody").unwrap_err().is_not_found());
        assert!(repo.delete(&SessionId::from_raw("sess_missing")).unwrap_err().is_not_found());
        assert!(repo
            .update_status(&SessionId::from_raw("sess_missing"), SessionStatus::Connected)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn duplicate_name_conflicts() {
        let repo = repo();
        repo.create(&Session::new("dup")).unwrap();
        let err = repo.create(&Session::new("dup")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got {err:?}");
        assert!(repo.exists_by_name("dup").unwrap());
        assert!(!repo.exists_by_name("other").unwrap());
    }

    #[test]
    fn update_round_trips_config() {
        let repo = repo();
        let mut session = Session::new("ops");
        repo.create(&session).unwrap();

        session.proxy = Some(
            ProxyConfig::parse("socks5", "10.1.1.1", 1080, Some("u".into()), Some("p".into()))
                .unwrap(),
        );
        session.webhook = WebhookConfig {
            url: Some("http://hooks.local/primary".into()),
            events: vec!["Message".into(), "Receipt".into()],
            mirror_url: Some("http://hooks.local/mirror".into()),
        };
        repo.update(&session).unwrap();

        let fetched = repo.get_by_id(&session.id).unwrap();
        assert_eq!(fetched.proxy, session.proxy);
        assert_eq!(fetched.webhook, session.webhook);
    }

    #[test]
    fn sessions_with_device_identity_skips_unpaired() {
        let repo = repo();
        repo.create(&paired("a", "111@s.whatsapp.net")).unwrap();
        repo.create(&Session::new("b")).unwrap();
        repo.create(&paired("c", "333@s.whatsapp.net")).unwrap();

        let names: Vec<String> = repo
            .get_sessions_with_device_identity()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"c".to_string()));
        assert_eq!(repo.list().unwrap().len(), 3);
    }

    #[test]
    fn set_device_keeps_phone_when_absent() {
        let repo = repo();
        let session = Session::new("phone");
        repo.create(&session).unwrap();

        repo.set_device(&session.id, "5511@s.whatsapp.net", Some("5511")).unwrap();
        let fetched = repo.get_by_id(&session.id).unwrap();
        assert_eq!(fetched.device_jid, "5511@s.whatsapp.net");
        assert_eq!(fetched.phone.as_deref(), Some("5511"));

        repo.set_device(&session.id, "", None).unwrap();
        let cleared = repo.get_by_id(&session.id).unwrap();
        assert!(cleared.device_jid.is_empty());
        assert_eq!(cleared.phone.as_deref(), Some("5511"));
    }

    #[test]
    fn update_status_persists() {
        let repo = repo();
        let session = Session::new("status");
        repo.create(&session).unwrap();
        repo.update_status(&session.id, SessionStatus::Connecting).unwrap();
        assert_eq!(repo.get_by_id(&session.id).unwrap().status, SessionStatus::Connecting);
    }

    #[test]
    fn corrupt_status_is_reported() {
        let db = Database::in_memory().unwrap();
        let repo = SessionRepo::new(db.clone());
        let session = Session::new("corrupt");
        repo.create(&session).unwrap();
        db.with_conn(|conn| {
            conn.execute("UPDATE sessions SET status = 'paired'", [])?;
            Ok(())
        })
        .unwrap();

        let err = repo.get_by_id(&session.id).unwrap_err();
        assert!(matches!(
            err,
            StoreError::CorruptRow { table: "sessions", column: "status", .. }
        ));
    }

    #[test]
    fn delete_removes_row() {
        let repo = repo();
        let session = Session::new("gone");
        repo.create(&session).unwrap();
        repo.delete(&session.id).unwrap();
        assert!(repo.get_by_id(&session.id).unwrap_err().is_not_found());
    }
}
