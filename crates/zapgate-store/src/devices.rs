use tracing::instrument;

use zapgate_core::{Device, DeviceKey};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Container of durable device identities.
pub trait DeviceStore: Send + Sync {
    /// Look up a paired device by its JID.
    fn get_device(&self, jid: &str) -> Result<Option<Device>, StoreError>;

    /// Most recently created device registered for a phone number.
    fn get_device_by_phone(&self, phone: &str) -> Result<Option<Device>, StoreError>;

    /// Allocate and persist a brand-new, unpaired identity.
    fn new_device(&self) -> Result<Device, StoreError>;

    /// Insert or update a device (e.g. after pairing assigns its JID).
    fn save_device(&self, device: &Device) -> Result<(), StoreError>;
}

pub struct DeviceRepo {
    db: Database,
}

impl DeviceRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn find(&self, sql: &str, param: &str) -> Result<Option<Device>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([param])?;
            let device = rows.next()?.map(row_to_device).transpose()?;
            Ok(device)
        })
    }
}

impl DeviceStore for DeviceRepo {
    #[instrument(skip(self))]
    fn get_device(&self, jid: &str) -> Result<Option<Device>, StoreError> {
        if jid.is_empty() {
            return Ok(None);
        }
        self.find("SELECT key, jid, phone, created_at FROM devices WHERE jid = ?1", jid)
    }

    #[instrument(skip(self))]
    fn get_device_by_phone(&self, phone: &str) -> Result<Option<Device>, StoreError> {
        if phone.is_empty() {
            return Ok(None);
        }
        self.find(
            "SELECT key, jid, phone, created_at FROM devices WHERE phone = ?1
             ORDER BY created_at DESC LIMIT 1",
            phone,
        )
    }

    #[instrument(skip(self))]
    fn new_device(&self) -> Result<Device, StoreError> {
        let device = Device::new();
        self.save_device(&device)?;
        Ok(device)
    }

    #[instrument(skip(self, device), fields(device_key = %device.key))]
    fn save_device(&self, device: &Device) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO devices (key, jid, phone, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET jid = excluded.jid, phone = excluded.phone",
                rusqlite::params![device.key.as_str(), device.jid, device.phone, device.created_at],
            )?;
            Ok(())
        })
    }
}

fn row_to_device(row: &rusqlite::Row<'_>) -> Result<Device, StoreError> {
    Ok(Device {
        key: DeviceKey::from_raw(row_helpers::get::<String>(row, 0, "devices", "key")?),
        jid: row_helpers::get_opt(row, 1, "devices", "jid")?,
        phone: row_helpers::get_opt(row, 2, "devices", "phone")?,
        created_at: row_helpers::get(row, 3, "devices", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> DeviceRepo {
        DeviceRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn new_device_is_unpaired() {
        let repo = repo();
        let device = repo.new_device().unwrap();
        assert!(device.key.as_str().starts_with("dev_"));
        assert!(device.jid.is_none());
    }

    #[test]
    fn lookup_by_jid_after_pairing() {
        let repo = repo();
        let mut device = repo.new_device().unwrap();
        assert!(repo.get_device("123@s.whatsapp.net").unwrap().is_none());

        device.jid = Some("123@s.whatsapp.net".into());
        device.phone = Some("123".into());
        repo.save_device(&device).unwrap();

        let found = repo.get_device("123@s.whatsapp.net").unwrap().unwrap();
        assert_eq!(found.key, device.key);
        let by_phone = repo.get_device_by_phone("123").unwrap().unwrap();
        assert_eq!(by_phone.key, device.key);
    }

    #[test]
    fn empty_keys_never_match() {
        let repo = repo();
        repo.new_device().unwrap();
        assert!(repo.get_device("").unwrap().is_none());
        assert!(repo.get_device_by_phone("").unwrap().is_none());
    }

    #[test]
    fn jid_is_unique_across_devices() {
        let repo = repo();
        let mut first = repo.new_device().unwrap();
        let mut second = repo.new_device().unwrap();
        first.jid = Some("dup@s.whatsapp.net".into());
        second.jid = Some("dup@s.whatsapp.net".into());
        repo.save_device(&first).unwrap();
        let err = repo.save_device(&second).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got {err:?}");
    }
}
