use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// One booking book per campus. Each tenant gets its own Engine, WAL and
/// compactor. Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

/// Strip everything that could escape the data directory.
fn wal_file_stem(tenant: &str) -> io::Result<String> {
    if tenant.len() > MAX_TENANT_NAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
    }
    let safe_name: String = tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe_name.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
    }
    Ok(safe_name)
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        let stem = wal_file_stem(tenant)?;
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        // Two connections may race to open the same tenant; only one engine
        // may own its WAL file.
        let entry = self.engines.entry(tenant.to_string());
        let engine = match entry {
            dashmap::mapref::entry::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let wal_path = self.data_dir.join(format!("{stem}.wal"));
                let engine = Arc::new(Engine::new(wal_path)?);
                v.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        info!(tenant, "opened tenant");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("hallbook_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn lecture(location_id: Ulid) -> Booking {
        Booking {
            id: Ulid::new(),
            location_id,
            title: "Operating Systems".into(),
            organizer: "CS Dept".into(),
            when: BookingDate::Recurring(Day::Tue),
            start: "10:00".parse().unwrap(),
            end: Some("12:00".parse().unwrap()),
        }
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = TenantManager::new(dir, 1000);

        let north = tm.get_or_create("north_campus").unwrap();
        let south = tm.get_or_create("south_campus").unwrap();

        // Same hall id in both campuses
        let hall = Ulid::new();
        north.create_location(hall, None).await.unwrap();
        south.create_location(hall, None).await.unwrap();

        north.create_booking(lecture(hall)).await.unwrap();

        let south_grid = south.weekly_grid(Some(hall), None).await.unwrap();
        assert!(south_grid.is_empty());

        let north_grid = north.weekly_grid(Some(hall), None).await.unwrap();
        assert_eq!(north_grid.rows().count(), 2);

        // The same slot is still free on the other campus
        south.create_booking(lecture(hall)).await.unwrap();
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000);

        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        let _eng = tm.get_or_create("main").unwrap();
        assert!(dir.join("main.wal").exists());
        assert_eq!(tm.tenant_count(), 1);
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = TenantManager::new(dir, 1000);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000);

        let _eng = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        assert!(tm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = TenantManager::new(dir, 1000);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_reopens_from_wal() {
        let dir = test_data_dir("reopen");
        let hall = Ulid::new();
        {
            let tm = TenantManager::new(dir.clone(), 1000);
            let eng = tm.get_or_create("campus").unwrap();
            eng.create_location(hall, Some("Auditorium".into())).await.unwrap();
            eng.create_booking(lecture(hall)).await.unwrap();
        }

        let tm = TenantManager::new(dir, 1000);
        let eng = tm.get_or_create("campus").unwrap();
        let locations = eng.list_locations().await;
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].booking_count, 1);
    }
}
