//! Instance-scoped persistence: jobs, events and configuration, in one
//! SQLite database per server process.

use crate::events::Event;
use crate::instance::InstanceConfig;
use caravel_schema::{InstanceId, Job, JobId, ResourceId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, DbError> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                instance_id TEXT NOT NULL,
                job_id TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (instance_id, job_id)
            );
            CREATE TABLE IF NOT EXISTS events (
                instance_id TEXT NOT NULL,
                event_id TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (instance_id, event_id)
            );
            CREATE INDEX IF NOT EXISTS events_by_time
                ON events (instance_id, created_at);
            CREATE TABLE IF NOT EXISTS instance_config (
                instance_id TEXT PRIMARY KEY,
                payload_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn upsert_job(&self, job: &Job) -> Result<(), DbError> {
        let payload = serde_json::to_string(job)?;
        let conn = self.conn.lock().expect("db lock poisoned");
        conn.execute(
            "INSERT INTO jobs (instance_id, job_id, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (instance_id, job_id) DO UPDATE SET payload_json = ?3",
            params![
                job.instance.as_str(),
                job.id.as_str(),
                payload,
                job.submitted_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_job(&self, instance: &InstanceId, id: &JobId) -> Result<Option<Job>, DbError> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload_json FROM jobs WHERE instance_id = ?1 AND job_id = ?2",
                params![instance.as_str(), id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    pub fn log_event(&self, instance: &InstanceId, event: &Event) -> Result<(), DbError> {
        let payload = serde_json::to_string(event)?;
        let conn = self.conn.lock().expect("db lock poisoned");
        conn.execute(
            "INSERT INTO events (instance_id, event_id, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                instance.as_str(),
                event.id,
                payload,
                event.ended_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Events for an instance, newest first, bounded by `[after, before]`
    /// and `limit` (`limit < 0` means unbounded). `service` narrows to
    /// events touching that workload.
    pub fn events(
        &self,
        instance: &InstanceId,
        service: Option<&ResourceId>,
        before: DateTime<Utc>,
        after: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Event>, DbError> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM events
             WHERE instance_id = ?1 AND created_at <= ?2 AND created_at >= ?3
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(
            params![
                instance.as_str(),
                before.to_rfc3339(),
                after.to_rfc3339()
            ],
            |row| row.get::<_, String>(0),
        )?;

        let mut events = Vec::new();
        for payload in rows {
            let event: Event = serde_json::from_str(&payload?)?;
            if let Some(id) = service {
                if !event.resource_ids.contains(id) {
                    continue;
                }
            }
            events.push(event);
            if limit >= 0 && events.len() as i64 >= limit {
                break;
            }
        }
        Ok(events)
    }

    pub fn set_config(
        &self,
        instance: &InstanceId,
        config: &InstanceConfig,
    ) -> Result<(), DbError> {
        let payload = serde_json::to_string(config)?;
        let conn = self.conn.lock().expect("db lock poisoned");
        conn.execute(
            "INSERT INTO instance_config (instance_id, payload_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (instance_id) DO UPDATE SET payload_json = ?2, updated_at = ?3",
            params![instance.as_str(), payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Every instance with a persisted configuration.
    pub fn instance_ids(&self) -> Result<Vec<InstanceId>, DbError> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let mut stmt = conn.prepare("SELECT instance_id FROM instance_config")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for id in rows {
            ids.push(InstanceId::new(id?));
        }
        Ok(ids)
    }

    pub fn get_config(&self, instance: &InstanceId) -> Result<Option<InstanceConfig>, DbError> {
        let conn = self.conn.lock().expect("db lock poisoned");
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload_json FROM instance_config WHERE instance_id = ?1",
                params![instance.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{derive_event_id, EventKind};
    use caravel_schema::{Cause, ImageSpec, JobSpec, JobStatus, ReleaseKind, ReleaseSpec,
        ResourceSpec};

    fn sample_job(instance: &str, id: &str) -> Job {
        Job {
            id: JobId::new(id),
            instance: InstanceId::new(instance),
            submitted_at: Utc::now(),
            cause: Cause::default(),
            spec: JobSpec::Release(ReleaseSpec {
                service_specs: vec![ResourceSpec::All],
                image_spec: ImageSpec::Latest,
                kind: ReleaseKind::Plan,
                excludes: Vec::new(),
            }),
            status: JobStatus::Queued,
            result: None,
            revision: None,
            error: None,
        }
    }

    fn sample_event(instance: &InstanceId, seq: u64, ended_at: &str) -> Event {
        let ended_at: DateTime<Utc> = ended_at.parse().unwrap();
        Event {
            id: derive_event_id(instance, ended_at, seq),
            resource_ids: vec!["default:deployment/web".parse().unwrap()],
            kind: EventKind::Release,
            started_at: ended_at,
            ended_at,
            message: format!("event {seq}"),
            metadata: None,
        }
    }

    #[test]
    fn job_roundtrip_and_update() {
        let db = Database::open_in_memory().unwrap();
        let mut job = sample_job("acme", "job-1");
        db.upsert_job(&job).unwrap();

        job.status = JobStatus::Succeeded;
        db.upsert_job(&job).unwrap();

        let loaded = db
            .get_job(&InstanceId::new("acme"), &JobId::new("job-1"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, JobStatus::Succeeded);
    }

    #[test]
    fn jobs_are_scoped_by_instance() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_job(&sample_job("acme", "job-1")).unwrap();

        let other = db
            .get_job(&InstanceId::new("umbrella"), &JobId::new("job-1"))
            .unwrap();
        assert!(other.is_none());
    }

    #[test]
    fn events_are_newest_first_with_limit() {
        let db = Database::open_in_memory().unwrap();
        let instance = InstanceId::new("acme");
        for (seq, at) in [
            (1, "2025-01-01T00:00:00Z"),
            (2, "2025-02-01T00:00:00Z"),
            (3, "2025-03-01T00:00:00Z"),
        ] {
            db.log_event(&instance, &sample_event(&instance, seq, at))
                .unwrap();
        }

        let events = db
            .events(
                &instance,
                None,
                Utc::now(),
                DateTime::<Utc>::UNIX_EPOCH,
                2,
            )
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "event 3");
        assert_eq!(events[1].message, "event 2");
    }

    #[test]
    fn events_filter_by_service_and_window() {
        let db = Database::open_in_memory().unwrap();
        let instance = InstanceId::new("acme");
        db.log_event(&instance, &sample_event(&instance, 1, "2025-01-01T00:00:00Z"))
            .unwrap();
        let mut other = sample_event(&instance, 2, "2025-02-01T00:00:00Z");
        other.resource_ids = vec!["default:deployment/api".parse().unwrap()];
        db.log_event(&instance, &other).unwrap();

        let web: ResourceId = "default:deployment/web".parse().unwrap();
        let events = db
            .events(&instance, Some(&web), Utc::now(), DateTime::<Utc>::UNIX_EPOCH, -1)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "event 1");

        let windowed = db
            .events(
                &instance,
                None,
                "2025-01-15T00:00:00Z".parse().unwrap(),
                DateTime::<Utc>::UNIX_EPOCH,
                -1,
            )
            .unwrap();
        assert_eq!(windowed.len(), 1);
    }

    #[test]
    fn config_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let instance = InstanceId::new("acme");
        assert!(db.get_config(&instance).unwrap().is_none());

        let config = InstanceConfig {
            git_url: "/tmp/origin.git".to_owned(),
            git_branch: "main".to_owned(),
            git_path: None,
            registry_catalog: None,
            public_ssh_key: None,
        };
        db.set_config(&instance, &config).unwrap();
        let loaded = db.get_config(&instance).unwrap().unwrap();
        assert_eq!(loaded, config);
    }
}
