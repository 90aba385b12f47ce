use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use std::path::PathBuf;

use crate::models::{
    ApplicationMethod, Company, Job, LocationType, NewJob, PositionType,
};
use crate::platform::Platform;

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Ok(Self { conn, path })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobsync") {
            Ok(proj_dirs.data_dir().join("jobsync.db"))
        } else {
            // Fallback to current directory
            Ok(PathBuf::from("jobsync.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                website TEXT,
                job_website TEXT NOT NULL,
                logo TEXT,
                platform TEXT NOT NULL DEFAULT 'unknown'
                    CHECK (platform IN ('greenhouse', 'lever', 'ashby', 'webpage', 'unknown')),
                last_synced_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company_id INTEGER NOT NULL REFERENCES companies(id),
                company TEXT NOT NULL,
                company_logo TEXT,
                title TEXT NOT NULL,
                primary_role TEXT NOT NULL,
                position_type TEXT NOT NULL
                    CHECK (position_type IN ('Full-Time', 'Part-Time', 'Contract')),
                location_type TEXT NOT NULL
                    CHECK (location_type IN ('Remote', 'On Site', 'Hybrid')),
                country TEXT NOT NULL,
                locations TEXT NOT NULL,
                description TEXT NOT NULL,
                keywords TEXT,
                currency TEXT NOT NULL DEFAULT 'USD',
                salary_min INTEGER,
                salary_max INTEGER,
                equity_min REAL,
                equity_max REAL,
                crypto_payment INTEGER NOT NULL DEFAULT 0,
                application_method TEXT NOT NULL
                    CHECK (application_method IN ('Apply by website', 'Apply by email')),
                application_url TEXT,
                application_email TEXT,
                platform TEXT NOT NULL DEFAULT 'webpage',
                published INTEGER NOT NULL DEFAULT 0,
                payment_status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (payment_status IN ('pending', 'paid', 'failed')),
                published_at TEXT,
                expires_at TEXT,
                deprecated INTEGER NOT NULL DEFAULT 0,
                deprecated_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_company ON jobs(company_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_deprecated ON jobs(deprecated);
            -- Second line of defense for the at-most-once-per-URL invariant;
            -- the reconciler's pre-check is the first.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_company_url
                ON jobs(company_id, application_url)
                WHERE deprecated = 0 AND application_url IS NOT NULL;
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='jobs'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "Database not initialized. Run 'jobsync init' first."
            ));
        }
        Ok(())
    }

    // --- Company operations ---

    pub fn create_company(
        &self,
        name: &str,
        website: Option<&str>,
        job_website: &str,
        logo: Option<&str>,
        platform: Platform,
    ) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO companies (name, website, job_website, logo, platform)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![name, website, job_website, logo, platform.as_str()],
            )
            .with_context(|| format!("Failed to create company '{}'", name))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_companies(&self) -> Result<Vec<Company>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, website, job_website, logo, platform, last_synced_at,
                    created_at, updated_at
             FROM companies ORDER BY name",
        )?;
        let rows = stmt.query_map([], Self::row_to_company)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list companies")
    }

    pub fn get_company_by_name(&self, name: &str) -> Result<Option<Company>> {
        let result = self.conn.query_row(
            "SELECT id, name, website, job_website, logo, platform, last_synced_at,
                    created_at, updated_at
             FROM companies WHERE LOWER(name) = LOWER(?1)",
            [name],
            Self::row_to_company,
        );
        match result {
            Ok(company) => Ok(Some(company)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Written only at the end of a successful account sync.
    pub fn update_company_sync(&self, id: i64, platform: Platform) -> Result<()> {
        self.conn.execute(
            "UPDATE companies
             SET platform = ?1, last_synced_at = datetime('now'), updated_at = datetime('now')
             WHERE id = ?2",
            params![platform.as_str(), id],
        )?;
        Ok(())
    }

    fn row_to_company(row: &rusqlite::Row) -> rusqlite::Result<Company> {
        Ok(Company {
            id: row.get(0)?,
            name: row.get(1)?,
            website: row.get(2)?,
            job_website: row.get(3)?,
            logo: row.get(4)?,
            platform: Platform::parse(&row.get::<_, String>(5)?),
            last_synced_at: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    // --- Job operations ---

    /// The active working set for one account: everything not yet marked
    /// removed.
    pub fn active_jobs(&self, company_id: i64) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE company_id = ?1 AND deprecated = 0 ORDER BY id",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map([company_id], Self::row_to_job)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to load active jobs")
    }

    pub fn list_jobs(&self, company: Option<&str>, include_removed: bool) -> Result<Vec<Job>> {
        let mut sql = format!("SELECT {} FROM jobs WHERE 1=1", JOB_COLUMNS);
        if !include_removed {
            sql.push_str(" AND deprecated = 0");
        }
        if company.is_some() {
            sql.push_str(" AND LOWER(company) = LOWER(?1)");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(c) = company {
            stmt.query_map([c], Self::row_to_job)?
        } else {
            stmt.query_map([], Self::row_to_job)?
        };
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list jobs")
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let result = self.conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            [id],
            Self::row_to_job,
        );
        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn insert_job(&self, job: &NewJob) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO jobs (
                    company_id, company, company_logo, title, primary_role,
                    position_type, location_type, country, locations, description,
                    keywords, currency, salary_min, salary_max, equity_min,
                    equity_max, crypto_payment, application_method, application_url,
                    platform, published, payment_status, published_at, expires_at
                 ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                    ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24
                 )",
                params![
                    job.company_id,
                    job.company,
                    job.company_logo,
                    job.title,
                    job.primary_role,
                    job.position_type.as_str(),
                    job.location_type.as_str(),
                    job.country,
                    job.locations,
                    job.description,
                    job.keywords,
                    job.currency,
                    job.salary_min,
                    job.salary_max,
                    job.equity_min,
                    job.equity_max,
                    job.crypto_payment,
                    job.application_method.as_str(),
                    job.application_url,
                    job.platform.as_str(),
                    job.published,
                    job.payment_status,
                    job.published_at,
                    job.expires_at,
                ],
            )
            .with_context(|| format!("Failed to save job '{}'", job.title))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Soft removal: the listing stays in the store for audit but leaves the
    /// active working set.
    pub fn deprecate_job(&self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs
             SET deprecated = 1, deprecated_at = datetime('now'), updated_at = datetime('now')
             WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    pub fn set_job_logo(&self, id: i64, logo: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET company_logo = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![logo, id],
        )?;
        Ok(())
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        Ok(Job {
            id: row.get(0)?,
            company_id: row.get(1)?,
            company: row.get(2)?,
            company_logo: row.get(3)?,
            title: row.get(4)?,
            primary_role: row.get(5)?,
            position_type: PositionType::parse(&row.get::<_, String>(6)?)
                .unwrap_or(PositionType::FullTime),
            location_type: LocationType::parse(&row.get::<_, String>(7)?)
                .unwrap_or(LocationType::OnSite),
            country: row.get(8)?,
            locations: row.get(9)?,
            description: row.get(10)?,
            keywords: row.get(11)?,
            currency: row.get(12)?,
            salary_min: row.get(13)?,
            salary_max: row.get(14)?,
            equity_min: row.get(15)?,
            equity_max: row.get(16)?,
            crypto_payment: row.get(17)?,
            application_method: ApplicationMethod::parse(&row.get::<_, String>(18)?)
                .unwrap_or(ApplicationMethod::Website),
            application_url: row.get(19)?,
            application_email: row.get(20)?,
            platform: Platform::parse(&row.get::<_, String>(21)?),
            published: row.get(22)?,
            payment_status: row.get(23)?,
            published_at: row.get(24)?,
            expires_at: row.get(25)?,
            deprecated: row.get(26)?,
            deprecated_at: row.get(27)?,
            created_at: row.get(28)?,
            updated_at: row.get(29)?,
        })
    }
}

const JOB_COLUMNS: &str = "id, company_id, company, company_logo, title, primary_role, \
     position_type, location_type, country, locations, description, keywords, \
     currency, salary_min, salary_max, equity_min, equity_max, crypto_payment, \
     application_method, application_url, application_email, platform, published, \
     payment_status, published_at, expires_at, deprecated, deprecated_at, \
     created_at, updated_at";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApplicationMethod, LocationType, PositionType};

    fn sample_job(company_id: i64, url: &str) -> NewJob {
        NewJob {
            company_id,
            company: "Acme".to_string(),
            company_logo: None,
            title: "Backend Engineer".to_string(),
            primary_role: "Engineering".to_string(),
            position_type: PositionType::FullTime,
            location_type: LocationType::Remote,
            country: "USA".to_string(),
            locations: "Remote".to_string(),
            description: "Build things.".to_string(),
            keywords: None,
            currency: "USD".to_string(),
            salary_min: Some(150_000),
            salary_max: Some(200_000),
            equity_min: None,
            equity_max: None,
            crypto_payment: false,
            application_method: ApplicationMethod::Website,
            application_url: Some(url.to_string()),
            platform: Platform::Greenhouse,
            published: true,
            payment_status: "paid".to_string(),
            published_at: None,
            expires_at: None,
        }
    }

    fn test_company(db: &Database) -> i64 {
        db.create_company(
            "Acme",
            None,
            "https://boards.greenhouse.io/acme",
            None,
            Platform::Unknown,
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_load_active_jobs() {
        let db = Database::open_in_memory().unwrap();
        let company_id = test_company(&db);

        let id = db
            .insert_job(&sample_job(company_id, "https://boards.greenhouse.io/acme/jobs/1"))
            .unwrap();
        let jobs = db.active_jobs(company_id).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, id);
        assert_eq!(jobs[0].position_type, PositionType::FullTime);
        assert_eq!(jobs[0].salary_max, Some(200_000));
        assert!(!jobs[0].deprecated);
    }

    #[test]
    fn test_deprecate_excludes_from_active_set() {
        let db = Database::open_in_memory().unwrap();
        let company_id = test_company(&db);

        let id = db
            .insert_job(&sample_job(company_id, "https://boards.greenhouse.io/acme/jobs/1"))
            .unwrap();
        db.deprecate_job(id).unwrap();

        assert!(db.active_jobs(company_id).unwrap().is_empty());

        // Still present for audit, with the removal timestamp set
        let job = db.get_job(id).unwrap().unwrap();
        assert!(job.deprecated);
        assert!(job.deprecated_at.is_some());
    }

    #[test]
    fn test_unique_index_rejects_duplicate_active_url() {
        let db = Database::open_in_memory().unwrap();
        let company_id = test_company(&db);
        let url = "https://boards.greenhouse.io/acme/jobs/1";

        db.insert_job(&sample_job(company_id, url)).unwrap();
        assert!(db.insert_job(&sample_job(company_id, url)).is_err());
    }

    #[test]
    fn test_deprecated_url_can_be_reused() {
        let db = Database::open_in_memory().unwrap();
        let company_id = test_company(&db);
        let url = "https://boards.greenhouse.io/acme/jobs/1";

        let id = db.insert_job(&sample_job(company_id, url)).unwrap();
        db.deprecate_job(id).unwrap();
        // A listing that reappears upstream after removal is a fresh row
        assert!(db.insert_job(&sample_job(company_id, url)).is_ok());
    }

    #[test]
    fn test_company_lookup_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        test_company(&db);

        assert!(db.get_company_by_name("acme").unwrap().is_some());
        assert!(db.get_company_by_name("ACME").unwrap().is_some());
        assert!(db.get_company_by_name("other").unwrap().is_none());
    }

    #[test]
    fn test_update_company_sync_stamps_platform_and_time() {
        let db = Database::open_in_memory().unwrap();
        let id = test_company(&db);

        db.update_company_sync(id, Platform::Greenhouse).unwrap();
        let company = db.get_company_by_name("Acme").unwrap().unwrap();
        assert_eq!(company.platform, Platform::Greenhouse);
        assert!(company.last_synced_at.is_some());
    }

    #[test]
    fn test_set_job_logo() {
        let db = Database::open_in_memory().unwrap();
        let company_id = test_company(&db);
        let id = db
            .insert_job(&sample_job(company_id, "https://boards.greenhouse.io/acme/jobs/1"))
            .unwrap();

        db.set_job_logo(id, "https://cdn.example.com/acme.png").unwrap();
        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(
            job.company_logo.as_deref(),
            Some("https://cdn.example.com/acme.png")
        );
    }
}
