use anyhow::{Context, Result};
use casabot_core::advisor::{HistoryTurn, Role};
use casabot_core::listing::Listing;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared database state
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

/// A stored message with its timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub item_ids: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewLead<'a> {
    pub session_id: &'a str,
    pub name: &'a str,
    pub phone: &'a str,
    pub email: Option<&'a str>,
    pub property_id: Option<&'a str>,
}

impl Db {
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ── Conversations ──────────────────────────────────────────────────

    pub fn create_conversation(&self, session_id: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO conversations (session_id) VALUES (?1)",
            params![session_id],
        )?;
        Ok(())
    }

    /// Latest transcript snapshot, `None` for an unknown session.
    pub fn get_conversation(&self, session_id: &str) -> Result<Option<Vec<HistoryTurn>>> {
        let entries: Option<String> = self
            .conn()
            .query_row(
                "SELECT entries FROM conversations WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        entries
            .map(|raw| serde_json::from_str(&raw).context("decoding conversation entries"))
            .transpose()
    }

    pub fn update_conversation(&self, session_id: &str, entries: &[HistoryTurn]) -> Result<()> {
        let json = serde_json::to_string(entries)?;
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO conversations (session_id, entries, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(session_id) DO UPDATE SET entries=excluded.entries, updated_at=excluded.updated_at",
            params![session_id, json, now],
        )?;
        Ok(())
    }

    // ── Messages ───────────────────────────────────────────────────────

    pub fn create_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        item_ids: &[String],
    ) -> Result<i64> {
        let ids = serde_json::to_string(item_ids)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO messages (session_id, role, content, item_ids, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, role.as_str(), content, ids, now],
        )
        .with_context(|| format!("storing {} message for {session_id}", role.as_str()))?;
        Ok(conn.last_insert_rowid())
    }

    /// The last `limit` messages of a session, oldest first.
    pub fn get_history(&self, session_id: &str, limit: usize) -> Result<Vec<HistoryTurn>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, item_ids, created_at FROM ( \
               SELECT * FROM messages WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2 \
             ) ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id, limit], row_to_message)?;
        let mut result = Vec::new();
        for row in rows {
            let record = row?;
            result.push(HistoryTurn {
                role: record.role,
                content: record.content,
                item_ids: record.item_ids,
            });
        }
        Ok(result)
    }

    /// Every message of a session, oldest first.
    pub fn list_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, item_ids, created_at \
             FROM messages WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], row_to_message)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // ── Leads ──────────────────────────────────────────────────────────

    pub fn create_lead(&self, lead: &NewLead<'_>) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO leads (id, session_id, name, phone, email, property_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &id,
                lead.session_id,
                lead.name,
                lead.phone,
                lead.email,
                lead.property_id,
                &now
            ],
        )?;
        Ok(id)
    }

    pub fn has_lead(&self, session_id: &str) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT COUNT(*) > 0 FROM leads WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    // ── Listings ───────────────────────────────────────────────────────

    pub fn upsert_listing(&self, listing: &Listing) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO listings \
             (id, title, neighborhood, city, price, bedrooms, area_m2, description, image_url, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(id) DO UPDATE SET \
              title=excluded.title, neighborhood=excluded.neighborhood, city=excluded.city, \
              price=excluded.price, bedrooms=excluded.bedrooms, area_m2=excluded.area_m2, \
              description=excluded.description, image_url=excluded.image_url, \
              updated_at=excluded.updated_at",
            params![
                &listing.id,
                &listing.title,
                &listing.neighborhood,
                &listing.city,
                i64::try_from(listing.price).unwrap_or(i64::MAX),
                listing.bedrooms,
                f64::from(listing.area_m2),
                &listing.description,
                &listing.image_url,
                &now,
            ],
        )?;
        Ok(())
    }

    pub fn list_listings(&self) -> Result<Vec<Listing>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, title, neighborhood, city, price, bedrooms, area_m2, description, image_url \
             FROM listings ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], row_to_listing)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn get_listing(&self, id: &str) -> Result<Option<Listing>> {
        let listing = self
            .conn()
            .query_row(
                "SELECT id, title, neighborhood, city, price, bedrooms, area_m2, description, image_url \
                 FROM listings WHERE id = ?1",
                params![id],
                row_to_listing,
            )
            .optional()?;
        Ok(listing)
    }

    /// Import a JSON array of listings, returning how many were upserted.
    pub fn import_listings(&self, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading listings from {}", path.display()))?;
        let listings: Vec<Listing> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing listings from {}", path.display()))?;
        for listing in &listings {
            self.upsert_listing(listing)?;
        }
        Ok(listings.len())
    }
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRecord> {
    let role: String = row.get(2)?;
    let item_ids: String = row.get(4)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: Role::parse(&role).unwrap_or(Role::Assistant),
        content: row.get(3)?,
        item_ids: serde_json::from_str(&item_ids).unwrap_or_default(),
        created_at: row.get(5)?,
    })
}

fn row_to_listing(row: &rusqlite::Row) -> rusqlite::Result<Listing> {
    let price: i64 = row.get(4)?;
    let area: f64 = row.get(6)?;
    Ok(Listing {
        id: row.get(0)?,
        title: row.get(1)?,
        neighborhood: row.get(2)?,
        city: row.get(3)?,
        price: u64::try_from(price).unwrap_or(0),
        bedrooms: row.get(5)?,
        area_m2: area as f32,
        description: row.get(7)?,
        image_url: row.get(8)?,
    })
}

/// Initialize the database: open connection, enable WAL, run migrations
pub fn init_db(data_dir: &Path) -> Result<Db> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("casabot.db");
    let conn = Connection::open(&db_path).context("opening SQLite database")?;

    // Enable WAL mode for better concurrent read performance
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    run_migrations(&conn)?;

    Ok(Db {
        conn: Arc::new(Mutex::new(conn)),
    })
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let migrations = vec![("0001_init", include_str!("../../../migrations/0001_init.sql"))];

    for (name, sql) in migrations {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !already_applied {
            conn.execute_batch(sql)
                .with_context(|| format!("running migration {name}"))?;
            conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])?;
            tracing::info!("Applied migration: {name}");
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) fn test_db() -> (tempfile::TempDir, Db) {
    let dir = tempfile::tempdir().unwrap();
    let db = init_db(dir.path()).unwrap();
    (dir, db)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(id: &str, title: &str) -> Listing {
        Listing {
            id: id.to_string(),
            title: title.to_string(),
            neighborhood: "Pinheiros".to_string(),
            city: "São Paulo".to_string(),
            price: 990_000,
            bedrooms: 2,
            area_m2: 78.5,
            description: "Reformado".to_string(),
            image_url: None,
        }
    }

    #[test]
    fn test_open_and_migrate_twice() {
        let dir = tempfile::tempdir().unwrap();
        init_db(dir.path()).unwrap();
        // Second open must not re-run the migration.
        init_db(dir.path()).unwrap();
    }

    #[test]
    fn test_history_is_chronological_and_bounded() {
        let (_dir, db) = test_db();
        db.create_conversation("s1").unwrap();
        for i in 0..5 {
            db.create_message("s1", Role::User, &format!("u{i}"), &[]).unwrap();
            db.create_message("s1", Role::Assistant, &format!("a{i}"), &[format!("p{i}")])
                .unwrap();
        }

        let history = db.get_history("s1", 3).unwrap();
        let contents: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["a3", "u4", "a4"]);
        assert_eq!(history[2].item_ids, vec!["p4"]);
        assert_eq!(history[1].role, Role::User);

        assert_eq!(db.list_messages("s1").unwrap().len(), 10);
        assert!(db.get_history("other", 10).unwrap().is_empty());
    }

    #[test]
    fn test_message_requires_conversation() {
        let (_dir, db) = test_db();
        assert!(db.create_message("ghost", Role::User, "oi", &[]).is_err());
    }

    #[test]
    fn test_conversation_snapshot() {
        let (_dir, db) = test_db();
        assert_eq!(db.get_conversation("s1").unwrap(), None);
        db.create_conversation("s1").unwrap();
        assert_eq!(db.get_conversation("s1").unwrap(), Some(vec![]));

        let entries = vec![HistoryTurn {
            role: Role::Assistant,
            content: "Olá!".into(),
            item_ids: vec!["p1".into()],
        }];
        db.update_conversation("s1", &entries).unwrap();
        assert_eq!(db.get_conversation("s1").unwrap(), Some(entries));
    }

    #[test]
    fn test_leads() {
        let (_dir, db) = test_db();
        assert!(!db.has_lead("s1").unwrap());
        let id = db
            .create_lead(&NewLead {
                session_id: "s1",
                name: "Ana",
                phone: "11999990000",
                email: None,
                property_id: Some("p1"),
            })
            .unwrap();
        assert!(!id.is_empty());
        assert!(db.has_lead("s1").unwrap());
    }

    #[test]
    fn test_listing_upsert_and_import() {
        let (dir, db) = test_db();
        db.upsert_listing(&listing("p1", "Apto")).unwrap();
        db.upsert_listing(&listing("p1", "Apto reformado")).unwrap();
        assert_eq!(db.list_listings().unwrap().len(), 1);
        assert_eq!(db.get_listing("p1").unwrap().unwrap().title, "Apto reformado");
        assert_eq!(db.get_listing("nope").unwrap(), None);

        let path = dir.path().join("listings.json");
        let json = serde_json::to_string(&vec![listing("p2", "Casa"), listing("p3", "Loft")]).unwrap();
        std::fs::write(&path, json).unwrap();
        assert_eq!(db.import_listings(&path).unwrap(), 2);

        let all = db.list_listings().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1], listing("p2", "Casa"));
    }
}
