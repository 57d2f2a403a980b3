use rusqlite::{Connection, Result as SqlResult, Row, params};
use std::path::Path;

use crate::common::{Boundary, Message, MessageBody, MessageId, Page};

const SELECT_COLUMNS: &str = "SELECT id, sender_id, sender_name, body, created_at FROM messages";

/// Append-only message log stored in SQLite
pub struct MessageLogDb {
    conn: Connection,
}

impl MessageLogDb {
    /// Open (or create) the log at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let log_db = Self {
            conn: Connection::open(path)?,
        };
        log_db.init_schema()?;
        Ok(log_db)
    }

    pub fn in_memory() -> SqlResult<Self> {
        let log_db = Self {
            conn: Connection::open_in_memory()?,
        };
        log_db.init_schema()?;
        Ok(log_db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        let conn = &self.conn;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_order ON messages(created_at, id)",
            [],
        )?;

        Ok(())
    }

    /// Insert a message; returns false if the id already exists
    pub fn append(&self, message: &Message) -> SqlResult<bool> {
        let conn = &self.conn;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO messages (id, sender_id, sender_name, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.as_str(),
                message.sender_id,
                message.sender_display_name,
                message.body.to_wire(),
                message.created_at
            ],
        )?;
        Ok(changed > 0)
    }

    /// Up to `limit` messages strictly older than `boundary`, oldest first.
    ///
    /// One extra row is read so `has_more` is exact.
    pub fn fetch_older_than(&self, boundary: &Boundary, limit: usize) -> SqlResult<Page> {
        let conn = &self.conn;
        let probe = i64::try_from(limit).unwrap_or(i64::MAX - 1) + 1;

        let mut messages = match boundary {
            Boundary::Latest => {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC LIMIT ?1"
                ))?;
                stmt.query_map(params![probe], message_from_row)?
                    .collect::<SqlResult<Vec<_>>>()?
            }
            Boundary::Before(key) => {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_COLUMNS}
                     WHERE created_at < ?1 OR (created_at = ?1 AND id < ?2)
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?3"
                ))?;
                stmt.query_map(params![key.created_at, key.id.as_str(), probe], message_from_row)?
                    .collect::<SqlResult<Vec<_>>>()?
            }
        };

        let has_more = messages.len() > limit;
        messages.truncate(limit);
        messages.reverse();
        Ok(Page { messages, has_more })
    }

    /// The newest `limit` messages, oldest first
    pub fn tail(&self, limit: usize) -> SqlResult<Vec<Message>> {
        Ok(self.fetch_older_than(&Boundary::Latest, limit)?.messages)
    }

    /// Get message count
    pub fn message_count(&self) -> SqlResult<usize> {
        let conn = &self.conn;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(0, count))
    }
}

fn message_from_row(row: &Row<'_>) -> SqlResult<Message> {
    let body: String = row.get(3)?;
    Ok(Message {
        id: MessageId::new(row.get::<_, String>(0)?),
        sender_id: row.get(1)?,
        sender_display_name: row.get(2)?,
        body: MessageBody::from_wire(&body),
        created_at: row.get(4)?,
    })
}
