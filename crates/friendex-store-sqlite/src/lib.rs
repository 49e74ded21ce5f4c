use std::path::Path;

use anyhow::{anyhow, Context, Result};
use friendex_core::{
    format_storage, normalize_topic, parse_timestamp, rank_topics, validate_name,
    ConversationRecord, Friend, FriendSummary, FriendexError, TopicMatch,
};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use time::PrimitiveDateTime;

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS friends (
  name TEXT PRIMARY KEY,
  last_spoken TEXT
);

CREATE TABLE IF NOT EXISTS friend_records (
  name TEXT,
  last_spoken TEXT,
  topic TEXT
);

CREATE INDEX IF NOT EXISTS idx_friend_records_name ON friend_records(name);
";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a SQLite-backed friend store and set its busy timeout.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;
        Self::configure(conn)
    }

    /// Open a private in-memory store, mostly useful for tests.
    ///
    /// # Errors
    /// Returns an error when `SQLite` cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA busy_timeout = 5000;")
            .context("failed to configure sqlite pragmas")?;
        Ok(Self { conn })
    }

    /// Create the `friends` and `friend_records` tables when absent.
    ///
    /// # Errors
    /// Returns an error when the schema statements fail.
    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL).context("failed to create friend tables")
    }

    /// Insert a new friend and, when a topic is given, its first conversation record.
    ///
    /// Both writes share one transaction.
    ///
    /// # Errors
    /// Returns [`FriendexError::DuplicateFriend`] when the name is taken,
    /// [`FriendexError::Validation`] for a blank name, or a storage error.
    pub fn add_friend(
        &mut self,
        name: &str,
        last_spoken: PrimitiveDateTime,
        topic: Option<&str>,
    ) -> Result<()> {
        validate_name(name)?;
        let stamp = format_storage(last_spoken);
        let topic = normalize_topic(topic);

        let tx = self.conn.transaction().context("failed to start transaction")?;
        if let Err(err) = tx.execute(
            "INSERT INTO friends(name, last_spoken) VALUES (?1, ?2)",
            params![name, stamp],
        ) {
            if is_unique_violation(&err) {
                return Err(FriendexError::DuplicateFriend(name.to_string()).into());
            }
            return Err(anyhow::Error::new(err).context("failed to insert friend"));
        }

        if let Some(topic) = topic.as_deref() {
            append_record(&tx, name, &stamp, Some(topic))?;
        }

        tx.commit().context("failed to commit add transaction")?;
        tracing::debug!("added friend {name} at {stamp}");
        Ok(())
    }

    /// Load every friend in insertion order with its conversation log.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or stored timestamps are unreadable.
    pub fn list_friends(&self, as_of: PrimitiveDateTime) -> Result<Vec<FriendSummary>> {
        self.load_friends()?.into_iter().map(|friend| self.summarize(friend, as_of)).collect()
    }

    /// Set a friend's last-spoken time and append a conversation record, atomically.
    ///
    /// Returns the timestamp that was applied.
    ///
    /// # Errors
    /// Returns [`FriendexError::FriendNotFound`] when no friend has this name, or a storage error.
    pub fn update_last_spoken(
        &mut self,
        name: &str,
        last_spoken: PrimitiveDateTime,
        topic: Option<&str>,
    ) -> Result<PrimitiveDateTime> {
        let stamp = format_storage(last_spoken);
        let topic = normalize_topic(topic);

        let tx = self.conn.transaction().context("failed to start transaction")?;
        let updated = tx
            .execute("UPDATE friends SET last_spoken = ?1 WHERE name = ?2", params![stamp, name])
            .context("failed to update last spoken time")?;
        if updated == 0 {
            return Err(FriendexError::FriendNotFound(name.to_string()).into());
        }

        append_record(&tx, name, &stamp, topic.as_deref())?;
        tx.commit().context("failed to commit update transaction")?;
        tracing::debug!("updated last spoken time for {name} to {stamp}");
        Ok(last_spoken)
    }

    /// Remove a friend and every conversation record filed under its name.
    ///
    /// Returns whether a friend row existed.
    ///
    /// # Errors
    /// Returns an error when either delete or the commit fails.
    pub fn delete_friend(&mut self, name: &str) -> Result<bool> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let removed = tx
            .execute("DELETE FROM friends WHERE name = ?1", params![name])
            .context("failed to delete friend")?;
        let removed_records = tx
            .execute("DELETE FROM friend_records WHERE name = ?1", params![name])
            .context("failed to delete conversation records")?;
        tx.commit().context("failed to commit delete transaction")?;

        tracing::debug!("deleted {removed} friend row(s) and {removed_records} record(s) for {name}");
        Ok(removed > 0)
    }

    /// Look up one friend with the same enrichment as [`SqliteStore::list_friends`].
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or stored timestamps are unreadable.
    pub fn check_friend(
        &self,
        name: &str,
        as_of: PrimitiveDateTime,
    ) -> Result<Option<FriendSummary>> {
        self.find_friend(name)?.map(|friend| self.summarize(friend, as_of)).transpose()
    }

    /// Friends whose whole days since last spoken are at least `min_days`.
    ///
    /// Friends that were never spoken to are skipped.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or stored timestamps are unreadable.
    pub fn search_by_recency(
        &self,
        min_days: i64,
        as_of: PrimitiveDateTime,
    ) -> Result<Vec<FriendSummary>> {
        let mut matches = Vec::new();
        for friend in self.load_friends()? {
            let summary = self.summarize(friend, as_of)?;
            if summary.days_since_spoken.is_some_and(|days| days >= min_days) {
                matches.push(summary);
            }
        }
        Ok(matches)
    }

    /// Rank every conversation record by topic similarity to `query`.
    ///
    /// An empty result means there are no records at all; low scores are still returned.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or stored timestamps are unreadable.
    pub fn search_by_topic(&self, query: &str) -> Result<Vec<TopicMatch>> {
        let records = self.load_records(None)?;
        let ranked = rank_topics(query, records);

        let mut matches = Vec::with_capacity(ranked.len());
        for scored in ranked {
            let name = scored.record.name;
            let last_spoken = match self.find_friend(&name)? {
                Some(friend) => friend.last_spoken,
                None => {
                    tracing::warn!("conversation record for {name} has no matching friend");
                    None
                }
            };
            matches.push(TopicMatch {
                name,
                topic: scored.record.topic,
                score: scored.score,
                last_spoken,
            });
        }
        Ok(matches)
    }

    /// Conversation records filed under `name`, oldest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or stored timestamps are unreadable.
    pub fn records_for(&self, name: &str) -> Result<Vec<ConversationRecord>> {
        self.load_records(Some(name))
    }

    fn summarize(&self, friend: Friend, as_of: PrimitiveDateTime) -> Result<FriendSummary> {
        let records = self.records_for(&friend.name)?;
        Ok(FriendSummary::build(friend, records, as_of))
    }

    fn load_friends(&self) -> Result<Vec<Friend>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, last_spoken FROM friends ORDER BY rowid ASC")
            .context("failed to prepare friend listing")?;
        let mut rows = stmt.query([])?;
        let mut friends = Vec::new();

        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let last_spoken = row.get::<_, Option<String>>(1)?;
            friends.push(Friend {
                last_spoken: last_spoken
                    .as_deref()
                    .map(|raw| decode_timestamp("friends", raw))
                    .transpose()?,
                name,
            });
        }

        Ok(friends)
    }

    fn find_friend(&self, name: &str) -> Result<Option<Friend>> {
        let row = self
            .conn
            .query_row(
                "SELECT name, last_spoken FROM friends WHERE name = ?1",
                params![name],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()
            .with_context(|| format!("failed to look up friend {name}"))?;

        match row {
            Some((name, last_spoken)) => Ok(Some(Friend {
                last_spoken: last_spoken
                    .as_deref()
                    .map(|raw| decode_timestamp("friends", raw))
                    .transpose()?,
                name,
            })),
            None => Ok(None),
        }
    }

    fn load_records(&self, name: Option<&str>) -> Result<Vec<ConversationRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, last_spoken, topic FROM friend_records
                 WHERE ?1 IS NULL OR name = ?1
                 ORDER BY rowid ASC",
            )
            .context("failed to prepare conversation record query")?;
        let mut rows = stmt.query(params![name])?;
        let mut records = Vec::new();

        while let Some(row) = rows.next()? {
            let record_name: String = row.get(0)?;
            let raw = row.get::<_, Option<String>>(1)?.ok_or_else(|| {
                anyhow!("conversation record for {record_name} has no last_spoken value")
            })?;
            records.push(ConversationRecord {
                spoken_at: decode_timestamp("friend_records", &raw)?,
                topic: row.get(2)?,
                name: record_name,
            });
        }

        Ok(records)
    }
}

fn append_record(
    tx: &Transaction<'_>,
    name: &str,
    stamp: &str,
    topic: Option<&str>,
) -> Result<()> {
    tx.execute(
        "INSERT INTO friend_records(name, last_spoken, topic) VALUES (?1, ?2, ?3)",
        params![name, stamp, topic],
    )
    .context("failed to append conversation record")?;
    Ok(())
}

fn decode_timestamp(table: &str, raw: &str) -> Result<PrimitiveDateTime> {
    parse_timestamp(raw).map_err(|_| anyhow!("unrecognized timestamp stored in {table}: {raw}"))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    )
}
