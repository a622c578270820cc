use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use ticket_desk_core::{
    AuditAction, AuditEntryId, AuditLogEntry, Comment, CommentId, NewComment, NewTicket, NewUser,
    Priority, RequestType, Role, Status, Ticket, TicketId, User, UserId, Visibility,
};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS users (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  email TEXT NOT NULL UNIQUE,
  role TEXT NOT NULL CHECK (role IN ('requester','datamember','admin')),
  invite_token TEXT,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tickets (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  title TEXT NOT NULL,
  description TEXT NOT NULL,
  request_type TEXT NOT NULL CHECK (request_type IN ('BUG','FEATURE','DATA_ACCESS','ACCESS')),
  priority TEXT NOT NULL CHECK (priority IN ('LOW','MEDIUM','HIGH')),
  status TEXT NOT NULL CHECK (status IN ('OPEN','INPROGRESS','RESOLVED','CLOSED')),
  due_date TEXT,
  requester_id INTEGER NOT NULL,
  assigned_to INTEGER,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  FOREIGN KEY (requester_id) REFERENCES users(id),
  FOREIGN KEY (assigned_to) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS ticket_comments (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ticket_id INTEGER NOT NULL,
  author_id INTEGER NOT NULL,
  body TEXT NOT NULL,
  visibility TEXT NOT NULL CHECK (visibility IN ('requester','internal')),
  created_at TEXT NOT NULL,
  FOREIGN KEY (ticket_id) REFERENCES tickets(id),
  FOREIGN KEY (author_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS ticket_audit_log (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ticket_id INTEGER NOT NULL,
  action TEXT NOT NULL CHECK (action IN ('TICKET_CREATED','ASSIGNED','STATUS_CHANGED','COMMENT_ADDED')),
  old_value TEXT,
  new_value TEXT,
  actor_id INTEGER NOT NULL,
  timestamp TEXT NOT NULL,
  FOREIGN KEY (ticket_id) REFERENCES tickets(id),
  FOREIGN KEY (actor_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
CREATE INDEX IF NOT EXISTS idx_tickets_priority ON tickets(priority);
CREATE INDEX IF NOT EXISTS idx_tickets_requester ON tickets(requester_id);
CREATE INDEX IF NOT EXISTS idx_tickets_assigned_to ON tickets(assigned_to);
CREATE INDEX IF NOT EXISTS idx_ticket_comments_ticket ON ticket_comments(ticket_id);
CREATE INDEX IF NOT EXISTS idx_ticket_audit_log_ticket ON ticket_audit_log(ticket_id);
";

const TICKET_COLUMNS: &str = "id, title, description, request_type, priority, status, due_date,
        requester_id, assigned_to, created_at, updated_at";

const DUE_DATE_FORMAT: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day]");

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

impl SqliteStore {
    /// Open a SQLite-backed ticket store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;

        if version < 1 {
            self.conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&self.conn, 1)?;
        }

        let version = current_schema_version(&self.conn)?;
        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Persist a new user row and return it with its assigned id.
    ///
    /// # Errors
    /// Returns an error on constraint violations (duplicate email) or write failure.
    pub fn insert_user(&mut self, user: &NewUser) -> Result<User> {
        let now = OffsetDateTime::now_utc();
        self.conn
            .execute(
                "INSERT INTO users(name, email, role, invite_token, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.name,
                    user.email,
                    user.role.as_str(),
                    user.invite_token,
                    rfc3339(now)?
                ],
            )
            .context("failed to insert user")?;

        Ok(User {
            id: UserId(self.conn.last_insert_rowid()),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            invite_token: user.invite_token.clone(),
            created_at: now,
        })
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn user_by_id(&self, id: UserId) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, email, role, invite_token, created_at FROM users WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id.0])?;
        match rows.next()? {
            Some(row) => Ok(Some(map_user_row(row)?)),
            None => Ok(None),
        }
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, email, role, invite_token, created_at FROM users WHERE email = ?1",
        )?;
        let mut rows = stmt.query(params![email])?;
        match rows.next()? {
            Some(row) => Ok(Some(map_user_row(row)?)),
            None => Ok(None),
        }
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, email, role, invite_token, created_at FROM users ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            users.push(map_user_row(row)?);
        }
        Ok(users)
    }

    /// Persist a resolved ticket row and return it with its assigned id and
    /// server-set timestamps.
    ///
    /// # Errors
    /// Returns an error on constraint violations or write failure.
    pub fn insert_ticket(&mut self, ticket: &NewTicket) -> Result<Ticket> {
        let now = OffsetDateTime::now_utc();
        let now_text = rfc3339(now)?;
        self.conn
            .execute(
                "INSERT INTO tickets(
                    title, description, request_type, priority, status, due_date,
                    requester_id, assigned_to, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    ticket.title,
                    ticket.description,
                    ticket.request_type.as_str(),
                    ticket.priority.as_str(),
                    ticket.status.as_str(),
                    ticket.due_date.map(format_due_date).transpose()?,
                    ticket.requester.0,
                    ticket.assigned_to.map(|id| id.0),
                    now_text,
                    now_text,
                ],
            )
            .context("failed to insert ticket")?;

        Ok(Ticket {
            id: TicketId(self.conn.last_insert_rowid()),
            title: ticket.title.clone(),
            description: ticket.description.clone(),
            request_type: ticket.request_type,
            priority: ticket.priority,
            status: ticket.status,
            due_date: ticket.due_date,
            requester: ticket.requester,
            assigned_to: ticket.assigned_to,
            created_at: now,
            updated_at: now,
        })
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn ticket_by_id(&self, id: TicketId) -> Result<Option<Ticket>> {
        let query = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1");
        let mut stmt = self.conn.prepare(&query)?;
        let mut rows = stmt.query(params![id.0])?;
        match rows.next()? {
            Some(row) => Ok(Some(map_ticket_row(row)?)),
            None => Ok(None),
        }
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_tickets(&self) -> Result<Vec<Ticket>> {
        let query = format!("SELECT {TICKET_COLUMNS} FROM tickets ORDER BY id ASC");
        self.query_tickets(&query, params![])
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_unassigned(&self) -> Result<Vec<Ticket>> {
        let query =
            format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE assigned_to IS NULL ORDER BY id ASC");
        self.query_tickets(&query, params![])
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_assigned_to(&self, user: UserId) -> Result<Vec<Ticket>> {
        let query =
            format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE assigned_to = ?1 ORDER BY id ASC");
        self.query_tickets(&query, params![user.0])
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_requested_by(&self, user: UserId) -> Result<Vec<Ticket>> {
        let query =
            format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE requester_id = ?1 ORDER BY id ASC");
        self.query_tickets(&query, params![user.0])
    }

    /// Set the assignee and status of a ticket, guarded by the `updated_at`
    /// value the caller previously read. Returns false when no row matched,
    /// meaning the ticket changed underneath the caller (or does not exist).
    ///
    /// # Errors
    /// Returns an error when the update statement fails.
    pub fn update_assignment(
        &mut self,
        id: TicketId,
        assignee: Option<UserId>,
        status: Status,
        expected_updated_at: OffsetDateTime,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE tickets SET assigned_to = ?1, status = ?2, updated_at = ?3
                 WHERE id = ?4 AND updated_at = ?5",
                params![
                    assignee.map(|id| id.0),
                    status.as_str(),
                    rfc3339(OffsetDateTime::now_utc())?,
                    id.0,
                    rfc3339(expected_updated_at)?,
                ],
            )
            .context("failed to update ticket assignment")?;
        Ok(changed == 1)
    }

    /// Set the status of a ticket, guarded like [`Self::update_assignment`].
    ///
    /// # Errors
    /// Returns an error when the update statement fails.
    pub fn update_status(
        &mut self,
        id: TicketId,
        status: Status,
        expected_updated_at: OffsetDateTime,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE tickets SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND updated_at = ?4",
                params![
                    status.as_str(),
                    rfc3339(OffsetDateTime::now_utc())?,
                    id.0,
                    rfc3339(expected_updated_at)?,
                ],
            )
            .context("failed to update ticket status")?;
        Ok(changed == 1)
    }

    /// Persist a comment and return it with its assigned id.
    ///
    /// # Errors
    /// Returns an error on constraint violations or write failure.
    pub fn insert_comment(&mut self, comment: &NewComment) -> Result<Comment> {
        let now = OffsetDateTime::now_utc();
        self.conn
            .execute(
                "INSERT INTO ticket_comments(ticket_id, author_id, body, visibility, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    comment.ticket_id.0,
                    comment.author.0,
                    comment.body,
                    comment.visibility.as_str(),
                    rfc3339(now)?,
                ],
            )
            .context("failed to insert comment")?;

        Ok(Comment {
            id: CommentId(self.conn.last_insert_rowid()),
            ticket_id: comment.ticket_id,
            author: comment.author,
            body: comment.body.clone(),
            visibility: comment.visibility,
            created_at: now,
        })
    }

    /// All comments on a ticket, oldest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn comments_for_ticket(&self, ticket: TicketId) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticket_id, author_id, body, visibility, created_at
             FROM ticket_comments
             WHERE ticket_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let mut rows = stmt.query(params![ticket.0])?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next()? {
            comments.push(map_comment_row(row)?);
        }
        Ok(comments)
    }

    /// Append one audit record. Runs as a single autocommit statement so the
    /// record is durable independent of any surrounding mutation; callers must
    /// not invoke this inside an open transaction.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub fn append_audit(
        &mut self,
        ticket: TicketId,
        action: AuditAction,
        old_value: Option<&str>,
        new_value: Option<&str>,
        actor: UserId,
    ) -> Result<AuditLogEntry> {
        let now = OffsetDateTime::now_utc();
        self.conn
            .execute(
                "INSERT INTO ticket_audit_log(ticket_id, action, old_value, new_value, actor_id, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![ticket.0, action.as_str(), old_value, new_value, actor.0, rfc3339(now)?],
            )
            .context("failed to append audit record")?;

        Ok(AuditLogEntry {
            id: AuditEntryId(self.conn.last_insert_rowid()),
            ticket_id: ticket,
            action,
            old_value: old_value.map(str::to_string),
            new_value: new_value.map(str::to_string),
            actor,
            timestamp: now,
        })
    }

    /// Full audit history for a ticket, newest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn audit_history(&self, ticket: TicketId) -> Result<Vec<AuditLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticket_id, action, old_value, new_value, actor_id, timestamp
             FROM ticket_audit_log
             WHERE ticket_id = ?1
             ORDER BY timestamp DESC, id DESC",
        )?;
        let mut rows = stmt.query(params![ticket.0])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(map_audit_row(row)?);
        }
        Ok(entries)
    }

    fn query_tickets(&self, query: &str, args: impl rusqlite::Params) -> Result<Vec<Ticket>> {
        let mut stmt = self.conn.prepare(query)?;
        let mut rows = stmt.query(args)?;
        let mut tickets = Vec::new();
        while let Some(row) = rows.next()? {
            tickets.push(map_ticket_row(row)?);
        }
        Ok(tickets)
    }
}

fn map_user_row(row: &Row<'_>) -> Result<User> {
    let role_raw: String = row.get(3)?;
    Ok(User {
        id: UserId(row.get(0)?),
        name: row.get(1)?,
        email: row.get(2)?,
        role: Role::parse(&role_raw).ok_or_else(|| anyhow!("unknown role: {role_raw}"))?,
        invite_token: row.get(4)?,
        created_at: parse_rfc3339(&row.get::<_, String>(5)?)?,
    })
}

fn map_ticket_row(row: &Row<'_>) -> Result<Ticket> {
    let request_type_raw: String = row.get(3)?;
    let priority_raw: String = row.get(4)?;
    let status_raw: String = row.get(5)?;
    let due_date_raw: Option<String> = row.get(6)?;

    Ok(Ticket {
        id: TicketId(row.get(0)?),
        title: row.get(1)?,
        description: row.get(2)?,
        request_type: RequestType::parse(&request_type_raw)
            .ok_or_else(|| anyhow!("unknown request_type: {request_type_raw}"))?,
        priority: Priority::parse(&priority_raw)
            .ok_or_else(|| anyhow!("unknown priority: {priority_raw}"))?,
        status: Status::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown status: {status_raw}"))?,
        due_date: due_date_raw.as_deref().map(parse_due_date).transpose()?,
        requester: UserId(row.get(7)?),
        assigned_to: row.get::<_, Option<i64>>(8)?.map(UserId),
        created_at: parse_rfc3339(&row.get::<_, String>(9)?)?,
        updated_at: parse_rfc3339(&row.get::<_, String>(10)?)?,
    })
}

fn map_comment_row(row: &Row<'_>) -> Result<Comment> {
    let visibility_raw: String = row.get(4)?;
    Ok(Comment {
        id: CommentId(row.get(0)?),
        ticket_id: TicketId(row.get(1)?),
        author: UserId(row.get(2)?),
        body: row.get(3)?,
        visibility: Visibility::parse(&visibility_raw)
            .ok_or_else(|| anyhow!("unknown visibility: {visibility_raw}"))?,
        created_at: parse_rfc3339(&row.get::<_, String>(5)?)?,
    })
}

fn map_audit_row(row: &Row<'_>) -> Result<AuditLogEntry> {
    let action_raw: String = row.get(2)?;
    Ok(AuditLogEntry {
        id: AuditEntryId(row.get(0)?),
        ticket_id: TicketId(row.get(1)?),
        action: AuditAction::parse(&action_raw)
            .ok_or_else(|| anyhow!("unknown audit action: {action_raw}"))?,
        old_value: row.get(3)?,
        new_value: row.get(4)?,
        actor: UserId(row.get(5)?),
        timestamp: parse_rfc3339(&row.get::<_, String>(6)?)?,
    })
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = rfc3339(OffsetDateTime::now_utc())?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn format_due_date(value: Date) -> Result<String> {
    value.format(DUE_DATE_FORMAT).context("failed to format due date")
}

fn parse_due_date(value: &str) -> Result<Date> {
    Date::parse(value, DUE_DATE_FORMAT).with_context(|| format!("invalid due date: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_migrated() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    fn seed_user(store: &mut SqliteStore, email: &str, role: Role) -> Result<User> {
        store.insert_user(&NewUser {
            name: email.split('@').next().unwrap_or(email).to_string(),
            email: email.to_string(),
            role,
            invite_token: None,
        })
    }

    fn seed_ticket(store: &mut SqliteStore, requester: UserId) -> Result<Ticket> {
        store.insert_ticket(&NewTicket {
            title: "Printer broken".to_string(),
            description: "It will not turn on".to_string(),
            request_type: RequestType::Bug,
            priority: Priority::High,
            status: Status::Open,
            due_date: None,
            requester,
            assigned_to: None,
        })
    }

    #[test]
    fn migrate_is_idempotent() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        store.migrate()?;

        let status = store.schema_status()?;
        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());
        Ok(())
    }

    #[test]
    fn ticket_round_trips_through_rows() -> Result<()> {
        let mut store = open_migrated()?;
        let requester = seed_user(&mut store, "dana@example.com", Role::Requester)?;

        let due = ticket_desk_core::parse_due_date("2099-01-01");
        let inserted = store.insert_ticket(&NewTicket {
            title: "Access request".to_string(),
            description: "Need the reporting share".to_string(),
            request_type: RequestType::Access,
            priority: Priority::Medium,
            status: Status::Open,
            due_date: due,
            requester: requester.id,
            assigned_to: None,
        })?;

        let loaded = store.ticket_by_id(inserted.id)?;
        assert_eq!(loaded.as_ref().map(|t| t.title.as_str()), Some("Access request"));
        assert_eq!(loaded.as_ref().and_then(|t| t.due_date), due);
        assert_eq!(loaded.as_ref().map(|t| t.status), Some(Status::Open));
        assert_eq!(loaded.and_then(|t| t.assigned_to), None);
        Ok(())
    }

    #[test]
    fn duplicate_email_is_rejected() -> Result<()> {
        let mut store = open_migrated()?;
        seed_user(&mut store, "dana@example.com", Role::Requester)?;
        let duplicate = seed_user(&mut store, "dana@example.com", Role::DataMember);
        assert!(duplicate.is_err());
        Ok(())
    }

    #[test]
    fn enum_check_constraints_reject_unknown_labels() -> Result<()> {
        let store = open_migrated()?;
        let result = store.conn.execute(
            "INSERT INTO users(name, email, role, invite_token, created_at)
             VALUES ('x', 'x@example.com', 'superuser', NULL, '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn guarded_update_with_stale_version_changes_nothing() -> Result<()> {
        let mut store = open_migrated()?;
        let requester = seed_user(&mut store, "dana@example.com", Role::Requester)?;
        let member = seed_user(&mut store, "sam@example.com", Role::DataMember)?;
        let ticket = seed_ticket(&mut store, requester.id)?;

        let applied = store.update_assignment(
            ticket.id,
            Some(member.id),
            Status::InProgress,
            ticket.updated_at,
        )?;
        assert!(applied);

        // The first update bumped updated_at, so the original read is stale.
        let stale =
            store.update_status(ticket.id, Status::Resolved, ticket.updated_at)?;
        assert!(!stale);

        let current = store.ticket_by_id(ticket.id)?;
        assert_eq!(current.as_ref().map(|t| t.status), Some(Status::InProgress));
        assert_eq!(current.and_then(|t| t.assigned_to), Some(member.id));
        Ok(())
    }

    #[test]
    fn unassigned_and_assigned_listings_partition_tickets() -> Result<()> {
        let mut store = open_migrated()?;
        let requester = seed_user(&mut store, "dana@example.com", Role::Requester)?;
        let member = seed_user(&mut store, "sam@example.com", Role::DataMember)?;

        let first = seed_ticket(&mut store, requester.id)?;
        let second = seed_ticket(&mut store, requester.id)?;
        store.update_assignment(second.id, Some(member.id), Status::InProgress, second.updated_at)?;

        let unassigned = store.list_unassigned()?;
        assert_eq!(unassigned.iter().map(|t| t.id).collect::<Vec<_>>(), vec![first.id]);

        let mine = store.list_assigned_to(member.id)?;
        assert_eq!(mine.iter().map(|t| t.id).collect::<Vec<_>>(), vec![second.id]);
        Ok(())
    }

    #[test]
    fn comments_come_back_oldest_first() -> Result<()> {
        let mut store = open_migrated()?;
        let requester = seed_user(&mut store, "dana@example.com", Role::Requester)?;
        let ticket = seed_ticket(&mut store, requester.id)?;

        for body in ["first", "second", "third"] {
            store.insert_comment(&NewComment {
                ticket_id: ticket.id,
                author: requester.id,
                body: body.to_string(),
                visibility: Visibility::RequesterVisible,
            })?;
        }

        let comments = store.comments_for_ticket(ticket.id)?;
        let bodies = comments.iter().map(|c| c.body.as_str()).collect::<Vec<_>>();
        assert_eq!(bodies, vec!["first", "second", "third"]);
        Ok(())
    }

    #[test]
    fn audit_history_is_newest_first() -> Result<()> {
        let mut store = open_migrated()?;
        let requester = seed_user(&mut store, "dana@example.com", Role::Requester)?;
        let ticket = seed_ticket(&mut store, requester.id)?;

        store.append_audit(ticket.id, AuditAction::TicketCreated, None, Some("OPEN"), requester.id)?;
        store.append_audit(
            ticket.id,
            AuditAction::StatusChanged,
            Some("OPEN"),
            Some("INPROGRESS"),
            requester.id,
        )?;

        let history = store.audit_history(ticket.id)?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, AuditAction::StatusChanged);
        assert_eq!(history[1].action, AuditAction::TicketCreated);
        Ok(())
    }
}
