use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DeskError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conversation session expired")]
    SessionExpired,
    #[error("transient i/o error: {0}")]
    TransientIo(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl DeskError {
    #[must_use]
    pub fn not_found(what: impl Display) -> Self {
        Self::NotFound(what.to_string())
    }

    #[must_use]
    pub fn forbidden(why: impl Display) -> Self {
        Self::Forbidden(why.to_string())
    }

    #[must_use]
    pub fn validation(why: impl Display) -> Self {
        Self::Validation(why.to_string())
    }

    #[must_use]
    pub fn storage(err: impl Display) -> Self {
        Self::Storage(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TicketId(pub i64);

impl TicketId {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        value.trim().parse::<i64>().ok().map(Self)
    }
}

impl Display for TicketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct UserId(pub i64);

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CommentId(pub i64);

impl Display for CommentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AuditEntryId(pub i64);

impl Display for AuditEntryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account roles. `DataMember` is the only role eligible for assignment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Requester,
    DataMember,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::DataMember => "datamember",
            Self::Admin => "admin",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("requester") {
            Some(Self::Requester)
        } else if value.eq_ignore_ascii_case("datamember") {
            Some(Self::DataMember)
        } else if value.eq_ignore_ascii_case("admin") {
            Some(Self::Admin)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_assignable(self) -> bool {
        matches!(self, Self::DataMember)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("low") {
            Some(Self::Low)
        } else if value.eq_ignore_ascii_case("medium") {
            Some(Self::Medium)
        } else if value.eq_ignore_ascii_case("high") {
            Some(Self::High)
        } else {
            None
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Bug,
    Feature,
    DataAccess,
    #[default]
    Access,
}

impl RequestType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bug => "BUG",
            Self::Feature => "FEATURE",
            Self::DataAccess => "DATA_ACCESS",
            Self::Access => "ACCESS",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("bug") {
            Some(Self::Bug)
        } else if value.eq_ignore_ascii_case("feature") {
            Some(Self::Feature)
        } else if value.eq_ignore_ascii_case("data_access") {
            Some(Self::DataAccess)
        } else if value.eq_ignore_ascii_case("access") {
            Some(Self::Access)
        } else {
            None
        }
    }
}

impl Display for RequestType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket lifecycle states. `Open` is initial, `InProgress` is entered only
/// through assignment, and `Closed` accepts no further transitions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum Status {
    #[default]
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "INPROGRESS")]
    InProgress,
    #[serde(rename = "RESOLVED")]
    Resolved,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl Status {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::InProgress => "INPROGRESS",
            Self::Resolved => "RESOLVED",
            Self::Closed => "CLOSED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("open") {
            Some(Self::Open)
        } else if value.eq_ignore_ascii_case("inprogress") {
            Some(Self::InProgress)
        } else if value.eq_ignore_ascii_case("resolved") {
            Some(Self::Resolved)
        } else if value.eq_ignore_ascii_case("closed") {
            Some(Self::Closed)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether an assignee may move a ticket from `self` to `next` via a
    /// status update. Assignment (`Open`/`Resolved` -> `InProgress`) is a
    /// separate operation and is not covered here.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Open => false,
            Self::InProgress => matches!(next, Self::Resolved | Self::Closed),
            Self::Resolved => matches!(next, Self::Closed | Self::InProgress),
            Self::Closed => false,
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comment visibility. `RequesterVisible` comments are readable by the
/// ticket's requester; `Internal` comments are staff-only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[serde(rename = "requester")]
    RequesterVisible,
    Internal,
}

impl Visibility {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequesterVisible => "requester",
            Self::Internal => "internal",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("requester") {
            Some(Self::RequesterVisible)
        } else if value.eq_ignore_ascii_case("internal") {
            Some(Self::Internal)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    TicketCreated,
    Assigned,
    StatusChanged,
    CommentAdded,
}

impl AuditAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TicketCreated => "TICKET_CREATED",
            Self::Assigned => "ASSIGNED",
            Self::StatusChanged => "STATUS_CHANGED",
            Self::CommentAdded => "COMMENT_ADDED",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("ticket_created") {
            Some(Self::TicketCreated)
        } else if value.eq_ignore_ascii_case("assigned") {
            Some(Self::Assigned)
        } else if value.eq_ignore_ascii_case("status_changed") {
            Some(Self::StatusChanged)
        } else if value.eq_ignore_ascii_case("comment_added") {
            Some(Self::CommentAdded)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    /// Present only on auto-provisioned accounts awaiting credential setup.
    pub invite_token: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// An unpersisted user row. `invite_token` is set for accounts provisioned
/// on behalf of an unknown email sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub invite_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticket {
    pub id: TicketId,
    pub title: String,
    pub description: String,
    pub request_type: RequestType,
    pub priority: Priority,
    pub status: Status,
    pub due_date: Option<Date>,
    pub requester: UserId,
    pub assigned_to: Option<UserId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Ticket {
    #[must_use]
    pub fn is_assigned_to(&self, user: UserId) -> bool {
        self.assigned_to == Some(user)
    }
}

/// A resolved, ready-to-persist ticket row (requester already looked up,
/// defaults already applied).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub request_type: RequestType,
    pub priority: Priority,
    pub status: Status,
    pub due_date: Option<Date>,
    pub requester: UserId,
    pub assigned_to: Option<UserId>,
}

/// How a draft refers to its requester before resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequesterRef {
    Id(UserId),
    Email { address: String, name: Option<String> },
}

/// A ticket-shaped record collected by the conversation engine or the text
/// intake parser, prior to creation. Unset enum fields fall back to their
/// defaults at create time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketDraft {
    pub title: String,
    pub description: String,
    pub request_type: Option<RequestType>,
    pub priority: Option<Priority>,
    pub status: Option<Status>,
    pub due_date: Option<Date>,
    pub requester: RequesterRef,
    /// Email address of a pre-assigned user, if the source named one.
    pub assignee_email: Option<String>,
}

impl TicketDraft {
    #[must_use]
    pub fn for_requester(requester: UserId) -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            request_type: None,
            priority: None,
            status: None,
            due_date: None,
            requester: RequesterRef::Id(requester),
            assignee_email: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: CommentId,
    pub ticket_id: TicketId,
    pub author: UserId,
    pub body: String,
    pub visibility: Visibility,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewComment {
    pub ticket_id: TicketId,
    pub author: UserId,
    pub body: String,
    pub visibility: Visibility,
}

/// One immutable record of a mutating action taken against a ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditLogEntry {
    pub id: AuditEntryId,
    pub ticket_id: TicketId,
    pub action: AuditAction,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

const ISO_DATE: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day]");
const SLASH_DATE: &[BorrowedFormatItem<'_>] =
    format_description!("[day padding:none]/[month padding:none]/[year]");
const SLASH_DATE_PADDED: &[BorrowedFormatItem<'_>] = format_description!("[day]/[month]/[year]");

/// Try the supported due-date formats in order and return the first that
/// parses: `2026-08-26`, `26/8/2026`, `26/08/2026`.
#[must_use]
pub fn parse_due_date(value: &str) -> Option<Date> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    for format in [ISO_DATE, SLASH_DATE, SLASH_DATE_PADDED] {
        if let Ok(date) = Date::parse(value, format) {
            return Some(date);
        }
    }
    None
}
