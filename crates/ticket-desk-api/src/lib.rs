use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use ticket_desk_core::{
    AuditAction, AuditLogEntry, Comment, DeskError, NewComment, NewTicket, NewUser, Role, Status,
    Ticket, TicketDraft, TicketId, User, UserId, Visibility,
};
use ticket_desk_store_sqlite::{SchemaStatus, SqliteStore};
use ulid::Ulid;

mod conversation;
mod intake;
mod notify;

pub use intake::{
    draft_from_message, parse_fields, IncomingMessage, IngestReport, MailSource, MaildirSource,
    ParsedFields,
};
pub use notify::{LogNotifier, Notifier};

use conversation::SessionState;

type SessionSlot = Arc<Mutex<Option<SessionState>>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignTicketRequest {
    pub ticket_id: TicketId,
    pub assignee: UserId,
    pub actor: UserId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateStatusRequest {
    pub ticket_id: TicketId,
    pub status: Status,
    pub actor: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddCommentRequest {
    pub ticket_id: TicketId,
    pub author: UserId,
    pub body: String,
    pub visibility: Option<Visibility>,
}

/// The intake-and-lifecycle engine: ticket creation and state changes, the
/// comment thread with its visibility gate, the audit trail, the dialogue
/// engine, and mail ingestion, all over one SQLite store.
pub struct TicketDesk {
    pub(crate) store: Mutex<SqliteStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) mailbox_address: String,
    pub(crate) sessions: Mutex<HashMap<UserId, SessionSlot>>,
    pub(crate) ingest_running: AtomicBool,
}

fn storage(err: anyhow::Error) -> DeskError {
    DeskError::Storage(format!("{err:#}"))
}

fn local_part(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

impl TicketDesk {
    /// Open the engine over a SQLite database, applying pending migrations.
    ///
    /// # Errors
    /// Returns `Storage` when the database cannot be opened or migrated.
    pub fn open(
        db_path: &Path,
        mailbox_address: impl Into<String>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, DeskError> {
        let mut store = SqliteStore::open(db_path).map_err(storage)?;
        store.migrate().map_err(storage)?;

        Ok(Self {
            store: Mutex::new(store),
            notifier,
            mailbox_address: mailbox_address.into(),
            sessions: Mutex::new(HashMap::new()),
            ingest_running: AtomicBool::new(false),
        })
    }

    /// # Errors
    /// Returns `Storage` when schema metadata cannot be read.
    pub fn schema_status(&self) -> Result<SchemaStatus, DeskError> {
        self.store.lock().schema_status().map_err(storage)
    }

    /// Register a user account.
    ///
    /// # Errors
    /// Returns `Validation` for empty fields, a malformed email, or a
    /// duplicate email.
    pub fn create_user(&self, request: CreateUserRequest) -> Result<User, DeskError> {
        let name = request.name.trim();
        let email = request.email.trim();
        if name.is_empty() {
            return Err(DeskError::validation("user name must not be empty"));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(DeskError::validation(format!("invalid email address: {email}")));
        }

        let mut store = self.store.lock();
        if store.user_by_email(email).map_err(storage)?.is_some() {
            return Err(DeskError::validation(format!("email already registered: {email}")));
        }

        store
            .insert_user(&NewUser {
                name: name.to_string(),
                email: email.to_string(),
                role: request.role,
                invite_token: None,
            })
            .map_err(storage)
    }

    /// # Errors
    /// Returns `NotFound` when no user has the given id.
    pub fn user(&self, id: UserId) -> Result<User, DeskError> {
        self.store
            .lock()
            .user_by_id(id)
            .map_err(storage)?
            .ok_or_else(|| DeskError::not_found(format!("user {id}")))
    }

    /// # Errors
    /// Returns `Storage` when the lookup fails.
    pub fn find_user(&self, email: &str) -> Result<Option<User>, DeskError> {
        self.store.lock().user_by_email(email).map_err(storage)
    }

    /// # Errors
    /// Returns `Storage` when the listing fails.
    pub fn list_users(&self) -> Result<Vec<User>, DeskError> {
        self.store.lock().list_users().map_err(storage)
    }

    /// Create a ticket from a draft. The requester reference is resolved
    /// first: an unknown email sender is provisioned as a Requester account
    /// carrying a one-time invite token. Unset enum fields take their
    /// defaults and an empty title becomes "No Subject".
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown requester id, `Validation` for a
    /// malformed requester email, `Storage` on persistence failure.
    pub fn create_ticket(&self, draft: TicketDraft) -> Result<Ticket, DeskError> {
        let (ticket, requester, assignee) = {
            let mut store = self.store.lock();
            let requester = resolve_requester(&mut store, &draft)?;

            let assignee = match draft.assignee_email.as_deref() {
                Some(email) => match store.user_by_email(email).map_err(storage)? {
                    Some(user) if user.role.is_assignable() => Some(user),
                    Some(user) => {
                        tracing::warn!(email, role = user.role.as_str(), "named assignee is not assignable, leaving ticket unassigned");
                        None
                    }
                    None => {
                        tracing::warn!(email, "named assignee is unknown, leaving ticket unassigned");
                        None
                    }
                },
                None => None,
            };

            let title = draft.title.trim();
            let title =
                if title.is_empty() { "No Subject".to_string() } else { title.to_string() };

            let ticket = store
                .insert_ticket(&NewTicket {
                    title,
                    description: draft.description.trim().to_string(),
                    request_type: draft.request_type.unwrap_or_default(),
                    priority: draft.priority.unwrap_or_default(),
                    status: draft.status.unwrap_or_default(),
                    due_date: draft.due_date,
                    requester: requester.id,
                    assigned_to: assignee.as_ref().map(|u| u.id),
                })
                .map_err(storage)?;

            record_audit(
                &mut store,
                ticket.id,
                AuditAction::TicketCreated,
                None,
                Some(ticket.status.as_str()),
                requester.id,
            );

            (ticket, requester, assignee)
        };

        self.dispatch(
            &requester.email,
            &notify::ticket_created_subject(&ticket),
            &notify::ticket_created_body(&ticket, &requester),
        );
        if let Some(assignee) = assignee {
            self.dispatch(
                &assignee.email,
                &notify::assigned_subject(&ticket),
                &notify::assigned_body(&ticket, &assignee),
            );
        }

        Ok(ticket)
    }

    /// # Errors
    /// Returns `NotFound` when no ticket has the given id.
    pub fn get_ticket(&self, id: TicketId) -> Result<Ticket, DeskError> {
        self.store
            .lock()
            .ticket_by_id(id)
            .map_err(storage)?
            .ok_or_else(|| DeskError::not_found(format!("ticket {id}")))
    }

    /// # Errors
    /// Returns `Storage` when the listing fails.
    pub fn list_tickets(&self) -> Result<Vec<Ticket>, DeskError> {
        self.store.lock().list_tickets().map_err(storage)
    }

    /// # Errors
    /// Returns `Storage` when the listing fails.
    pub fn list_unassigned(&self) -> Result<Vec<Ticket>, DeskError> {
        self.store.lock().list_unassigned().map_err(storage)
    }

    /// # Errors
    /// Returns `Storage` when the listing fails.
    pub fn list_assigned_to(&self, user: UserId) -> Result<Vec<Ticket>, DeskError> {
        self.store.lock().list_assigned_to(user).map_err(storage)
    }

    /// # Errors
    /// Returns `Storage` when the listing fails.
    pub fn list_requested_by(&self, user: UserId) -> Result<Vec<Ticket>, DeskError> {
        self.store.lock().list_requested_by(user).map_err(storage)
    }

    /// Assign a ticket to a data member and move it into progress.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ticket/users, `Forbidden` when the
    /// acting user is a requester, `Validation` when the assignee is not a
    /// data member or the ticket is closed, `Storage` when the ticket
    /// changed underneath the caller.
    pub fn assign_ticket(&self, request: AssignTicketRequest) -> Result<Ticket, DeskError> {
        let (updated, requester, assignee, previously_assigned) = {
            let mut store = self.store.lock();

            let actor = store
                .user_by_id(request.actor)
                .map_err(storage)?
                .ok_or_else(|| DeskError::not_found(format!("user {}", request.actor)))?;
            if actor.role == Role::Requester {
                return Err(DeskError::forbidden("requesters cannot assign tickets"));
            }

            let ticket = store
                .ticket_by_id(request.ticket_id)
                .map_err(storage)?
                .ok_or_else(|| DeskError::not_found(format!("ticket {}", request.ticket_id)))?;
            if ticket.status.is_terminal() {
                return Err(DeskError::validation(format!(
                    "ticket {} is closed and cannot be assigned",
                    ticket.id
                )));
            }

            let assignee = store
                .user_by_id(request.assignee)
                .map_err(storage)?
                .ok_or_else(|| DeskError::not_found(format!("user {}", request.assignee)))?;
            if !assignee.role.is_assignable() {
                return Err(DeskError::validation(format!(
                    "only data members can be assigned tickets, {} is a {}",
                    assignee.email,
                    assignee.role.as_str()
                )));
            }

            let applied = store
                .update_assignment(
                    ticket.id,
                    Some(assignee.id),
                    Status::InProgress,
                    ticket.updated_at,
                )
                .map_err(storage)?;
            if !applied {
                return Err(DeskError::storage(format!(
                    "ticket {} was modified concurrently, retry the assignment",
                    ticket.id
                )));
            }

            let old_assignee = ticket.assigned_to.map(|id| id.to_string());
            record_audit(
                &mut store,
                ticket.id,
                AuditAction::Assigned,
                old_assignee.as_deref(),
                Some(&assignee.id.to_string()),
                request.actor,
            );

            let updated = store
                .ticket_by_id(ticket.id)
                .map_err(storage)?
                .ok_or_else(|| DeskError::not_found(format!("ticket {}", ticket.id)))?;
            let requester = store
                .user_by_id(updated.requester)
                .map_err(storage)?
                .ok_or_else(|| DeskError::not_found(format!("user {}", updated.requester)))?;

            (updated, requester, assignee, ticket.assigned_to == Some(request.assignee))
        };

        if !previously_assigned {
            self.dispatch(
                &assignee.email,
                &notify::assigned_subject(&updated),
                &notify::assigned_body(&updated, &assignee),
            );
        }
        self.dispatch(
            &requester.email,
            &notify::in_progress_subject(&updated),
            &notify::in_progress_body(&updated, &requester),
        );

        Ok(updated)
    }

    /// Move a ticket to a new status. Only the current assignee may do this,
    /// and only along the allowed transitions.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown ticket or actor, `Forbidden` when
    /// the actor is not the assignee, `Validation` for a disallowed
    /// transition, `Storage` when the ticket changed underneath the caller.
    pub fn update_ticket_status(&self, request: UpdateStatusRequest) -> Result<Ticket, DeskError> {
        let (updated, requester, old_status) = {
            let mut store = self.store.lock();

            let ticket = store
                .ticket_by_id(request.ticket_id)
                .map_err(storage)?
                .ok_or_else(|| DeskError::not_found(format!("ticket {}", request.ticket_id)))?;
            store
                .user_by_id(request.actor)
                .map_err(storage)?
                .ok_or_else(|| DeskError::not_found(format!("user {}", request.actor)))?;
            if !ticket.is_assigned_to(request.actor) {
                return Err(DeskError::forbidden(
                    "only the current assignee may update ticket status",
                ));
            }
            if !ticket.status.can_transition_to(request.status) {
                return Err(DeskError::validation(format!(
                    "cannot move ticket {} from {} to {}",
                    ticket.id, ticket.status, request.status
                )));
            }

            let applied = store
                .update_status(ticket.id, request.status, ticket.updated_at)
                .map_err(storage)?;
            if !applied {
                return Err(DeskError::storage(format!(
                    "ticket {} was modified concurrently, retry the update",
                    ticket.id
                )));
            }

            record_audit(
                &mut store,
                ticket.id,
                AuditAction::StatusChanged,
                Some(ticket.status.as_str()),
                Some(request.status.as_str()),
                request.actor,
            );

            let updated = store
                .ticket_by_id(ticket.id)
                .map_err(storage)?
                .ok_or_else(|| DeskError::not_found(format!("ticket {}", ticket.id)))?;
            let requester = store
                .user_by_id(updated.requester)
                .map_err(storage)?
                .ok_or_else(|| DeskError::not_found(format!("user {}", updated.requester)))?;

            (updated, requester, ticket.status)
        };

        self.dispatch(
            &requester.email,
            &notify::status_changed_subject(&updated),
            &notify::status_changed_body(&updated, &requester, old_status, updated.status),
        );

        Ok(updated)
    }

    /// Post a comment on a ticket. Requesters may only comment on their own
    /// tickets and always post requester-visible; data members choose the
    /// visibility (defaulting to requester-visible).
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ticket/author, `Forbidden` when the
    /// author may not comment here or a requester asks for internal
    /// visibility, `Validation` for an empty body.
    pub fn add_comment(&self, request: AddCommentRequest) -> Result<Comment, DeskError> {
        let body = request.body.trim();
        if body.is_empty() {
            return Err(DeskError::validation("comment body must not be empty"));
        }

        let (comment, notify_target) = {
            let mut store = self.store.lock();

            let ticket = store
                .ticket_by_id(request.ticket_id)
                .map_err(storage)?
                .ok_or_else(|| DeskError::not_found(format!("ticket {}", request.ticket_id)))?;
            let author = store
                .user_by_id(request.author)
                .map_err(storage)?
                .ok_or_else(|| DeskError::not_found(format!("user {}", request.author)))?;

            let visibility = match author.role {
                Role::Requester => {
                    if ticket.requester != author.id {
                        return Err(DeskError::forbidden(
                            "you may only comment on your own tickets",
                        ));
                    }
                    if request.visibility == Some(Visibility::Internal) {
                        return Err(DeskError::forbidden(
                            "requesters cannot post internal comments",
                        ));
                    }
                    Visibility::RequesterVisible
                }
                Role::DataMember => request.visibility.unwrap_or(Visibility::RequesterVisible),
                Role::Admin => {
                    return Err(DeskError::forbidden(
                        "only requesters and data members may comment",
                    ));
                }
            };

            let comment = store
                .insert_comment(&NewComment {
                    ticket_id: ticket.id,
                    author: author.id,
                    body: body.to_string(),
                    visibility,
                })
                .map_err(storage)?;

            record_audit(
                &mut store,
                ticket.id,
                AuditAction::CommentAdded,
                None,
                Some(visibility.as_str()),
                author.id,
            );

            let notify_target = if author.role == Role::DataMember
                && visibility == Visibility::RequesterVisible
            {
                store
                    .user_by_id(ticket.requester)
                    .map_err(storage)?
                    .map(|requester| (ticket.clone(), requester, author))
            } else {
                None
            };

            (comment, notify_target)
        };

        if let Some((ticket, requester, author)) = notify_target {
            self.dispatch(
                &requester.email,
                &notify::comment_added_subject(&ticket),
                &notify::comment_added_body(&ticket, &requester, &author),
            );
        }

        Ok(comment)
    }

    /// List the comments a viewer is allowed to see, oldest first. The
    /// ticket's requester sees only requester-visible comments; staff see
    /// everything.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ticket/viewer and `Forbidden` when a
    /// requester asks about someone else's ticket.
    pub fn list_comments(
        &self,
        ticket_id: TicketId,
        viewer: UserId,
    ) -> Result<Vec<Comment>, DeskError> {
        let store = self.store.lock();

        let ticket = store
            .ticket_by_id(ticket_id)
            .map_err(storage)?
            .ok_or_else(|| DeskError::not_found(format!("ticket {ticket_id}")))?;
        let viewer = store
            .user_by_id(viewer)
            .map_err(storage)?
            .ok_or_else(|| DeskError::not_found(format!("user {viewer}")))?;

        let comments = store.comments_for_ticket(ticket.id).map_err(storage)?;
        match viewer.role {
            Role::Requester => {
                if ticket.requester != viewer.id {
                    return Err(DeskError::forbidden("you may only view your own tickets"));
                }
                Ok(comments
                    .into_iter()
                    .filter(|c| c.visibility == Visibility::RequesterVisible)
                    .collect())
            }
            Role::DataMember | Role::Admin => Ok(comments),
        }
    }

    /// Full audit history for a ticket, newest first.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown ticket.
    pub fn audit_history(&self, ticket_id: TicketId) -> Result<Vec<AuditLogEntry>, DeskError> {
        let store = self.store.lock();
        store
            .ticket_by_id(ticket_id)
            .map_err(storage)?
            .ok_or_else(|| DeskError::not_found(format!("ticket {ticket_id}")))?;
        store.audit_history(ticket_id).map_err(storage)
    }

    fn dispatch(&self, to: &str, subject: &str, body: &str) {
        if let Err(err) = self.notifier.send(to, subject, body) {
            tracing::warn!(to, subject, error = %err, "notification failed");
        }
    }
}

fn resolve_requester(store: &mut SqliteStore, draft: &TicketDraft) -> Result<User, DeskError> {
    match &draft.requester {
        ticket_desk_core::RequesterRef::Id(id) => store
            .user_by_id(*id)
            .map_err(storage)?
            .ok_or_else(|| DeskError::not_found(format!("user {id}"))),
        ticket_desk_core::RequesterRef::Email { address, name } => {
            let address = address.trim();
            if address.is_empty() || !address.contains('@') {
                return Err(DeskError::validation(format!(
                    "invalid requester email: {address}"
                )));
            }
            if let Some(user) = store.user_by_email(address).map_err(storage)? {
                return Ok(user);
            }

            let user = store
                .insert_user(&NewUser {
                    name: name.clone().unwrap_or_else(|| local_part(address)),
                    email: address.to_string(),
                    role: Role::Requester,
                    invite_token: Some(Ulid::new().to_string()),
                })
                .map_err(storage)?;
            tracing::info!(email = address, id = %user.id, "provisioned requester account with invite token");
            Ok(user)
        }
    }
}

fn record_audit(
    store: &mut SqliteStore,
    ticket: TicketId,
    action: AuditAction,
    old_value: Option<&str>,
    new_value: Option<&str>,
    actor: UserId,
) {
    // History durability is independent of the primary mutation; a failed
    // append is logged and never fails the operation that triggered it.
    if let Err(err) = store.append_audit(ticket, action, old_value, new_value, actor) {
        tracing::warn!(ticket = %ticket, action = action.as_str(), error = %err, "failed to append audit record");
    }
}
