use ticket_desk_core::{DeskError, Status, Ticket, User};

/// Outbound notification channel. Delivery is best effort: the engine logs
/// failures and never lets them fail the mutation that triggered them.
pub trait Notifier: Send + Sync {
    /// # Errors
    /// Returns an error when the message cannot be handed to the channel.
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeskError>;
}

/// Notifier that writes every message to the log instead of a mail relay.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), DeskError> {
        tracing::info!(to, subject, body, "notification dispatched");
        Ok(())
    }
}

fn due_date_line(ticket: &Ticket) -> String {
    ticket.due_date.map_or_else(|| "None".to_string(), |d| d.to_string())
}

pub(crate) fn ticket_created_subject(ticket: &Ticket) -> String {
    format!("Ticket #{} created", ticket.id)
}

pub(crate) fn ticket_created_body(ticket: &Ticket, requester: &User) -> String {
    format!(
        "Hello {},\n\nYour ticket #{} \"{}\" has been created.\nStatus: {}\n\nSupport Desk",
        requester.name, ticket.id, ticket.title, ticket.status
    )
}

pub(crate) fn assigned_subject(ticket: &Ticket) -> String {
    format!("Ticket #{} assigned to you", ticket.id)
}

pub(crate) fn assigned_body(ticket: &Ticket, assignee: &User) -> String {
    format!(
        "Hello {},\n\nTicket #{} \"{}\" has been assigned to you.\nPriority: {}\nDue Date: {}\n\nSupport Desk",
        assignee.name,
        ticket.id,
        ticket.title,
        ticket.priority,
        due_date_line(ticket)
    )
}

pub(crate) fn in_progress_subject(ticket: &Ticket) -> String {
    format!("Ticket #{} is in progress", ticket.id)
}

pub(crate) fn in_progress_body(ticket: &Ticket, requester: &User) -> String {
    format!(
        "Hello {},\n\nYour ticket #{} \"{}\" is now being worked on.\nStatus: {}\n\nSupport Desk",
        requester.name,
        ticket.id,
        ticket.title,
        Status::InProgress
    )
}

pub(crate) fn status_changed_subject(ticket: &Ticket) -> String {
    format!("Ticket #{} status updated", ticket.id)
}

pub(crate) fn status_changed_body(
    ticket: &Ticket,
    requester: &User,
    old: Status,
    new: Status,
) -> String {
    format!(
        "Hello {},\n\nYour ticket #{} \"{}\" changed status from {} to {}.\n\nSupport Desk",
        requester.name, ticket.id, ticket.title, old, new
    )
}

pub(crate) fn comment_added_subject(ticket: &Ticket) -> String {
    format!("New comment on ticket #{}", ticket.id)
}

pub(crate) fn comment_added_body(ticket: &Ticket, requester: &User, author: &User) -> String {
    format!(
        "Hello {},\n\n{} commented on your ticket #{} \"{}\".\n\nSupport Desk",
        requester.name, author.name, ticket.id, ticket.title
    )
}
