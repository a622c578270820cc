use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use serde::{Deserialize, Serialize};
use ticket_desk_core::{
    parse_due_date, DeskError, Priority, RequestType, RequesterRef, Status, TicketDraft, TicketId,
};

use crate::TicketDesk;

/// Field labels recognized at the start of a body line. Anything else inside
/// a Description block is treated as continuation text.
const FIELD_LABELS: [&str; 7] =
    ["Title", "Description", "Status", "Priority", "Request Type", "Assigned To", "Due Date"];

const UNASSIGNED_SENTINEL: &str = "Not assigned yet";

/// One message pulled from a mail source, reduced to the parts the intake
/// parser needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncomingMessage {
    pub id: String,
    pub from: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Source of unseen intake messages. Implementations own the seen/unseen
/// bookkeeping; the engine marks a message seen once it has dealt with it.
pub trait MailSource {
    /// # Errors
    /// Returns `TransientIo` when the source cannot be reached.
    fn fetch_unseen(&mut self) -> Result<Vec<IncomingMessage>, DeskError>;

    /// # Errors
    /// Returns `TransientIo` when the seen marker cannot be persisted.
    fn mark_seen(&mut self, id: &str) -> Result<(), DeskError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    pub created: Vec<TicketId>,
    pub skipped_messages: usize,
    pub already_running: bool,
}

/// Raw label values scanned out of a message body, before enum parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub request_type: Option<String>,
    pub assigned_to: Option<String>,
    pub due_date: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn label_value(line: &str) -> Option<(&'static str, &str)> {
    let (label, rest) = line.split_once(':')?;
    let label = label.trim();
    FIELD_LABELS
        .iter()
        .find(|candidate| label.eq_ignore_ascii_case(candidate))
        .map(|candidate| (*candidate, rest.trim()))
}

/// Scan a message body for `Label: value` lines. The Description value runs
/// until the next recognized label; its lines are joined with single spaces.
#[must_use]
pub fn parse_fields(body: &str) -> ParsedFields {
    let mut fields = ParsedFields::default();
    let mut description_parts: Vec<String> = Vec::new();
    let mut in_description = false;

    for line in body.lines() {
        if let Some((label, value)) = label_value(line) {
            in_description = false;
            match label {
                "Title" => fields.title = non_empty(value),
                "Description" => {
                    in_description = true;
                    if let Some(part) = non_empty(value) {
                        description_parts.push(part);
                    }
                }
                "Status" => fields.status = non_empty(value),
                "Priority" => fields.priority = non_empty(value),
                "Request Type" => fields.request_type = non_empty(value),
                "Assigned To" => fields.assigned_to = non_empty(value),
                "Due Date" => fields.due_date = non_empty(value),
                _ => {}
            }
        } else if in_description {
            if let Some(part) = non_empty(line) {
                description_parts.push(part);
            }
        }
    }

    if !description_parts.is_empty() {
        fields.description = Some(description_parts.join(" "));
    }
    fields
}

fn parse_labelled<T: Copy + Default>(
    raw: Option<String>,
    parse: fn(&str) -> Option<T>,
    field: &str,
) -> Option<T> {
    raw.map(|value| {
        parse(&value).unwrap_or_else(|| {
            tracing::warn!(field, value = %value, "unparsable intake field, using default");
            T::default()
        })
    })
}

/// Build a ticket draft from one intake message. Unparsable enum labels fall
/// back to their defaults with a warning; an unparsable due date is dropped.
#[must_use]
pub fn draft_from_message(message: &IncomingMessage) -> TicketDraft {
    let fields = parse_fields(&message.body);

    let due_date = fields.due_date.and_then(|value| {
        let parsed = parse_due_date(&value);
        if parsed.is_none() {
            tracing::warn!(value = %value, "unparsable due date in intake message, ignoring");
        }
        parsed
    });

    let assignee_email = fields
        .assigned_to
        .filter(|value| !value.eq_ignore_ascii_case(UNASSIGNED_SENTINEL));

    TicketDraft {
        title: fields
            .title
            .or_else(|| message.subject.as_deref().and_then(non_empty))
            .unwrap_or_default(),
        description: fields.description.unwrap_or_default(),
        request_type: parse_labelled(fields.request_type, RequestType::parse, "request_type"),
        priority: parse_labelled(fields.priority, Priority::parse, "priority"),
        status: parse_labelled(fields.status, Status::parse, "status"),
        due_date,
        requester: RequesterRef::Email { address: message.from.clone(), name: None },
        assignee_email,
    }
}

/// Mail source reading `*.txt` drop files from a directory: a `From:` header
/// line, an optional `Subject:` line, a blank line, then the body. Processed
/// files are renamed with a `.seen` suffix.
#[derive(Debug, Clone)]
pub struct MaildirSource {
    dir: PathBuf,
}

impl MaildirSource {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn transient(err: std::io::Error) -> DeskError {
    DeskError::TransientIo(err.to_string())
}

fn parse_drop_file(id: String, text: &str) -> IncomingMessage {
    let mut from = String::new();
    let mut subject = None;
    let mut body_lines: Vec<&str> = Vec::new();
    let mut in_body = false;

    for line in text.lines() {
        if in_body {
            body_lines.push(line);
        } else if line.trim().is_empty() {
            in_body = true;
        } else if let Some(value) = line.strip_prefix("From:") {
            from = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("Subject:") {
            subject = non_empty(value);
        }
    }

    IncomingMessage { id, from, subject, body: body_lines.join("\n") }
}

impl MailSource for MaildirSource {
    fn fetch_unseen(&mut self) -> Result<Vec<IncomingMessage>, DeskError> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(transient)? {
            let path = entry.map_err(transient)?.path();
            if path.extension().is_some_and(|ext| ext == "txt") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut messages = Vec::new();
        for path in paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let text = fs::read_to_string(&path).map_err(transient)?;
            messages.push(parse_drop_file(name.to_string(), &text));
        }
        Ok(messages)
    }

    fn mark_seen(&mut self, id: &str) -> Result<(), DeskError> {
        let from = self.dir.join(id);
        let to = self.dir.join(format!("{id}.seen"));
        fs::rename(from, to).map_err(transient)
    }
}

impl TicketDesk {
    /// Drain unseen messages from a mail source, creating one ticket per
    /// message. Only one ingestion run is admitted at a time; a run that
    /// finds another in flight returns immediately with `already_running`.
    ///
    /// # Errors
    /// Returns `TransientIo` when the source itself fails; one message
    /// failing to convert only skips that message.
    pub fn ingest_unseen(&self, source: &mut dyn MailSource) -> Result<IngestReport, DeskError> {
        if self
            .ingest_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("ingestion already running, skipping this run");
            return Ok(IngestReport { already_running: true, ..IngestReport::default() });
        }

        let result = self.ingest_inner(source);
        self.ingest_running.store(false, Ordering::SeqCst);
        result
    }

    fn ingest_inner(&self, source: &mut dyn MailSource) -> Result<IngestReport, DeskError> {
        let messages = source.fetch_unseen()?;
        let mut report = IngestReport::default();

        for message in messages {
            if message.from.eq_ignore_ascii_case(&self.mailbox_address) {
                tracing::info!(id = %message.id, "skipping message from own mailbox");
                source.mark_seen(&message.id)?;
                report.skipped_messages += 1;
                continue;
            }

            let draft = draft_from_message(&message);
            match self.create_ticket(draft) {
                Ok(ticket) => {
                    source.mark_seen(&message.id)?;
                    report.created.push(ticket.id);
                }
                Err(err) => {
                    // Left unseen so a later run can retry once the cause clears.
                    tracing::warn!(id = %message.id, error = %err, "failed to create ticket from message");
                    report.skipped_messages += 1;
                }
            }
        }

        Ok(report)
    }
}
