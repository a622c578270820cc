use time::{Duration, OffsetDateTime};

use ticket_desk_core::{
    parse_due_date, DeskError, Priority, RequestType, Role, Ticket, TicketDraft, TicketId, User,
    UserId,
};

use crate::TicketDesk;

const SESSION_TTL: Duration = Duration::minutes(10);

const WELCOME: &str = "Welcome to the support desk!\n1. Create a new ticket\n2. Check ticket status\nPlease choose an option (1 or 2).";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConversationState {
    Menu,
    AskTitle,
    AskDescription,
    AskRequestType,
    AskDueDate,
    AskPriority,
    AskTicketId,
}

#[derive(Debug)]
pub(crate) struct SessionState {
    state: ConversationState,
    draft: Option<TicketDraft>,
    last_active: OffsetDateTime,
}

impl SessionState {
    fn new(now: OffsetDateTime) -> Self {
        Self { state: ConversationState::Menu, draft: None, last_active: now }
    }
}

fn detail_block(ticket: &Ticket) -> String {
    let due = ticket.due_date.map_or_else(|| "None".to_string(), |d| d.to_string());
    format!(
        "Ticket Details:\nID: {}\nTitle: {}\nStatus: {}\nPriority: {}\nDue Date: {}",
        ticket.id, ticket.title, ticket.status, ticket.priority, due
    )
}

impl TicketDesk {
    /// Advance one actor's dialogue by one message and return the reply.
    /// Each actor's session is processed one message at a time; concurrent
    /// messages from the same actor are serialized on the session slot.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown actor and `SessionExpired` when the
    /// session sat idle past its deadline (the session is cleared first).
    pub fn process_conversation_message(
        &self,
        actor: UserId,
        message: &str,
    ) -> Result<String, DeskError> {
        let user = self.user(actor)?;

        let slot = {
            let mut sessions = self.sessions.lock();
            sessions.entry(actor).or_default().clone()
        };
        let mut session = slot.lock();

        let now = OffsetDateTime::now_utc();
        if let Some(state) = session.as_ref() {
            if now - state.last_active > SESSION_TTL {
                *session = None;
                return Err(DeskError::SessionExpired);
            }
        }

        if session.is_none() {
            *session = Some(SessionState::new(now));
            return Ok(WELCOME.to_string());
        }

        let message = message.trim();
        if message.eq_ignore_ascii_case("restart") {
            *session = None;
            return Ok("Restarting...".to_string());
        }

        let state = match session.as_mut() {
            Some(active) => {
                active.last_active = now;
                active.state
            }
            None => return Ok(WELCOME.to_string()),
        };

        match state {
            ConversationState::Menu => self.step_menu(&user, &mut *session, message),
            ConversationState::AskTitle => Ok(step_title(&mut *session, message)),
            ConversationState::AskDescription => Ok(step_description(&mut *session, message)),
            ConversationState::AskRequestType => Ok(step_request_type(&mut *session, message)),
            ConversationState::AskDueDate => Ok(step_due_date(&mut *session, message, now)),
            ConversationState::AskPriority => self.step_priority(&mut *session, message),
            ConversationState::AskTicketId => self.step_ticket_id(&user, &mut *session, message),
        }
    }

    fn step_menu(
        &self,
        user: &User,
        session: &mut Option<SessionState>,
        message: &str,
    ) -> Result<String, DeskError> {
        match message {
            "1" => {
                if user.role != Role::Requester {
                    return Ok("Only requesters can create tickets.".to_string());
                }
                if let Some(active) = session.as_mut() {
                    active.state = ConversationState::AskTitle;
                    active.draft = Some(TicketDraft::for_requester(user.id));
                }
                Ok("Enter Title:".to_string())
            }
            "2" => {
                if let Some(active) = session.as_mut() {
                    active.state = ConversationState::AskTicketId;
                }
                Ok("Enter Ticket ID:".to_string())
            }
            _ => Ok("Invalid option. Please choose 1 or 2.".to_string()),
        }
    }

    fn step_priority(
        &self,
        session: &mut Option<SessionState>,
        message: &str,
    ) -> Result<String, DeskError> {
        let Some(priority) = Priority::parse(message) else {
            return Ok("Invalid priority. Valid options: LOW, MEDIUM, HIGH.".to_string());
        };

        let draft = session.as_mut().and_then(|active| active.draft.take());
        *session = None;
        let Some(mut draft) = draft else {
            // A collection state with no draft means the session is no
            // longer usable; treat it like any other dead session.
            return Err(DeskError::SessionExpired);
        };

        draft.priority = Some(priority);
        let ticket = self.create_ticket(draft)?;
        Ok(format!("Your ticket has been created with ID {}.", ticket.id))
    }

    fn step_ticket_id(
        &self,
        user: &User,
        session: &mut Option<SessionState>,
        message: &str,
    ) -> Result<String, DeskError> {
        let Some(id) = TicketId::parse(message) else {
            return Ok("Please enter a numeric ticket ID.".to_string());
        };

        *session = None;
        match self.get_ticket(id) {
            Ok(ticket) => {
                if ticket.requester != user.id {
                    Ok("You can only view your own tickets.".to_string())
                } else {
                    Ok(detail_block(&ticket))
                }
            }
            Err(DeskError::NotFound(_)) => Ok(format!("No ticket found with ID {id}.")),
            Err(err) => Err(err),
        }
    }
}

fn step_title(session: &mut Option<SessionState>, message: &str) -> String {
    if message.is_empty() {
        return "Please enter a non-empty title.".to_string();
    }
    if let Some(active) = session.as_mut() {
        if let Some(draft) = active.draft.as_mut() {
            draft.title = message.to_string();
        }
        active.state = ConversationState::AskDescription;
    }
    "Enter Description:".to_string()
}

fn step_description(session: &mut Option<SessionState>, message: &str) -> String {
    if message.is_empty() {
        return "Please enter a description.".to_string();
    }
    if let Some(active) = session.as_mut() {
        if let Some(draft) = active.draft.as_mut() {
            draft.description = message.to_string();
        }
        active.state = ConversationState::AskRequestType;
    }
    "Enter Request Type (BUG, FEATURE, DATA_ACCESS, ACCESS):".to_string()
}

fn step_request_type(session: &mut Option<SessionState>, message: &str) -> String {
    let Some(request_type) = RequestType::parse(message) else {
        return "Invalid request type. Valid options: BUG, FEATURE, DATA_ACCESS, ACCESS."
            .to_string();
    };
    if let Some(active) = session.as_mut() {
        if let Some(draft) = active.draft.as_mut() {
            draft.request_type = Some(request_type);
        }
        active.state = ConversationState::AskDueDate;
    }
    "Enter Due Date (YYYY-MM-DD):".to_string()
}

fn step_due_date(session: &mut Option<SessionState>, message: &str, now: OffsetDateTime) -> String {
    let Some(date) = parse_due_date(message) else {
        return "Invalid date format. Please use YYYY-MM-DD.".to_string();
    };
    if date < now.date() {
        return "Due date cannot be in the past.".to_string();
    }
    if let Some(active) = session.as_mut() {
        if let Some(draft) = active.draft.as_mut() {
            draft.due_date = Some(date);
        }
        active.state = ConversationState::AskPriority;
    }
    "Enter Priority (LOW, MEDIUM, HIGH):".to_string()
}

#[cfg(test)]
mod tests {
    use ticket_desk_core::Role;

    use super::*;
    use crate::tests::{new_desk, seed};

    #[test]
    fn full_create_round_trip() -> Result<(), DeskError> {
        let (desk, _) = new_desk();
        let dana = seed(&desk, "dana@example.com", Role::Requester)?;

        let reply = desk.process_conversation_message(dana.id, "hello")?;
        assert!(reply.starts_with("Welcome to the support desk!"));

        assert_eq!(desk.process_conversation_message(dana.id, "1")?, "Enter Title:");
        assert_eq!(
            desk.process_conversation_message(dana.id, "Printer broken")?,
            "Enter Description:"
        );
        assert_eq!(
            desk.process_conversation_message(dana.id, "It will not turn on")?,
            "Enter Request Type (BUG, FEATURE, DATA_ACCESS, ACCESS):"
        );
        assert_eq!(
            desk.process_conversation_message(dana.id, "BUG")?,
            "Enter Due Date (YYYY-MM-DD):"
        );

        // Past dates are rejected and the step repeats.
        assert_eq!(
            desk.process_conversation_message(dana.id, "2001-01-01")?,
            "Due date cannot be in the past."
        );
        assert_eq!(
            desk.process_conversation_message(dana.id, "2099-01-01")?,
            "Enter Priority (LOW, MEDIUM, HIGH):"
        );
        assert_eq!(
            desk.process_conversation_message(dana.id, "urgent")?,
            "Invalid priority. Valid options: LOW, MEDIUM, HIGH."
        );

        let reply = desk.process_conversation_message(dana.id, "HIGH")?;
        assert!(reply.starts_with("Your ticket has been created with ID "));

        let ticket = &desk.list_tickets()?[0];
        assert_eq!(ticket.title, "Printer broken");
        assert_eq!(ticket.priority, Priority::High);
        assert_eq!(ticket.request_type, RequestType::Bug);
        assert_eq!(ticket.requester, dana.id);
        Ok(())
    }

    #[test]
    fn status_lookup_shows_own_tickets_only() -> Result<(), DeskError> {
        let (desk, _) = new_desk();
        let dana = seed(&desk, "dana@example.com", Role::Requester)?;
        let eve = seed(&desk, "eve@example.com", Role::Requester)?;

        let mut draft = TicketDraft::for_requester(dana.id);
        draft.title = "Printer broken".to_string();
        let ticket = desk.create_ticket(draft)?;

        desk.process_conversation_message(dana.id, "hi")?;
        assert_eq!(desk.process_conversation_message(dana.id, "2")?, "Enter Ticket ID:");
        assert_eq!(
            desk.process_conversation_message(dana.id, "not a number")?,
            "Please enter a numeric ticket ID."
        );
        let reply = desk.process_conversation_message(dana.id, &ticket.id.to_string())?;
        assert!(reply.starts_with("Ticket Details:"));
        assert!(reply.contains("Title: Printer broken"));
        assert!(reply.contains("Status: OPEN"));
        assert!(reply.contains("Due Date: None"));

        desk.process_conversation_message(eve.id, "hi")?;
        desk.process_conversation_message(eve.id, "2")?;
        assert_eq!(
            desk.process_conversation_message(eve.id, &ticket.id.to_string())?,
            "You can only view your own tickets."
        );

        desk.process_conversation_message(dana.id, "hi")?;
        desk.process_conversation_message(dana.id, "2")?;
        assert_eq!(
            desk.process_conversation_message(dana.id, "9999")?,
            "No ticket found with ID 9999."
        );
        Ok(())
    }

    #[test]
    fn only_requesters_may_start_a_ticket() -> Result<(), DeskError> {
        let (desk, _) = new_desk();
        let sam = seed(&desk, "sam@example.com", Role::DataMember)?;

        desk.process_conversation_message(sam.id, "hi")?;
        assert_eq!(
            desk.process_conversation_message(sam.id, "1")?,
            "Only requesters can create tickets."
        );
        assert_eq!(
            desk.process_conversation_message(sam.id, "3")?,
            "Invalid option. Please choose 1 or 2."
        );
        Ok(())
    }

    #[test]
    fn unknown_actor_is_rejected() {
        let (desk, _) = new_desk();
        let result = desk.process_conversation_message(UserId(404), "hi");
        assert!(matches!(result, Err(DeskError::NotFound(_))));
    }

    #[test]
    fn restart_clears_the_session() -> Result<(), DeskError> {
        let (desk, _) = new_desk();
        let dana = seed(&desk, "dana@example.com", Role::Requester)?;

        desk.process_conversation_message(dana.id, "hi")?;
        desk.process_conversation_message(dana.id, "1")?;
        assert_eq!(desk.process_conversation_message(dana.id, "restart")?, "Restarting...");

        let reply = desk.process_conversation_message(dana.id, "hi")?;
        assert!(reply.starts_with("Welcome to the support desk!"));
        Ok(())
    }

    #[test]
    fn priority_step_without_a_draft_expires_the_session() {
        let (desk, _) = new_desk();

        let mut session = Some(SessionState::new(OffsetDateTime::now_utc()));
        if let Some(active) = session.as_mut() {
            active.state = ConversationState::AskPriority;
        }

        let result = desk.step_priority(&mut session, "HIGH");
        assert!(matches!(result, Err(DeskError::SessionExpired)));
        assert!(session.is_none());
    }

    #[test]
    fn idle_sessions_expire() -> Result<(), DeskError> {
        let (desk, _) = new_desk();
        let dana = seed(&desk, "dana@example.com", Role::Requester)?;

        desk.process_conversation_message(dana.id, "hi")?;
        desk.process_conversation_message(dana.id, "1")?;

        {
            let sessions = desk.sessions.lock();
            let slot = match sessions.get(&dana.id) {
                Some(slot) => slot.clone(),
                None => panic!("session slot missing"),
            };
            drop(sessions);
            let mut session = slot.lock();
            if let Some(active) = session.as_mut() {
                active.last_active -= SESSION_TTL + Duration::minutes(1);
            }
        }

        let result = desk.process_conversation_message(dana.id, "Printer broken");
        assert!(matches!(result, Err(DeskError::SessionExpired)));

        // The expired session is gone; the next message starts over.
        let reply = desk.process_conversation_message(dana.id, "hi")?;
        assert!(reply.starts_with("Welcome to the support desk!"));
        Ok(())
    }
}
