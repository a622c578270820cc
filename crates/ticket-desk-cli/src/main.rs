use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use ticket_desk_api::{
    AddCommentRequest, AssignTicketRequest, CreateUserRequest, LogNotifier, MaildirSource,
    TicketDesk, UpdateStatusRequest,
};
use ticket_desk_core::{
    parse_due_date, DeskError, Priority, RequestType, RequesterRef, Role, Status, TicketDraft,
    TicketId, UserId, Visibility,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tdesk")]
#[command(about = "TicketDesk CLI")]
struct Cli {
    #[arg(long, default_value = "./ticket_desk.sqlite3")]
    db: PathBuf,

    /// Address of the desk's own intake mailbox; messages from it are skipped.
    #[arg(long, default_value = "desk@example.com")]
    mailbox: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    Ticket {
        #[command(subcommand)]
        command: Box<TicketCommand>,
    },
    Comment {
        #[command(subcommand)]
        command: CommentCommand,
    },
    Audit(AuditArgs),
    Chat(ChatArgs),
    Ingest(IngestArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate,
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    Add(UserAddArgs),
    List,
}

#[derive(Debug, Args)]
struct UserAddArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    role: RoleArg,
}

#[derive(Debug, Subcommand)]
enum TicketCommand {
    Create(TicketCreateArgs),
    Show(TicketShowArgs),
    List(TicketListArgs),
    Assign(TicketAssignArgs),
    Status(TicketStatusArgs),
}

#[derive(Debug, Args)]
struct TicketCreateArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Requester user id; exclusive with --requester-email.
    #[arg(long)]
    requester: Option<i64>,
    /// Requester email; an unknown address is provisioned with an invite token.
    #[arg(long)]
    requester_email: Option<String>,
    #[arg(long)]
    request_type: Option<RequestTypeArg>,
    #[arg(long)]
    priority: Option<PriorityArg>,
    #[arg(long)]
    due_date: Option<String>,
}

#[derive(Debug, Args)]
struct TicketShowArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Args)]
struct TicketListArgs {
    #[arg(long, default_value_t = false)]
    unassigned: bool,
    #[arg(long)]
    assigned_to: Option<i64>,
    #[arg(long)]
    requester: Option<i64>,
}

#[derive(Debug, Args)]
struct TicketAssignArgs {
    #[arg(long)]
    id: i64,
    #[arg(long)]
    assignee: i64,
    #[arg(long)]
    actor: i64,
}

#[derive(Debug, Args)]
struct TicketStatusArgs {
    #[arg(long)]
    id: i64,
    #[arg(long)]
    status: StatusArg,
    #[arg(long)]
    actor: i64,
}

#[derive(Debug, Subcommand)]
enum CommentCommand {
    Add(CommentAddArgs),
    List(CommentListArgs),
}

#[derive(Debug, Args)]
struct CommentAddArgs {
    #[arg(long)]
    ticket: i64,
    #[arg(long)]
    author: i64,
    #[arg(long)]
    body: String,
    #[arg(long)]
    visibility: Option<VisibilityArg>,
}

#[derive(Debug, Args)]
struct CommentListArgs {
    #[arg(long)]
    ticket: i64,
    #[arg(long)]
    viewer: i64,
}

#[derive(Debug, Args)]
struct AuditArgs {
    #[arg(long)]
    ticket: i64,
}

#[derive(Debug, Args)]
struct ChatArgs {
    #[arg(long)]
    user: i64,
    /// Send a single message instead of starting an interactive session.
    #[arg(long)]
    message: Option<String>,
}

#[derive(Debug, Args)]
struct IngestArgs {
    #[arg(long)]
    maildir: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Requester,
    Datamember,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::Requester => Self::Requester,
            RoleArg::Datamember => Self::DataMember,
            RoleArg::Admin => Self::Admin,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PriorityArg {
    Low,
    Medium,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => Self::Low,
            PriorityArg::Medium => Self::Medium,
            PriorityArg::High => Self::High,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RequestTypeArg {
    Bug,
    Feature,
    DataAccess,
    Access,
}

impl From<RequestTypeArg> for RequestType {
    fn from(value: RequestTypeArg) -> Self {
        match value {
            RequestTypeArg::Bug => Self::Bug,
            RequestTypeArg::Feature => Self::Feature,
            RequestTypeArg::DataAccess => Self::DataAccess,
            RequestTypeArg::Access => Self::Access,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl From<StatusArg> for Status {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Open => Self::Open,
            StatusArg::InProgress => Self::InProgress,
            StatusArg::Resolved => Self::Resolved,
            StatusArg::Closed => Self::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VisibilityArg {
    Requester,
    Internal,
}

impl From<VisibilityArg> for Visibility {
    fn from(value: VisibilityArg) -> Self {
        match value {
            VisibilityArg::Requester => Self::RequesterVisible,
            VisibilityArg::Internal => Self::Internal,
        }
    }
}

fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let desk = TicketDesk::open(&cli.db, cli.mailbox, Arc::new(LogNotifier))?;

    match cli.command {
        Command::Db { command } => run_db(command, &desk),
        Command::User { command } => run_user(command, &desk),
        Command::Ticket { command } => run_ticket(*command, &desk),
        Command::Comment { command } => run_comment(command, &desk),
        Command::Audit(args) => {
            let history = desk.audit_history(TicketId(args.ticket))?;
            emit_json(&history)
        }
        Command::Chat(args) => run_chat(&args, &desk),
        Command::Ingest(args) => {
            let mut source = MaildirSource::new(args.maildir);
            let report = desk.ingest_unseen(&mut source)?;
            emit_json(&report)
        }
    }
}

fn run_db(command: DbCommand, desk: &TicketDesk) -> Result<()> {
    match command {
        // Opening the desk already applied pending migrations; both commands
        // report the resulting schema state.
        DbCommand::SchemaVersion | DbCommand::Migrate => {
            let status = desk.schema_status()?;
            emit_json(&status)
        }
    }
}

fn run_user(command: UserCommand, desk: &TicketDesk) -> Result<()> {
    match command {
        UserCommand::Add(args) => {
            let user = desk.create_user(CreateUserRequest {
                name: args.name,
                email: args.email,
                role: args.role.into(),
            })?;
            emit_json(&user)
        }
        UserCommand::List => emit_json(&desk.list_users()?),
    }
}

fn run_ticket(command: TicketCommand, desk: &TicketDesk) -> Result<()> {
    match command {
        TicketCommand::Create(args) => {
            let requester = match (args.requester, args.requester_email) {
                (Some(id), None) => RequesterRef::Id(UserId(id)),
                (None, Some(address)) => RequesterRef::Email { address, name: None },
                _ => {
                    return Err(anyhow!(
                        "exactly one of --requester and --requester-email is required"
                    ))
                }
            };
            let due_date = match args.due_date.as_deref() {
                Some(raw) => Some(
                    parse_due_date(raw).ok_or_else(|| anyhow!("unparsable due date: {raw}"))?,
                ),
                None => None,
            };

            let ticket = desk.create_ticket(TicketDraft {
                title: args.title.unwrap_or_default(),
                description: args.description.unwrap_or_default(),
                request_type: args.request_type.map(Into::into),
                priority: args.priority.map(Into::into),
                status: None,
                due_date,
                requester,
                assignee_email: None,
            })?;
            emit_json(&ticket)
        }
        TicketCommand::Show(args) => emit_json(&desk.get_ticket(TicketId(args.id))?),
        TicketCommand::List(args) => {
            let tickets = if args.unassigned {
                desk.list_unassigned()?
            } else if let Some(user) = args.assigned_to {
                desk.list_assigned_to(UserId(user))?
            } else if let Some(user) = args.requester {
                desk.list_requested_by(UserId(user))?
            } else {
                desk.list_tickets()?
            };
            emit_json(&tickets)
        }
        TicketCommand::Assign(args) => {
            let ticket = desk.assign_ticket(AssignTicketRequest {
                ticket_id: TicketId(args.id),
                assignee: UserId(args.assignee),
                actor: UserId(args.actor),
            })?;
            emit_json(&ticket)
        }
        TicketCommand::Status(args) => {
            let ticket = desk.update_ticket_status(UpdateStatusRequest {
                ticket_id: TicketId(args.id),
                status: args.status.into(),
                actor: UserId(args.actor),
            })?;
            emit_json(&ticket)
        }
    }
}

fn run_comment(command: CommentCommand, desk: &TicketDesk) -> Result<()> {
    match command {
        CommentCommand::Add(args) => {
            let comment = desk.add_comment(AddCommentRequest {
                ticket_id: TicketId(args.ticket),
                author: UserId(args.author),
                body: args.body,
                visibility: args.visibility.map(Into::into),
            })?;
            emit_json(&comment)
        }
        CommentCommand::List(args) => {
            emit_json(&desk.list_comments(TicketId(args.ticket), UserId(args.viewer))?)
        }
    }
}

fn chat_turn(desk: &TicketDesk, user: UserId, message: &str) -> Result<String> {
    match desk.process_conversation_message(user, message) {
        Ok(reply) => Ok(reply),
        Err(DeskError::SessionExpired) => Ok("Session expired. Please start again.".to_string()),
        Err(err) => Err(err.into()),
    }
}

fn run_chat(args: &ChatArgs, desk: &TicketDesk) -> Result<()> {
    let user = UserId(args.user);

    if let Some(message) = args.message.as_deref() {
        println!("{}", chat_turn(desk, user, message)?);
        return Ok(());
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    println!("{}", chat_turn(desk, user, "")?);
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            return Ok(());
        }
        println!("{}", chat_turn(desk, user, message)?);
    }
}
