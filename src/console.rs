use std::fmt::Write as _;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::engine::{self, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::slots::{SlotCatalog, parse_date, parse_range, parse_time};
use crate::users::{Role, UserInfo};

/// One parsed console line.
#[derive(Debug, PartialEq)]
pub enum Command {
    Help,
    Quit,
    Bootstrap {
        username: String,
        password: String,
        confirm: String,
    },
    Register {
        username: String,
        password: String,
        confirm: String,
    },
    Login {
        username: String,
        password: String,
    },
    Logout,
    WhoAmI,
    Rooms,
    AddRoom {
        name: String,
    },
    RemoveRoom {
        name: String,
    },
    Reserve {
        room: String,
        date: NaiveDate,
        range: TimeRange,
        purpose: Purpose,
        leader: String,
        info: String,
    },
    /// Reserve by slot labels from the catalog.
    Book {
        room: String,
        date: NaiveDate,
        slots: Vec<String>,
        purpose: Purpose,
        leader: String,
        info: String,
    },
    Cancel {
        room: String,
        target: ReservationRef,
    },
    /// Hard delete; the operator re-enters their password.
    Delete {
        room: String,
        target: ReservationRef,
        password: String,
    },
    List {
        room: String,
        date: NaiveDate,
    },
    All {
        room: String,
    },
    Day {
        room: String,
        date: NaiveDate,
    },
    Available {
        date: NaiveDate,
        range: TimeRange,
    },
    Occupied {
        room: String,
        date: NaiveDate,
        slot: String,
    },
    Undo,
    Redo,
    Users,
    SetRole {
        username: String,
        role: Role,
    },
    RemoveUser {
        username: String,
    },
}

impl Command {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::Quit => "quit",
            Command::Bootstrap { .. } => "bootstrap",
            Command::Register { .. } => "register",
            Command::Login { .. } => "login",
            Command::Logout => "logout",
            Command::WhoAmI => "whoami",
            Command::Rooms => "rooms",
            Command::AddRoom { .. } => "add_room",
            Command::RemoveRoom { .. } => "remove_room",
            Command::Reserve { .. } => "reserve",
            Command::Book { .. } => "book",
            Command::Cancel { .. } => "cancel",
            Command::Delete { .. } => "delete",
            Command::List { .. } => "list",
            Command::All { .. } => "all",
            Command::Day { .. } => "day",
            Command::Available { .. } => "available",
            Command::Occupied { .. } => "occupied",
            Command::Undo => "undo",
            Command::Redo => "redo",
            Command::Users => "users",
            Command::SetRole { .. } => "set_role",
            Command::RemoveUser { .. } => "remove_user",
        }
    }
}

pub const HELP: &str = "\
commands:
  bootstrap <user> <password> <confirm>       create the first admin
  register <user> <password> <confirm>        create a user account
  login <user> <password> | logout | whoami
  rooms                                       list rooms
  reserve <room> <date> <start> <end> <purpose> <leader> [info]
  book <room> <date> <slot,slot,...> <purpose> <leader> [info]
  cancel <room> <#index|id>
  list <room> <date> | all <room> | day <room> <date>
  available <date> <start> <end>
  occupied <room> <date> <slot>
  undo | redo
admin:
  add-room <name> | remove-room <name>
  delete <room> <#index|id> <password>
  users | promote <user> | demote <user> | remove-user <user>
quote arguments that contain spaces: \"Study Room 1\"";

// ── Parsing ──────────────────────────────────────────────────

/// Split on whitespace, keeping double-quoted runs together.
fn tokenize(line: &str) -> Result<Vec<String>, ConsoleError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if in_quotes {
        return Err(ConsoleError::Parse("unterminated quote".into()));
    }
    if has_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn parse_target(s: &str) -> Result<ReservationRef, ConsoleError> {
    let digits = s.strip_prefix('#').unwrap_or(s);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        return digits
            .parse()
            .map(ReservationRef::Index)
            .map_err(|_| ConsoleError::Parse(format!("bad index: {s}")));
    }
    Ulid::from_string(s)
        .map(ReservationRef::Id)
        .map_err(|_| ConsoleError::Parse(format!("expected #index or reservation id, got {s:?}")))
}

pub fn parse_line(line: &str) -> Result<Command, ConsoleError> {
    let tokens = tokenize(line)?;
    let Some((head, args)) = tokens.split_first() else {
        return Err(ConsoleError::Empty);
    };
    let arity = |min: usize, max: usize, usage: &'static str| {
        if args.len() < min || args.len() > max {
            Err(ConsoleError::Usage(usage))
        } else {
            Ok(())
        }
    };

    let cmd = match head.to_ascii_lowercase().as_str() {
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "bootstrap" => {
            arity(3, 3, "bootstrap <user> <password> <confirm>")?;
            Command::Bootstrap {
                username: args[0].clone(),
                password: args[1].clone(),
                confirm: args[2].clone(),
            }
        }
        "register" => {
            arity(3, 3, "register <user> <password> <confirm>")?;
            Command::Register {
                username: args[0].clone(),
                password: args[1].clone(),
                confirm: args[2].clone(),
            }
        }
        "login" => {
            arity(2, 2, "login <user> <password>")?;
            Command::Login {
                username: args[0].clone(),
                password: args[1].clone(),
            }
        }
        "logout" => Command::Logout,
        "whoami" => Command::WhoAmI,
        "rooms" => Command::Rooms,
        "add-room" => {
            arity(1, 1, "add-room <name>")?;
            Command::AddRoom {
                name: args[0].clone(),
            }
        }
        "remove-room" => {
            arity(1, 1, "remove-room <name>")?;
            Command::RemoveRoom {
                name: args[0].clone(),
            }
        }
        "reserve" => {
            arity(6, 7, "reserve <room> <date> <start> <end> <purpose> <leader> [info]")?;
            Command::Reserve {
                room: args[0].clone(),
                date: parse_date(&args[1])?,
                range: parse_range(&args[2], &args[3])?,
                purpose: Purpose::from_label(&args[4]),
                leader: args[5].clone(),
                info: args.get(6).cloned().unwrap_or_default(),
            }
        }
        "book" => {
            arity(5, 6, "book <room> <date> <slot,slot,...> <purpose> <leader> [info]")?;
            Command::Book {
                room: args[0].clone(),
                date: parse_date(&args[1])?,
                slots: args[2]
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
                purpose: Purpose::from_label(&args[3]),
                leader: args[4].clone(),
                info: args.get(5).cloned().unwrap_or_default(),
            }
        }
        "cancel" => {
            arity(2, 2, "cancel <room> <#index|id>")?;
            Command::Cancel {
                room: args[0].clone(),
                target: parse_target(&args[1])?,
            }
        }
        "delete" => {
            arity(3, 3, "delete <room> <#index|id> <password>")?;
            Command::Delete {
                room: args[0].clone(),
                target: parse_target(&args[1])?,
                password: args[2].clone(),
            }
        }
        "list" => {
            arity(2, 2, "list <room> <date>")?;
            Command::List {
                room: args[0].clone(),
                date: parse_date(&args[1])?,
            }
        }
        "all" => {
            arity(1, 1, "all <room>")?;
            Command::All {
                room: args[0].clone(),
            }
        }
        "day" => {
            arity(2, 2, "day <room> <date>")?;
            Command::Day {
                room: args[0].clone(),
                date: parse_date(&args[1])?,
            }
        }
        "available" => {
            arity(3, 3, "available <date> <start> <end>")?;
            Command::Available {
                date: parse_date(&args[0])?,
                range: parse_range(&args[1], &args[2])?,
            }
        }
        "occupied" => {
            arity(3, 3, "occupied <room> <date> <slot>")?;
            parse_time(&args[2])?;
            Command::Occupied {
                room: args[0].clone(),
                date: parse_date(&args[1])?,
                slot: args[2].clone(),
            }
        }
        "undo" => Command::Undo,
        "redo" => Command::Redo,
        "users" => Command::Users,
        "promote" | "demote" => {
            arity(1, 1, "promote|demote <user>")?;
            Command::SetRole {
                username: args[0].clone(),
                role: if head.eq_ignore_ascii_case("promote") {
                    Role::Admin
                } else {
                    Role::User
                },
            }
        }
        "remove-user" => {
            arity(1, 1, "remove-user <user>")?;
            Command::RemoveUser {
                username: args[0].clone(),
            }
        }
        other => return Err(ConsoleError::UnknownCommand(other.to_string())),
    };
    Ok(cmd)
}

// ── Execution ────────────────────────────────────────────────

fn format_reservation(r: &Reservation) -> String {
    let mut line = format!(
        "{} {} {} {} (priority {}) led by {}",
        r.id, r.date, r.range, r.purpose, r.priority, r.leader
    );
    if !r.info.is_empty() {
        let _ = write!(line, ": {}", r.info);
    }
    line
}

fn describe(cmd: &engine::Command) -> String {
    let r = cmd.reservation();
    let kind = match cmd {
        engine::Command::Reserve { .. } => "reservation",
        engine::Command::Cancel { .. } => "cancellation",
    };
    format!("{kind} of {} on {} {}", cmd.room(), r.date, r.range)
}

/// One operator's console state: who is logged in, and the shared engine.
pub struct Session {
    engine: Arc<Engine>,
    catalog: Arc<SlotCatalog>,
    user: Option<UserInfo>,
}

impl Session {
    pub fn new(engine: Arc<Engine>, catalog: Arc<SlotCatalog>) -> Self {
        Self {
            engine,
            catalog,
            user: None,
        }
    }

    pub fn user(&self) -> Option<&UserInfo> {
        self.user.as_ref()
    }

    /// Parse and run one line. Blank lines produce no output.
    pub async fn handle_line(&mut self, line: &str) -> Result<Option<String>, ConsoleError> {
        match parse_line(line) {
            Ok(cmd) => self.execute(cmd).await.map(Some),
            Err(ConsoleError::Empty) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn execute(&mut self, cmd: Command) -> Result<String, ConsoleError> {
        let label = cmd.label();
        let result = self.dispatch(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::COMMANDS_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    fn require_login(&self) -> Result<&UserInfo, ConsoleError> {
        self.user.as_ref().ok_or(ConsoleError::NotLoggedIn)
    }

    fn require_admin(&self) -> Result<&UserInfo, ConsoleError> {
        let user = self.require_login()?;
        if !user.role.is_admin() {
            return Err(ConsoleError::PermissionDenied("admin role required"));
        }
        Ok(user)
    }

    async fn dispatch(&mut self, cmd: Command) -> Result<String, ConsoleError> {
        let users = &self.engine.users;
        let open = matches!(cmd, Command::Help | Command::Quit | Command::Bootstrap { .. });
        if !open && users.needs_bootstrap().await {
            return Err(ConsoleError::BootstrapRequired);
        }

        match cmd {
            Command::Help => Ok(HELP.to_string()),
            Command::Quit => Ok("bye".to_string()),
            Command::Bootstrap {
                username,
                password,
                confirm,
            } => {
                if password != confirm {
                    return Err(ConsoleError::PasswordMismatch);
                }
                let admin = users.bootstrap_admin(&username, &password).await?;
                Ok(format!("admin account {} created", admin.username))
            }
            Command::Register {
                username,
                password,
                confirm,
            } => {
                if password != confirm {
                    return Err(ConsoleError::PasswordMismatch);
                }
                let user = users.register(&username, &password, Role::User).await?;
                Ok(format!("user {} registered", user.username))
            }
            Command::Login { username, password } => {
                let user = users.authenticate(&username, &password).await?;
                info!(username = %user.username, role = ?user.role, "login");
                let msg = format!("logged in as {} ({:?})", user.username, user.role);
                self.user = Some(user);
                Ok(msg)
            }
            Command::Logout => match self.user.take() {
                Some(user) => Ok(format!("{} logged out", user.username)),
                None => Err(ConsoleError::NotLoggedIn),
            },
            Command::WhoAmI => {
                let user = self.require_login()?;
                Ok(format!("{} ({:?})", user.username, user.role))
            }
            Command::Rooms => {
                self.require_login()?;
                let mut out = String::new();
                for room in self.engine.list_rooms().await {
                    let _ = writeln!(
                        out,
                        "{} ({} active, {} stored)",
                        room.name, room.active_reservations, room.stored_reservations
                    );
                }
                Ok(out.trim_end().to_string())
            }
            Command::AddRoom { name } => {
                self.require_admin()?;
                self.engine.add_room(&name).await?;
                Ok(format!("room '{}' added", name.trim()))
            }
            Command::RemoveRoom { name } => {
                self.require_admin()?;
                self.engine.remove_room(&name).await?;
                Ok(format!("room '{name}' removed"))
            }
            Command::Reserve {
                room,
                date,
                range,
                purpose,
                leader,
                info,
            } => {
                self.require_login()?;
                let request = ReservationRequest::new(date, range, purpose, leader).with_info(info);
                self.book(&room, request).await
            }
            Command::Book {
                room,
                date,
                slots,
                purpose,
                leader,
                info,
            } => {
                self.require_login()?;
                let range = self.catalog.booking_range(&slots)?;
                let request = ReservationRequest::new(date, range, purpose, leader).with_info(info);
                self.book(&room, request).await
            }
            Command::Cancel { room, target } => {
                self.require_login()?;
                let r = self.engine.cancel(&room, target).await?;
                Ok(format!("cancelled {}", format_reservation(&r)))
            }
            Command::Delete {
                room,
                target,
                password,
            } => {
                let admin = self.require_admin()?.username.clone();
                users.authenticate(&admin, &password).await?;
                let r = self
                    .engine
                    .delete_reservation(&room, target, DeleteMode::Hard)
                    .await?;
                Ok(format!("deleted {}", format_reservation(&r)))
            }
            Command::List { room, date } => {
                self.require_login()?;
                let list = self.engine.list_reservations(&room, date).await?;
                if list.is_empty() {
                    return Ok(format!("no reservations in {room} on {date}"));
                }
                Ok(list.iter().map(format_reservation).collect::<Vec<_>>().join("\n"))
            }
            Command::All { room } => {
                self.require_login()?;
                let list = self.engine.all_reservations(&room).await?;
                let mut out = String::new();
                for (idx, r) in list.iter().enumerate() {
                    let flag = if r.active { "" } else { " [inactive]" };
                    let _ = writeln!(out, "#{idx} {}{flag}", format_reservation(r));
                }
                Ok(out.trim_end().to_string())
            }
            Command::Day { room, date } => {
                self.require_login()?;
                let view = self.engine.room_day(&room, date, &self.catalog).await?;
                let mut out = format!("{} {}\n", view.room, view.date);
                for cell in &view.cells {
                    match &cell.occupant {
                        Some(r) => {
                            let _ = writeln!(out, "  {} {} ({})", cell.label, r.purpose, r.leader);
                        }
                        None => {
                            let _ = writeln!(out, "  {} free", cell.label);
                        }
                    }
                }
                Ok(out.trim_end().to_string())
            }
            Command::Available { date, range } => {
                self.require_login()?;
                let free = self.engine.rooms_available(date, range).await;
                if free.is_empty() {
                    return Ok(format!("no rooms free on {date} {range}"));
                }
                Ok(free.join("\n"))
            }
            Command::Occupied { room, date, slot } => {
                self.require_login()?;
                let taken = self.engine.slot_occupied(&room, date, &slot).await?;
                Ok(if taken { "occupied" } else { "free" }.to_string())
            }
            Command::Undo => {
                self.require_login()?;
                Ok(match self.engine.undo().await? {
                    Some(cmd) => format!("undone: {}", describe(&cmd)),
                    None => "nothing to undo".to_string(),
                })
            }
            Command::Redo => {
                self.require_login()?;
                Ok(match self.engine.redo().await? {
                    Some(cmd) => format!("redone: {}", describe(&cmd)),
                    None => "nothing to redo".to_string(),
                })
            }
            Command::Users => {
                self.require_admin()?;
                let list = users.list().await;
                Ok(list
                    .iter()
                    .map(|u| format!("{} ({:?})", u.username, u.role))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            Command::SetRole { username, role } => {
                self.require_admin()?;
                users.set_role(&username, role).await?;
                Ok(format!("{username} is now {role:?}"))
            }
            Command::RemoveUser { username } => {
                let me = self.require_admin()?.username.clone();
                users.remove(&username).await?;
                if me == username {
                    self.user = None;
                }
                Ok(format!("user {username} removed"))
            }
        }
    }

    async fn book(&self, room: &str, request: ReservationRequest) -> Result<String, ConsoleError> {
        let (date, range) = (request.date, request.range);
        let booked = self.engine.book(room, request).await?;
        let mut out = format!("reserved {room} on {date} {range} as #{} ({})", booked.index, booked.id);
        for r in &booked.displaced {
            let _ = write!(
                out,
                "\nnotice: {} reservation of {} by {} ({}) was overridden",
                r.purpose, r.range, r.leader, r.id
            );
        }
        Ok(out)
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConsoleError {
    Empty,
    Parse(String),
    Usage(&'static str),
    UnknownCommand(String),
    NotLoggedIn,
    PermissionDenied(&'static str),
    BootstrapRequired,
    PasswordMismatch,
    Engine(EngineError),
}

impl From<EngineError> for ConsoleError {
    fn from(e: EngineError) -> Self {
        ConsoleError::Engine(e)
    }
}

impl std::fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsoleError::Empty => write!(f, "empty command"),
            ConsoleError::Parse(s) => write!(f, "parse error: {s}"),
            ConsoleError::Usage(u) => write!(f, "usage: {u}"),
            ConsoleError::UnknownCommand(c) => write!(f, "unknown command: {c} (try 'help')"),
            ConsoleError::NotLoggedIn => write!(f, "not logged in"),
            ConsoleError::PermissionDenied(why) => write!(f, "permission denied: {why}"),
            ConsoleError::BootstrapRequired => {
                write!(f, "no admin account exists; run 'bootstrap' first")
            }
            ConsoleError::PasswordMismatch => write!(f, "passwords do not match"),
            ConsoleError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConsoleError {}
