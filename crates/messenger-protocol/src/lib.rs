//! Wire grammar for the messenger chat protocol.
//!
//! Application payloads are UTF-8 text, one logical command or chat line per
//! frame. The first colon-delimited token selects the command; any line that
//! does not start with a known command prefix is a chat line.

/// A parsed inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Register { login: &'a str, password: &'a str },
    Login { login: &'a str, password: &'a str },
    Logout { login: &'a str },
    /// Anything that is not a recognized command prefix.
    Chat(&'a str),
}

/// A line that matched a command prefix but not the command's syntax.
///
/// Malformed input is a protocol-level condition, not an error: the peer gets
/// an inline `System:` reply and the session keeps reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    Register,
    Login,
}

impl Malformed {
    /// The `System:` reply sent back for this malformed line.
    pub fn reply(self) -> &'static str {
        match self {
            Malformed::Register => reply::INVALID_REGISTRATION,
            Malformed::Login => reply::INVALID_LOGIN,
        }
    }
}

/// Parse one inbound line.
///
/// `register` and `login` split their payload on the first `:` after the
/// prefix; a missing delimiter is malformed. `logout` takes everything after
/// the prefix as the login. A bare `logout` with no colon is a chat line.
pub fn parse(line: &str) -> Result<Command<'_>, Malformed> {
    if let Some(rest) = line.strip_prefix("register:") {
        return match rest.split_once(':') {
            Some((login, password)) => Ok(Command::Register { login, password }),
            None => Err(Malformed::Register),
        };
    }
    if let Some(rest) = line.strip_prefix("login:") {
        return match rest.split_once(':') {
            Some((login, password)) => Ok(Command::Login { login, password }),
            None => Err(Malformed::Login),
        };
    }
    if let Some(login) = line.strip_prefix("logout:") {
        return Ok(Command::Logout { login });
    }
    Ok(Command::Chat(line))
}

/// Recognize the `<user>: <content>` chat shape used for persistence.
///
/// Only shaped lines are saved to history; every chat line is broadcast
/// regardless.
pub fn chat_shape(line: &str) -> Option<(&str, &str)> {
    let (user, content) = line.split_once(": ")?;
    if user.is_empty() {
        return None;
    }
    Some((user, content))
}

/// Canonical `System:` reply and broadcast strings.
pub mod reply {
    pub const INVALID_REGISTRATION: &str = "System: Invalid registration format";
    pub const REGISTRATION_OK: &str = "System: Registration successful";
    pub const REGISTRATION_CONFLICT: &str = "System: Registration failed - login already exists";
    pub const INVALID_LOGIN: &str = "System: Invalid login format";
    pub const LOGIN_OK: &str = "System: Login successful";
    pub const LOGIN_FAILED: &str = "System: Login failed";
    pub const LOGOUT_OK: &str = "System: Logout successful";
    pub const LOGOUT_INVALID_USER: &str = "System: Logout failed - invalid user";
    pub const LOGIN_REQUIRED: &str = "System: Please login first";

    pub fn joined(login: &str) -> String {
        format!("System: {login} joined the chat")
    }

    pub fn left(login: &str) -> String {
        format!("System: {login} left the chat")
    }
}
