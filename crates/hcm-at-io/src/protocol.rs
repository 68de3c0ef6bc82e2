//! AT command encoding, line framing, and URC parsing.
//!
//! The module speaks a CR+LF terminated text protocol:
//!
//! ```text
//! AT+<MNEMONIC>\r\n                 execute
//! AT+<MNEMONIC>?\r\n                query
//! AT+<MNEMONIC>=<arg>[,<arg>...]\r\n  set
//! ```
//!
//! String arguments are double-quoted, integers are decimal. Nothing is
//! escaped: callers must not pass values that contain `"`, `,`, CR or LF.
//!
//! Responses are free-form lines. Unsolicited result codes (URCs) look like
//! `+QBLESTAT:1` and are recognised by the [`NOTIFICATION_PREFIX`] sentinel.

use bytes::BytesMut;

use hcm_core::events::NotificationEvent;

/// Line terminator appended to every command.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Prefix every AT command starts with.
pub const COMMAND_PREFIX: &str = "AT+";

/// Sentinel that marks a line as a BLE notification.
pub const NOTIFICATION_PREFIX: &str = "+QBLE";

/// Escape sequence that leaves transparent mode. Sent bare, no terminator.
pub const ESCAPE_SEQUENCE: &[u8] = b"+++";

/// Maximum bytes buffered without seeing a line terminator.
pub const MAX_LINE_BUF: usize = 8192;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// One argument of a set command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Bare integer or enumerated value, rendered in decimal.
    Int(i64),
    /// String payload, rendered inside double quotes.
    Str(String),
}

impl Arg {
    fn render(&self, out: &mut String) {
        match self {
            Arg::Int(n) => out.push_str(&n.to_string()),
            Arg::Str(s) => {
                out.push('"');
                out.push_str(s);
                out.push('"');
            }
        }
    }
}

impl From<i64> for Arg {
    fn from(n: i64) -> Self {
        Arg::Int(n)
    }
}

impl From<u32> for Arg {
    fn from(n: u32) -> Self {
        Arg::Int(i64::from(n))
    }
}

impl From<u16> for Arg {
    fn from(n: u16) -> Self {
        Arg::Int(i64::from(n))
    }
}

impl From<u8> for Arg {
    fn from(n: u8) -> Self {
        Arg::Int(i64::from(n))
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(s)
    }
}

/// Shape of a command line after the mnemonic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandForm {
    /// `AT+NAME`
    Exec,
    /// `AT+NAME?`
    Query,
    /// `AT+NAME=a,b,...`; an empty argument list renders like [`Exec`](Self::Exec).
    Set(Vec<Arg>),
}

/// A single AT command, built per call and discarded after it is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    mnemonic: String,
    form: CommandForm,
}

impl Command {
    /// `AT+<mnemonic>`
    pub fn exec(mnemonic: &str) -> Self {
        Self {
            mnemonic: mnemonic.to_string(),
            form: CommandForm::Exec,
        }
    }

    /// `AT+<mnemonic>?`
    pub fn query(mnemonic: &str) -> Self {
        Self {
            mnemonic: mnemonic.to_string(),
            form: CommandForm::Query,
        }
    }

    /// `AT+<mnemonic>=<args>`
    pub fn set<I, A>(mnemonic: &str, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        Self {
            mnemonic: mnemonic.to_string(),
            form: CommandForm::Set(args.into_iter().map(Into::into).collect()),
        }
    }

    /// Append one argument, turning an exec command into a set command.
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        match &mut self.form {
            CommandForm::Set(args) => args.push(arg.into()),
            _ => self.form = CommandForm::Set(vec![arg.into()]),
        }
        self
    }

    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    pub fn form(&self) -> &CommandForm {
        &self.form
    }

    /// The command line without the terminator, e.g. `AT+QBLEADDR?`.
    pub fn line(&self) -> String {
        let mut line = String::with_capacity(COMMAND_PREFIX.len() + self.mnemonic.len() + 16);
        line.push_str(COMMAND_PREFIX);
        line.push_str(&self.mnemonic);
        match &self.form {
            CommandForm::Exec => {}
            CommandForm::Query => line.push('?'),
            CommandForm::Set(args) if args.is_empty() => {}
            CommandForm::Set(args) => {
                line.push('=');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        line.push(',');
                    }
                    arg.render(&mut line);
                }
            }
        }
        line
    }

    /// Encode to wire bytes, CR+LF included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.line().into_bytes();
        out.extend_from_slice(LINE_TERMINATOR);
        out
    }
}

/// Encode `mnemonic` in `form` to wire bytes.
///
/// ```
/// use hcm_at_io::protocol::{encode_command, Arg, CommandForm};
///
/// let line = encode_command("QBLEGATTSCHAR", CommandForm::Set(vec![
///     Arg::Str("FFF1".into()),
///     Arg::Int(16),
/// ]));
/// assert_eq!(line, b"AT+QBLEGATTSCHAR=\"FFF1\",16\r\n");
/// ```
pub fn encode_command(mnemonic: &str, form: CommandForm) -> Vec<u8> {
    Command {
        mnemonic: mnemonic.to_string(),
        form,
    }
    .encode()
}

/// Strip leading and trailing whitespace and control characters.
pub fn decode_line(raw: &str) -> String {
    raw.trim_matches(|c: char| c.is_whitespace() || c.is_control())
        .to_string()
}

/// `true` for lines the module uses to reject a command.
pub fn is_error_response(line: &str) -> bool {
    line == "ERROR" || line.starts_with("+CME ERROR")
}

// ---------------------------------------------------------------------------
// Line framing
// ---------------------------------------------------------------------------

/// Splits a received byte stream into LF-terminated lines.
///
/// A CR before the LF is dropped; a lone CR is kept and later removed by
/// [`decode_line`]. Non-UTF-8 bytes are replaced rather than rejected so one
/// corrupted byte on the UART cannot wedge the stream.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    ///
    /// Returns `false` if the buffer overflowed [`MAX_LINE_BUF`] without a
    /// terminator and was cleared to resynchronise.
    pub fn push(&mut self, data: &[u8]) -> bool {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_LINE_BUF && !self.buf.contains(&b'\n') {
            tracing::warn!(len = self.buf.len(), "line buffer overflow, resetting");
            self.buf.clear();
            return false;
        }
        true
    }

    /// Pop the next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line = self.buf.split_to(pos + 1);
        line.truncate(pos);
        if line.last() == Some(&b'\r') {
            line.truncate(pos - 1);
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Take every buffered byte, framed or not.
    pub fn take_all(&mut self) -> Vec<u8> {
        self.buf.split().to_vec()
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.buf.len()
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Parse `line` as a `+QBLE...` notification.
///
/// Returns `None` for lines without the prefix and for prefixed lines with
/// no colon. Only the first colon splits, so MAC addresses in fields survive.
///
/// ```
/// use hcm_at_io::protocol::parse_notification;
///
/// let ev = parse_notification("+QBLEPEERINFO:AA:BB:CC:DD:EE:FF, MyDevice").unwrap();
/// assert_eq!(ev.kind, "QBLEPEERINFO");
/// assert_eq!(ev.fields, vec!["AA:BB:CC:DD:EE:FF", "MyDevice"]);
/// ```
pub fn parse_notification(line: &str) -> Option<NotificationEvent> {
    parse_notification_with_prefix(line, NOTIFICATION_PREFIX)
}

/// Parse `line` as a notification recognised by `prefix`.
pub fn parse_notification_with_prefix(line: &str, prefix: &str) -> Option<NotificationEvent> {
    if !line.starts_with(prefix) {
        return None;
    }
    let (head, rest) = line.split_once(':')?;
    let kind = head.strip_prefix('+').unwrap_or(head).trim().to_string();
    let fields = rest
        .trim()
        .split(',')
        .map(|f| f.trim().to_string())
        .collect();

    Some(NotificationEvent {
        kind,
        fields,
        raw: line.to_string(),
    })
}
