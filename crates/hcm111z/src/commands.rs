//! HCM111Z AT command builders and response helpers.
//!
//! Every builder returns a [`Command`] ready for
//! [`AtIo::command`](hcm_at_io::AtIo::command). Builders that take free text
//! validate it first: the AT grammar has no escaping, so a `"` or line break
//! inside a quoted argument would end the argument or the line early.
//!
//! # Command reference
//!
//! | Mnemonic           | Form                        | Effect                    |
//! |--------------------|-----------------------------|---------------------------|
//! | `QRST`             | exec                        | restart the module        |
//! | `QVERSION`         | exec                        | firmware version          |
//! | `QSETBAUD`         | `=<baud>`                   | change UART baud rate     |
//! | `QBLEINIT`         | `=<role>`                   | initialise the BLE stack  |
//! | `QBLENAME`         | `="<name>"`                 | set the advertised name   |
//! | `QBLEADDR`         | query                       | read the BLE address      |
//! | `QBLEADVSTART`     | exec                        | start advertising         |
//! | `QBLEADVSTOP`      | exec                        | stop advertising          |
//! | `QBLEGATTSSRV`     | `="<uuid>"`                 | add a GATT service        |
//! | `QBLEGATTSCHAR`    | `="<uuid>",<props>`         | add a characteristic      |
//! | `QBLEGATTSSRVDONE` | exec                        | commit the GATT database  |
//! | `QBLEGATTSNTFY`    | `=<conn>,<handle>,"<hex>"`  | send a notification       |
//! | `QBLETRANMODE`     | `="<uuid>"`                 | enter transparent mode    |

use hcm_at_io::protocol::{is_error_response, Command};
use hcm_core::types::{CharacteristicProperties, Role};
use hcm_core::{Error, Result};

pub const MN_RESTART: &str = "QRST";
pub const MN_VERSION: &str = "QVERSION";
pub const MN_SET_BAUD: &str = "QSETBAUD";
pub const MN_INIT: &str = "QBLEINIT";
pub const MN_NAME: &str = "QBLENAME";
pub const MN_ADDRESS: &str = "QBLEADDR";
pub const MN_ADV_START: &str = "QBLEADVSTART";
pub const MN_ADV_STOP: &str = "QBLEADVSTOP";
pub const MN_ADD_SERVICE: &str = "QBLEGATTSSRV";
pub const MN_ADD_CHARACTERISTIC: &str = "QBLEGATTSCHAR";
pub const MN_GATT_DONE: &str = "QBLEGATTSSRVDONE";
pub const MN_NOTIFY: &str = "QBLEGATTSNTFY";
pub const MN_TRANSPARENT: &str = "QBLETRANMODE";

// ---------------------------------------------------------------
// Validation
// ---------------------------------------------------------------

/// Reject text that cannot sit inside a quoted AT argument.
pub fn validate_quoted(what: &str, value: &str) -> Result<()> {
    if value.contains(['"', '\r', '\n']) {
        return Err(Error::InvalidParameter(format!(
            "{what} must not contain quotes or line breaks: {value:?}"
        )));
    }
    Ok(())
}

/// Validate a 16- or 128-bit UUID argument.
pub fn validate_uuid(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidParameter("UUID must not be empty".into()));
    }
    validate_quoted("UUID", value)
}

/// Validate a notification payload: non-empty, even-length hexadecimal.
pub fn validate_hex(value: &str) -> Result<()> {
    if value.is_empty() || value.len() % 2 != 0 {
        return Err(Error::InvalidParameter(format!(
            "hex value must have a non-zero even length: {value:?}"
        )));
    }
    if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidParameter(format!(
            "hex value contains non-hex characters: {value:?}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------
// General control
// ---------------------------------------------------------------

/// `AT+QRST`
pub fn cmd_restart() -> Command {
    Command::exec(MN_RESTART)
}

/// `AT+QVERSION`
pub fn cmd_version() -> Command {
    Command::exec(MN_VERSION)
}

/// `AT+QSETBAUD=<baud>`
///
/// The module switches rate after replying; the host port must be reopened
/// at the new rate before the next command.
pub fn cmd_set_baud(baud: u32) -> Command {
    Command::set(MN_SET_BAUD, [baud])
}

// ---------------------------------------------------------------
// BLE stack
// ---------------------------------------------------------------

/// `AT+QBLEINIT=<role>`
pub fn cmd_init(role: Role) -> Command {
    Command::set(MN_INIT, [role.code()])
}

/// `AT+QBLENAME="<name>"`
pub fn cmd_set_name(name: &str) -> Result<Command> {
    validate_quoted("device name", name)?;
    Ok(Command::set(MN_NAME, [name]))
}

/// `AT+QBLEADDR?`
pub fn cmd_query_address() -> Command {
    Command::query(MN_ADDRESS)
}

/// `AT+QBLEADVSTART`
pub fn cmd_adv_start() -> Command {
    Command::exec(MN_ADV_START)
}

/// `AT+QBLEADVSTOP`
pub fn cmd_adv_stop() -> Command {
    Command::exec(MN_ADV_STOP)
}

// ---------------------------------------------------------------
// GATT server
// ---------------------------------------------------------------

/// `AT+QBLEGATTSSRV="<uuid>"`
pub fn cmd_add_service(uuid: &str) -> Result<Command> {
    validate_uuid(uuid)?;
    Ok(Command::set(MN_ADD_SERVICE, [uuid]))
}

/// `AT+QBLEGATTSCHAR="<uuid>",<props>`
pub fn cmd_add_characteristic(uuid: &str, properties: CharacteristicProperties) -> Result<Command> {
    validate_uuid(uuid)?;
    Ok(Command::exec(MN_ADD_CHARACTERISTIC)
        .arg(uuid)
        .arg(properties.bits()))
}

/// `AT+QBLEGATTSSRVDONE`
pub fn cmd_gatt_done() -> Command {
    Command::exec(MN_GATT_DONE)
}

/// `AT+QBLEGATTSNTFY=<conn>,<handle>,"<hex>"`
pub fn cmd_notify(conn_index: u8, handle: u16, hex_value: &str) -> Result<Command> {
    validate_hex(hex_value)?;
    Ok(Command::exec(MN_NOTIFY)
        .arg(conn_index)
        .arg(handle)
        .arg(hex_value))
}

/// `AT+QBLETRANMODE="<uuid>"`
pub fn cmd_transparent_mode(uuid: &str) -> Result<Command> {
    validate_uuid(uuid)?;
    Ok(Command::set(MN_TRANSPARENT, [uuid]))
}

// ---------------------------------------------------------------
// Responses
// ---------------------------------------------------------------

/// Map an `ERROR` / `+CME ERROR` reply to [`Error::Protocol`].
pub fn check_response(mnemonic: &str, response: String) -> Result<String> {
    if is_error_response(&response) {
        return Err(Error::Protocol(format!(
            "AT+{mnemonic} rejected: {response}"
        )));
    }
    Ok(response)
}

/// Extract the address from a `+QBLEADDR:<addr>` reply.
///
/// Replies without the prefix are returned trimmed, as sent.
pub fn parse_address_response(response: &str) -> String {
    response
        .strip_prefix("+QBLEADDR:")
        .unwrap_or(response)
        .trim()
        .to_string()
}
