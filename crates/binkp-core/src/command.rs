//! binkp commands and their argument formats.
//!
//! Command arguments are ASCII text. File names travel with space, backslash
//! and control bytes escaped as `\xHH`, so that the space-separated fields
//! of FILE, GET, GOT and SKIP stay unambiguous.

use crate::error::FrameError;
use crate::frame::{Frame, FrameKind};
use std::borrow::Cow;
use std::fmt;

/// Command codes as assigned by binkp/1.0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    /// Informational text, banners and option negotiation
    Nul = 0,
    /// Address list offer
    Adr = 1,
    /// Password or challenge response
    Pwd = 2,
    /// File offer
    File = 3,
    /// Authentication accepted
    Ok = 4,
    /// End of batch
    Eob = 5,
    /// File received
    Got = 6,
    /// Fatal error
    Err = 7,
    /// Busy, try later
    Bsy = 8,
    /// Request (re)transmission from an offset
    Get = 9,
    /// Decline a file for now
    Skip = 10,
}

impl CommandCode {
    /// Wire name of the command
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Nul => "M_NUL",
            Self::Adr => "M_ADR",
            Self::Pwd => "M_PWD",
            Self::File => "M_FILE",
            Self::Ok => "M_OK",
            Self::Eob => "M_EOB",
            Self::Got => "M_GOT",
            Self::Err => "M_ERR",
            Self::Bsy => "M_BSY",
            Self::Get => "M_GET",
            Self::Skip => "M_SKIP",
        }
    }
}

impl TryFrom<u8> for CommandCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Nul),
            1 => Ok(Self::Adr),
            2 => Ok(Self::Pwd),
            3 => Ok(Self::File),
            4 => Ok(Self::Ok),
            5 => Ok(Self::Eob),
            6 => Ok(Self::Got),
            7 => Ok(Self::Err),
            8 => Ok(Self::Bsy),
            9 => Ok(Self::Get),
            10 => Ok(Self::Skip),
            other => Err(FrameError::UnknownCommand(other)),
        }
    }
}

/// Arguments of FILE and GET: which file, and where to start
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileOffer {
    /// File name, unescaped
    pub name: String,
    /// Total size in bytes
    pub size: u64,
    /// Modification time, Unix seconds
    pub mtime: i64,
    /// Starting offset
    pub offset: u64,
}

impl FileOffer {
    /// Create an offer
    pub fn new(name: impl Into<String>, size: u64, mtime: i64, offset: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mtime,
            offset,
        }
    }

    /// Identity of the offered file, without the offset
    #[must_use]
    pub fn file_ref(&self) -> FileRef {
        FileRef::new(self.name.clone(), self.size, self.mtime)
    }

    /// Check if this offer describes `file`
    #[must_use]
    pub fn refers_to(&self, file: &FileRef) -> bool {
        self.name == file.name && self.size == file.size && self.mtime == file.mtime
    }
}

/// Arguments of GOT and SKIP: which file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRef {
    /// File name, unescaped
    pub name: String,
    /// Total size in bytes
    pub size: u64,
    /// Modification time, Unix seconds
    pub mtime: i64,
}

impl FileRef {
    /// Create a file reference
    pub fn new(name: impl Into<String>, size: u64, mtime: i64) -> Self {
        Self {
            name: name.into(),
            size,
            mtime,
        }
    }
}

/// A decoded command frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Informational text (`SYS`, `ZYZ`, `LOC`, `VER`, `OPT` ...)
    Nul(String),
    /// Space-separated address list
    Adr(String),
    /// Password, `CRAM-MD5-<digest>` response, or `-`
    Pwd(String),
    /// File offer
    File(FileOffer),
    /// Authentication accepted, with optional text
    Ok(String),
    /// No more files from the sender
    Eob,
    /// File received in full
    Got(FileRef),
    /// Fatal error, with reason
    Err(String),
    /// Busy, with reason
    Bsy(String),
    /// Resend a file starting at an offset
    Get(FileOffer),
    /// File declined for this session
    Skip(FileRef),
}

impl Command {
    /// Command code
    #[must_use]
    pub fn code(&self) -> CommandCode {
        match self {
            Self::Nul(_) => CommandCode::Nul,
            Self::Adr(_) => CommandCode::Adr,
            Self::Pwd(_) => CommandCode::Pwd,
            Self::File(_) => CommandCode::File,
            Self::Ok(_) => CommandCode::Ok,
            Self::Eob => CommandCode::Eob,
            Self::Got(_) => CommandCode::Got,
            Self::Err(_) => CommandCode::Err,
            Self::Bsy(_) => CommandCode::Bsy,
            Self::Get(_) => CommandCode::Get,
            Self::Skip(_) => CommandCode::Skip,
        }
    }

    /// Argument text as sent on the wire
    #[must_use]
    pub fn args(&self) -> String {
        match self {
            Self::Nul(s)
            | Self::Adr(s)
            | Self::Pwd(s)
            | Self::Ok(s)
            | Self::Err(s)
            | Self::Bsy(s) => s.clone(),
            Self::Eob => String::new(),
            Self::File(offer) | Self::Get(offer) => format!(
                "{} {} {} {}",
                escape_name(&offer.name),
                offer.size,
                offer.mtime,
                offer.offset
            ),
            Self::Got(file) | Self::Skip(file) => {
                format!("{} {} {}", escape_name(&file.name), file.size, file.mtime)
            }
        }
    }

    /// Build the command frame
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame::command(self.code() as u8, self.args().as_bytes())
    }

    /// Parse a command frame.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCommand` for codes outside binkp/1.0 (callers may
    /// ignore these), `EmptyCommand` for an empty payload, and
    /// `InvalidArguments` for unparsable file arguments. Data frames are
    /// reported as `InvalidArguments` as well.
    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        if frame.kind() != FrameKind::Command {
            return Err(FrameError::InvalidArguments {
                command: "data",
                reason: Cow::Borrowed("data frame is not a command"),
            });
        }
        let payload = frame.payload();
        let (&code, args) = payload.split_first().ok_or(FrameError::EmptyCommand)?;
        Self::parse(CommandCode::try_from(code)?, args)
    }

    /// Parse arguments for a known command code
    ///
    /// # Errors
    ///
    /// Returns `InvalidArguments` if file arguments are malformed.
    pub fn parse(code: CommandCode, args: &[u8]) -> Result<Self, FrameError> {
        // Some mailers NUL-terminate arguments
        let end = args.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let args = &args[..end];
        let text = String::from_utf8_lossy(args).into_owned();
        Ok(match code {
            CommandCode::Nul => Self::Nul(text),
            CommandCode::Adr => Self::Adr(text),
            CommandCode::Pwd => Self::Pwd(text),
            CommandCode::Ok => Self::Ok(text),
            CommandCode::Err => Self::Err(text),
            CommandCode::Bsy => Self::Bsy(text),
            CommandCode::Eob => Self::Eob,
            CommandCode::File => Self::File(parse_offer(code, &text)?),
            CommandCode::Get => Self::Get(parse_offer(code, &text)?),
            CommandCode::Got => Self::Got(parse_ref(code, &text)?),
            CommandCode::Skip => Self::Skip(parse_ref(code, &text)?),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Never log passwords or challenge responses
            Self::Pwd(_) => write!(f, "{} ****", self.code().name()),
            Self::Eob => f.write_str(self.code().name()),
            _ => write!(f, "{} {}", self.code().name(), self.args()),
        }
    }
}

fn invalid(code: CommandCode, reason: impl Into<Cow<'static, str>>) -> FrameError {
    FrameError::InvalidArguments {
        command: code.name(),
        reason: reason.into(),
    }
}

fn parse_fields(code: CommandCode, text: &str) -> Result<(String, u64, i64, Option<u64>), FrameError> {
    let mut fields = text.split_ascii_whitespace();
    let name = fields.next().ok_or_else(|| invalid(code, "missing file name"))?;
    let size = fields
        .next()
        .ok_or_else(|| invalid(code, "missing size"))?
        .parse::<u64>()
        .map_err(|_| invalid(code, "size is not a number"))?;
    let mtime = fields
        .next()
        .ok_or_else(|| invalid(code, "missing timestamp"))?
        .parse::<i64>()
        .map_err(|_| invalid(code, "timestamp is not a number"))?;
    let offset = match fields.next() {
        Some(s) => Some(
            s.parse::<u64>()
                .map_err(|_| invalid(code, "offset is not a number"))?,
        ),
        None => None,
    };

    let name = unescape_name(name);
    if name.is_empty() {
        return Err(invalid(code, "empty file name"));
    }
    Ok((name, size, mtime, offset))
}

fn parse_offer(code: CommandCode, text: &str) -> Result<FileOffer, FrameError> {
    let (name, size, mtime, offset) = parse_fields(code, text)?;
    Ok(FileOffer::new(name, size, mtime, offset.unwrap_or(0)))
}

fn parse_ref(code: CommandCode, text: &str) -> Result<FileRef, FrameError> {
    let (name, size, mtime, _) = parse_fields(code, text)?;
    Ok(FileRef::new(name, size, mtime))
}

/// Escape a file name for the wire.
///
/// Space, backslash, control and non-ASCII bytes become `\xHH`.
#[must_use]
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for &b in name.as_bytes() {
        if b <= b' ' || b == b'\\' || b >= 0x7F {
            out.push_str(&format!("\\x{b:02x}"));
        } else {
            out.push(char::from(b));
        }
    }
    out
}

/// Reverse [`escape_name`]. Malformed escapes are kept literally.
#[must_use]
pub fn unescape_name(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
            if let Some(b) = std::str::from_utf8(&bytes[i + 2..i + 4])
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
            {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split a NUL line into its keyword and the rest, e.g. `("SYS", "My BBS")`
#[must_use]
pub fn nul_field(text: &str) -> Option<(&str, &str)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match text.split_once(' ') {
        Some((key, value)) => Some((key, value.trim())),
        None => Some((text, "")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(cmd: &Command) -> Command {
        Command::from_frame(&cmd.to_frame()).unwrap()
    }

    #[test]
    fn test_code_values() {
        assert_eq!(CommandCode::Nul as u8, 0);
        assert_eq!(CommandCode::Skip as u8, 10);
        assert_eq!(CommandCode::try_from(9).unwrap(), CommandCode::Get);
        assert_eq!(
            CommandCode::try_from(11),
            Err(FrameError::UnknownCommand(11))
        );
    }

    #[test]
    fn test_file_offer_wire_format() {
        let cmd = Command::File(FileOffer::new("A.PKT", 100, 1_700_000_000, 0));
        let frame = cmd.to_frame();
        assert_eq!(frame.payload().as_ref(), b"\x03A.PKT 100 1700000000 0");
        assert_eq!(roundtrip(&cmd), cmd);
    }

    #[test]
    fn test_got_and_skip_wire_format() {
        let cmd = Command::Got(FileRef::new("A.PKT", 100, 1));
        assert_eq!(cmd.args(), "A.PKT 100 1");
        assert_eq!(roundtrip(&cmd), cmd);

        let cmd = Command::Skip(FileRef::new("B.PKT", 5, 2));
        assert_eq!(roundtrip(&cmd), cmd);
    }

    #[test]
    fn test_trailing_nul_stripped() {
        let frame = Frame::command(0, b"SYS Test BBS\0");
        assert_eq!(
            Command::from_frame(&frame).unwrap(),
            Command::Nul("SYS Test BBS".into())
        );
    }

    #[test]
    fn test_name_escaping() {
        assert_eq!(escape_name("my file.txt"), "my\\x20file.txt");
        assert_eq!(escape_name("a\\b"), "a\\x5cb");
        assert_eq!(unescape_name("my\\x20file.txt"), "my file.txt");
        assert_eq!(unescape_name("bad\\xzz"), "bad\\xzz");
        assert_eq!(unescape_name("tail\\x2"), "tail\\x2");

        let cmd = Command::File(FileOffer::new("with space", 3, 0, 0));
        assert_eq!(roundtrip(&cmd), cmd);
    }

    #[test]
    fn test_file_without_offset_defaults_to_zero() {
        let cmd = Command::parse(CommandCode::File, b"X.PKT 10 20").unwrap();
        assert_eq!(cmd, Command::File(FileOffer::new("X.PKT", 10, 20, 0)));
    }

    #[test]
    fn test_invalid_file_arguments() {
        for args in [
            &b""[..],
            &b"X.PKT"[..],
            &b"X.PKT ten 0 0"[..],
            &b"X.PKT 10 0 -1"[..],
            &b"X.PKT 10 zz"[..],
        ] {
            assert!(
                matches!(
                    Command::parse(CommandCode::File, args),
                    Err(FrameError::InvalidArguments { command: "M_FILE", .. })
                ),
                "{:?}",
                String::from_utf8_lossy(args)
            );
        }
    }

    #[test]
    fn test_unknown_and_empty() {
        let frame = Frame::command(42, b"future");
        assert_eq!(
            Command::from_frame(&frame),
            Err(FrameError::UnknownCommand(42))
        );
        assert!(Command::from_frame(&Frame::data(&b"x"[..])).is_err());
    }

    #[test]
    fn test_display_hides_password() {
        let cmd = Command::Pwd("secret".into());
        assert_eq!(cmd.to_string(), "M_PWD ****");
        assert_eq!(Command::Eob.to_string(), "M_EOB");
    }

    #[test]
    fn test_nul_field() {
        assert_eq!(nul_field("SYS My BBS"), Some(("SYS", "My BBS")));
        assert_eq!(nul_field("OPT CRAM-MD5-abc"), Some(("OPT", "CRAM-MD5-abc")));
        assert_eq!(nul_field("TRF"), Some(("TRF", "")));
        assert_eq!(nul_field("  "), None);
    }
}
