//! Wire codec for the ClientQuery line protocol.
//!
//! One protocol line is either a command response row set, a trailing
//! status line, or a pushed event:
//!
//! ```text
//! clid=1 client_nickname=alice|clid=2 client_nickname=bob
//! error id=0 msg=ok
//! notifytextmessage schandlerid=1 targetmode=1 msg=hello invokerid=5
//! ```
//!
//! Attributes are `key=value` tokens separated by single spaces; records
//! ("rows") are separated by `|`; multi-valued attributes are comma-joined
//! integers. The format has no quoting — values embed reserved characters
//! via the `\s`-style escape table handled by [`escape_text`] /
//! [`unescape_text`]. Everything in this module is pure and does no I/O.

// Rust guideline compliant 2025-01

use std::fmt;

/// Event name under which the remote pushes chat messages.
pub const CHAT_MESSAGE_EVENT: &str = "notifytextmessage";

/// A parsed attribute value.
///
/// Digit-run values coerce to [`Value::Int`], comma-joined digit runs to
/// [`Value::IntList`]; everything else stays text, still wire-escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A bare integer value (`clid=42`).
    Int(i64),
    /// A comma-joined integer list (`sgids=6,13,47`).
    IntList(Vec<i64>),
    /// Raw text, kept verbatim including `\s`-style escapes.
    Text(String),
}

impl Value {
    /// The value as text, if it is one.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an integer, if it is one.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    /// Renders the value in wire form (integers as digits, lists
    /// comma-joined, text verbatim).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::IntList(list) => {
                let mut first = true;
                for n in list {
                    if !first {
                        write!(f, ",")?;
                    }
                    write!(f, "{n}")?;
                    first = false;
                }
                Ok(())
            }
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One `|`-delimited record of attributes, in wire order.
///
/// Keys are lower-cased by the parser so lookups are case-insensitive
/// with respect to the remote's inconsistent casing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    attrs: Vec<(String, Value)>,
}

impl Row {
    /// Look up an attribute by (lower-case) key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Integer attribute lookup shorthand.
    #[must_use]
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    /// Text attribute lookup shorthand.
    #[must_use]
    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_text)
    }

    /// Iterate attributes in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of attributes in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// Whether the row has no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

/// The trailing status line of a command (`error id=<int> msg=<text>`).
///
/// Id 0 is success; anything else is a remote-side rejection. The message
/// text is kept wire-escaped exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Remote error code (0 = ok).
    pub id: i64,
    /// Remote message, still wire-escaped.
    pub msg: String,
}

impl Status {
    /// Whether the command succeeded.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.id == 0
    }
}

/// A full command response: data rows plus the trailing status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Zero or more data rows.
    pub rows: Vec<Row>,
    /// Trailing status line.
    pub status: Status,
}

/// A pushed server event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event name (first token, e.g. `notifytextmessage`).
    pub name: String,
    /// Server connection handle the event belongs to.
    pub handle: i64,
    /// Event payload rows.
    pub rows: Vec<Row>,
}

/// A line that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A status line that does not match `error id=<int> msg=<text>`.
    MalformedError(String),
    /// An event line with fewer than three tokens or a non-integer handle.
    MalformedEvent(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedError(line) => write!(f, "malformed error line: {line:?}"),
            Self::MalformedEvent(line) => write!(f, "malformed event line: {line:?}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Strip carriage-return and line-feed characters. Idempotent.
///
/// Every line goes through this before any further parsing.
#[must_use]
pub fn normalize(line: &str) -> String {
    line.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Coerce a raw attribute value.
///
/// A non-empty digit run becomes [`Value::Int`]; a comma-joined sequence
/// of non-empty digit runs becomes [`Value::IntList`]. Anything else --
/// including mixed lists like `1,2,x` and digit runs too large for an
/// `i64` -- stays text.
fn coerce(value: &str) -> Value {
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = value.parse::<i64>() {
            return Value::Int(n);
        }
        return Value::Text(value.to_string());
    }

    if value.contains(',') {
        let parts: Vec<&str> = value.split(',').collect();
        let all_digits = parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
        if all_digits {
            let parsed: Result<Vec<i64>, _> = parts.iter().map(|p| p.parse::<i64>()).collect();
            if let Ok(list) = parsed {
                return Value::IntList(list);
            }
        }
    }

    Value::Text(value.to_string())
}

/// Parse one `|`-segment into a [`Row`].
///
/// Tokens split on spaces; each token splits on its first `=`. A token
/// without `=` becomes an attribute with an empty-string value. Keys are
/// lower-cased.
#[must_use]
pub fn parse_row(segment: &str) -> Row {
    let mut attrs = Vec::new();
    for token in segment.split(' ') {
        if token.is_empty() {
            continue;
        }
        let (key, value) = match token.split_once('=') {
            Some((key, value)) => (key, coerce(value)),
            None => (token, Value::Text(String::new())),
        };
        attrs.push((key.to_ascii_lowercase(), value));
    }
    Row { attrs }
}

/// Split a normalized line on `|` and parse each segment.
#[must_use]
pub fn parse_rows(line: &str) -> Vec<Row> {
    normalize(line).split('|').map(parse_row).collect()
}

/// Parse a status line of the form `error id=<int> msg=<text>`.
///
/// The message is returned verbatim, wire escapes and all. Trailing
/// attributes after `msg` (the remote appends `extra_msg` or
/// `failed_permid` to some rejections) are tolerated and ignored.
///
/// # Errors
///
/// Returns [`ParseError::MalformedError`] if the `error ` prefix, the
/// integer `id`, or the `msg` attribute is missing.
pub fn parse_error(line: &str) -> Result<Status, ParseError> {
    let line = normalize(line);
    let malformed = || ParseError::MalformedError(line.clone());

    let rest = line.strip_prefix("error ").ok_or_else(malformed)?;
    let row = parse_row(rest);

    let id = match row.iter().next() {
        Some(("id", Value::Int(id))) => *id,
        _ => return Err(malformed()),
    };
    let msg = match row.iter().nth(1) {
        Some(("msg", value)) => value.to_string(),
        _ => return Err(malformed()),
    };

    Ok(Status { id, msg })
}

/// Parse a response from its data line and trailing status line.
///
/// # Errors
///
/// Returns [`ParseError::MalformedError`] if the status line does not
/// parse; the data line itself cannot fail.
pub fn parse_response(line: &str, error_line: &str) -> Result<Response, ParseError> {
    Ok(Response {
        rows: parse_rows(line),
        status: parse_error(error_line)?,
    })
}

/// Parse a pushed event line: `<name> <handle-token>=<int> <rest>`.
///
/// The first token is the event name, the second must be a bare integer
/// attribute (the server connection handle, `schandlerid=1`), and the
/// remainder parses as rows.
///
/// # Errors
///
/// Returns [`ParseError::MalformedEvent`] if fewer than three tokens are
/// present, the name is not a bare word, or the handle value is not an
/// integer.
pub fn parse_event(line: &str) -> Result<Event, ParseError> {
    let line = normalize(line);
    let malformed = || ParseError::MalformedEvent(line.clone());

    let mut parts = line.splitn(3, ' ');
    let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(malformed)?;
    let handle_token = parts.next().ok_or_else(malformed)?;
    let rest = parts.next().ok_or_else(malformed)?;

    // A name containing `=` is a response fragment, not an event.
    if name.contains('=') {
        return Err(malformed());
    }

    let handle = handle_token
        .split_once('=')
        .filter(|(_, v)| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|(_, v)| v.parse::<i64>().ok())
        .ok_or_else(malformed)?;

    Ok(Event {
        name: name.to_string(),
        handle,
        rows: parse_rows(rest),
    })
}

/// Render an outgoing command line in caller-supplied key order.
///
/// Values render in wire form (lists comma-joined). No escaping is
/// applied here; callers embed reserved characters via [`escape_text`]
/// first, mirroring the wire format's own lack of quoting.
#[must_use]
pub fn format_command(name: &str, args: &[(&str, Value)]) -> String {
    let mut line = String::from(name);
    for (key, value) in args {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&value.to_string());
    }
    line
}

/// Escape text for embedding in an outgoing attribute value.
///
/// The protocol reserves backslash, slash, space, pipe, and a handful of
/// control characters; each maps to a two-character backslash sequence.
#[must_use]
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '/' => out.push_str("\\/"),
            ' ' => out.push_str("\\s"),
            '|' => out.push_str("\\p"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x0c' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0b' => out.push_str("\\v"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse [`escape_text`]. Unknown escape sequences pass through
/// unchanged rather than failing, since inbound text is untrusted.
#[must_use]
pub fn unescape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('s') => out.push(' '),
            Some('p') => out.push('|'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\x0b'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_crlf() {
        assert_eq!(normalize("clid=1\r\n"), "clid=1");
        assert_eq!(normalize("a\rb\nc"), "abc");
        // Idempotent
        assert_eq!(normalize(&normalize("x=1\r\n")), "x=1");
    }

    #[test]
    fn test_parse_row_basic() {
        let row = parse_row("clid=1 client_nickname=alice");
        assert_eq!(row.get_int("clid"), Some(1));
        assert_eq!(row.get_text("client_nickname"), Some("alice"));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_parse_row_bare_key_has_empty_value() {
        let row = parse_row("clientlist -uid");
        assert_eq!(row.get_text("clientlist"), Some(""));
        assert_eq!(row.get_text("-uid"), Some(""));
    }

    #[test]
    fn test_parse_row_keys_lowercased() {
        let row = parse_row("CLID=7 Client_Nickname=Bob");
        assert_eq!(row.get_int("clid"), Some(7));
        assert_eq!(row.get_text("client_nickname"), Some("Bob"));
    }

    #[test]
    fn test_parse_row_value_split_on_first_equals() {
        let row = parse_row("msg=a=b");
        assert_eq!(row.get_text("msg"), Some("a=b"));
    }

    #[test]
    fn test_coercion_digit_run_is_int() {
        let row = parse_row("n=0 m=12345");
        assert_eq!(row.get_int("n"), Some(0));
        assert_eq!(row.get_int("m"), Some(12345));
    }

    #[test]
    fn test_coercion_comma_list_is_int_list() {
        let row = parse_row("sgids=6,13,47");
        assert_eq!(
            row.get("sgids"),
            Some(&Value::IntList(vec![6, 13, 47]))
        );
    }

    #[test]
    fn test_coercion_mixed_list_stays_text() {
        let row = parse_row("v=1,2,x w=1,,2");
        assert_eq!(row.get_text("v"), Some("1,2,x"));
        assert_eq!(row.get_text("w"), Some("1,,2"));
    }

    #[test]
    fn test_coercion_other_values_stay_text() {
        let row = parse_row("msg=hello version=3.5.6 neg=-1");
        assert_eq!(row.get_text("msg"), Some("hello"));
        assert_eq!(row.get_text("version"), Some("3.5.6"));
        assert_eq!(row.get_text("neg"), Some("-1"));
    }

    #[test]
    fn test_coercion_overlong_digit_run_stays_text() {
        let row = parse_row("n=99999999999999999999999999");
        assert_eq!(row.get_text("n"), Some("99999999999999999999999999"));
    }

    #[test]
    fn test_parse_rows_splits_on_pipe() {
        let rows = parse_rows("a=1|b=2");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_int("a"), Some(1));
        assert!(rows[0].get("b").is_none());
        assert_eq!(rows[1].get_int("b"), Some(2));
    }

    #[test]
    fn test_parse_error_ok_line() {
        let status = parse_error("error id=0 msg=ok").unwrap();
        assert_eq!(status.id, 0);
        assert_eq!(status.msg, "ok");
        assert!(status.ok());
    }

    #[test]
    fn test_parse_error_preserves_escapes_verbatim() {
        let status = parse_error("error id=512 msg=invalid\\sparameter").unwrap();
        assert_eq!(status.id, 512);
        assert_eq!(status.msg, "invalid\\sparameter");
        assert!(!status.ok());
    }

    #[test]
    fn test_parse_error_tolerates_trailing_attributes() {
        let status =
            parse_error("error id=2568 msg=insufficient\\sclient\\spermissions failed_permid=4")
                .unwrap();
        assert_eq!(status.id, 2568);
    }

    #[test]
    fn test_parse_error_rejects_bad_lines() {
        assert!(matches!(
            parse_error("id=0 msg=ok"),
            Err(ParseError::MalformedError(_))
        ));
        assert!(matches!(
            parse_error("error msg=ok id=0"),
            Err(ParseError::MalformedError(_))
        ));
        assert!(matches!(
            parse_error("error id=zero msg=ok"),
            Err(ParseError::MalformedError(_))
        ));
    }

    #[test]
    fn test_parse_response_rows_and_status() {
        let response =
            parse_response("clid=1 cid=4|clid=2 cid=4", "error id=0 msg=ok").unwrap();
        assert_eq!(response.rows.len(), 2);
        assert_eq!(response.rows[1].get_int("clid"), Some(2));
        assert!(response.status.ok());
    }

    #[test]
    fn test_parse_event_basic() {
        let event =
            parse_event("notifytextmessage schandlerid=1 targetmode=2 msg=hello").unwrap();
        assert_eq!(event.name, "notifytextmessage");
        assert_eq!(event.handle, 1);
        assert_eq!(event.rows.len(), 1);
        assert_eq!(event.rows[0].get_int("targetmode"), Some(2));
        assert_eq!(event.rows[0].get_text("msg"), Some("hello"));
    }

    #[test]
    fn test_parse_event_too_few_tokens() {
        assert!(matches!(
            parse_event("notifytalkstatuschange schandlerid=1"),
            Err(ParseError::MalformedEvent(_))
        ));
        assert!(matches!(
            parse_event("notifytextmessage"),
            Err(ParseError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_parse_event_rejects_non_integer_handle() {
        assert!(matches!(
            parse_event("notifytextmessage schandlerid=one msg=hi"),
            Err(ParseError::MalformedEvent(_))
        ));
        assert!(matches!(
            parse_event("notifytextmessage schandlerid msg=hi"),
            Err(ParseError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_parse_event_rejects_response_fragments() {
        // A `whoami` response line must not masquerade as an event.
        assert!(matches!(
            parse_event("clid=10 cid=5 client_nickname=bot"),
            Err(ParseError::MalformedEvent(_))
        ));
    }

    #[test]
    fn test_format_command_renders_in_caller_order() {
        let line = format_command(
            "clientmove",
            &[("cid", Value::Int(4)), ("clid", Value::Int(17))],
        );
        assert_eq!(line, "clientmove cid=4 clid=17");
    }

    #[test]
    fn test_format_command_renders_lists() {
        let line = format_command(
            "servergroupsbyclientid",
            &[("sgids", Value::IntList(vec![6, 13]))],
        );
        assert_eq!(line, "servergroupsbyclientid sgids=6,13");
    }

    #[test]
    fn test_row_format_round_trip() {
        let row = parse_row("key1=1 key2=two key3=3,4,5");
        let args: Vec<(&str, Value)> =
            row.iter().map(|(k, v)| (k, v.clone())).collect();
        let line = format_command("cmd", &args);
        assert_eq!(line, "cmd key1=1 key2=two key3=3,4,5");
        let reparsed = parse_row(line.strip_prefix("cmd ").unwrap());
        assert_eq!(reparsed, row);
    }

    #[test]
    fn test_escape_unescape_round_trip() {
        let text = "hello world|a/b\\c\nend\tdone";
        assert_eq!(unescape_text(&escape_text(text)), text);
    }

    #[test]
    fn test_escape_text_table() {
        assert_eq!(escape_text("a b"), "a\\sb");
        assert_eq!(escape_text("a|b"), "a\\pb");
        assert_eq!(escape_text("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_unescape_text_passes_unknown_escapes() {
        assert_eq!(unescape_text("a\\qb"), "a\\qb");
        assert_eq!(unescape_text("trailing\\"), "trailing\\");
    }
}
