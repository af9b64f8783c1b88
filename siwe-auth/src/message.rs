// siwe-auth/src/message.rs
//! EIP-4361 message parsing and rendering.
//!
//! Parsing is strict: fields must appear in the canonical order, each at most
//! once, and anything unrecognised fails the whole message. There is no
//! partially-populated result.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;
use std::iter::Peekable;
use std::str::FromStr;

use crate::address::Address;
use crate::error::ParseError;

const HEADER_SUFFIX: &str = " wants you to sign in with your Ethereum account:";
const URI_TAG: &str = "URI: ";
const VERSION_TAG: &str = "Version: ";
const CHAIN_ID_TAG: &str = "Chain ID: ";
const NONCE_TAG: &str = "Nonce: ";
const ISSUED_AT_TAG: &str = "Issued At: ";
const EXPIRATION_TIME_TAG: &str = "Expiration Time: ";
const NOT_BEFORE_TAG: &str = "Not Before: ";
const REQUEST_ID_TAG: &str = "Request ID: ";
const RESOURCES_TAG: &str = "Resources:";

pub const SUPPORTED_VERSION: &str = "1";
pub const MIN_NONCE_LEN: usize = 8;

/// A fully-validated sign-in claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiweMessage {
    pub scheme: Option<String>,
    pub domain: String,
    pub address: Address,
    pub statement: Option<String>,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
    pub resources: Vec<String>,
}

type Lines<'a> = Peekable<std::iter::Enumerate<std::str::Split<'a, char>>>;

impl SiweMessage {
    /// Build a minimal claim; optional fields can be set on the returned value.
    pub fn new(
        domain: impl Into<String>,
        address: Address,
        uri: impl Into<String>,
        chain_id: u64,
        nonce: impl Into<String>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            scheme: None,
            domain: domain.into(),
            address,
            statement: None,
            uri: uri.into(),
            version: SUPPORTED_VERSION.to_string(),
            chain_id,
            nonce: nonce.into(),
            issued_at,
            expiration_time: None,
            not_before: None,
            request_id: None,
            resources: Vec::new(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        if raw.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let mut lines: Lines<'_> = raw.split('\n').enumerate().peekable();

        let (_, header) = next_line(&mut lines).ok_or(ParseError::InvalidHeader)?;
        let (scheme, domain) = parse_header(header)?;

        let (_, address_line) = next_line(&mut lines).ok_or(ParseError::MissingField("address"))?;
        let address = address_line
            .parse::<Address>()
            .map_err(|e| ParseError::InvalidAddress(e.to_string()))?;

        expect_blank(&mut lines)?;
        let statement = parse_statement(&mut lines)?;

        let uri = required(&mut lines, URI_TAG, "URI")?;
        if uri.is_empty() || uri.chars().any(char::is_whitespace) {
            return Err(invalid("URI", "not a valid URI"));
        }

        let version = required(&mut lines, VERSION_TAG, "Version")?;
        if version != SUPPORTED_VERSION {
            return Err(invalid("Version", format!("unsupported version {version}")));
        }

        let chain_id = required(&mut lines, CHAIN_ID_TAG, "Chain ID")?
            .parse::<u64>()
            .map_err(|e| invalid("Chain ID", e.to_string()))?;

        let nonce = required(&mut lines, NONCE_TAG, "Nonce")?;
        if nonce.len() < MIN_NONCE_LEN || !nonce.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid("Nonce", "must be at least 8 alphanumeric characters"));
        }

        let issued_at = parse_timestamp("Issued At", &required(&mut lines, ISSUED_AT_TAG, "Issued At")?)?;
        let expiration_time = optional(&mut lines, EXPIRATION_TIME_TAG)
            .map(|v| parse_timestamp("Expiration Time", &v))
            .transpose()?;
        let not_before = optional(&mut lines, NOT_BEFORE_TAG)
            .map(|v| parse_timestamp("Not Before", &v))
            .transpose()?;
        let request_id = optional(&mut lines, REQUEST_ID_TAG);
        let resources = parse_resources(&mut lines)?;

        // Only trailing blank lines may follow
        for (index, line) in lines {
            if !line.trim_end_matches('\r').is_empty() {
                return Err(ParseError::UnexpectedLine {
                    line: index + 1,
                    reason: "unrecognised or out-of-order field",
                });
            }
        }

        Ok(Self {
            scheme,
            domain,
            address,
            statement,
            uri,
            version,
            chain_id,
            nonce,
            issued_at,
            expiration_time,
            not_before,
            request_id,
            resources,
        })
    }
}

impl FromStr for SiweMessage {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Renders the canonical EIP-4361 text a wallet is asked to sign.
impl fmt::Display for SiweMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{scheme}://")?;
        }
        writeln!(f, "{}{HEADER_SUFFIX}", self.domain)?;
        writeln!(f, "{}", self.address)?;
        writeln!(f)?;
        if let Some(statement) = &self.statement {
            writeln!(f, "{statement}")?;
        }
        writeln!(f)?;
        writeln!(f, "{URI_TAG}{}", self.uri)?;
        writeln!(f, "{VERSION_TAG}{}", self.version)?;
        writeln!(f, "{CHAIN_ID_TAG}{}", self.chain_id)?;
        writeln!(f, "{NONCE_TAG}{}", self.nonce)?;
        write!(f, "{ISSUED_AT_TAG}{}", format_timestamp(&self.issued_at))?;
        if let Some(exp) = &self.expiration_time {
            write!(f, "\n{EXPIRATION_TIME_TAG}{}", format_timestamp(exp))?;
        }
        if let Some(nbf) = &self.not_before {
            write!(f, "\n{NOT_BEFORE_TAG}{}", format_timestamp(nbf))?;
        }
        if let Some(request_id) = &self.request_id {
            write!(f, "\n{REQUEST_ID_TAG}{request_id}")?;
        }
        if !self.resources.is_empty() {
            write!(f, "\n{RESOURCES_TAG}")?;
            for resource in &self.resources {
                write!(f, "\n- {resource}")?;
            }
        }
        Ok(())
    }
}

fn next_line<'a>(lines: &mut Lines<'a>) -> Option<(usize, &'a str)> {
    lines.next().map(|(i, l)| (i, l.strip_suffix('\r').unwrap_or(l)))
}

fn peek_line<'a>(lines: &mut Lines<'a>) -> Option<&'a str> {
    lines.peek().map(|(_, l)| l.strip_suffix('\r').unwrap_or(l))
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ParseError {
    ParseError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn parse_header(header: &str) -> Result<(Option<String>, String), ParseError> {
    let authority = header.strip_suffix(HEADER_SUFFIX).ok_or(ParseError::InvalidHeader)?;

    let (scheme, domain) = match authority.split_once("://") {
        Some((scheme, domain)) => {
            let valid_scheme = scheme
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
            if !valid_scheme {
                return Err(ParseError::InvalidHeader);
            }
            (Some(scheme.to_string()), domain)
        }
        None => (None, authority),
    };

    if domain.is_empty() || domain.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(ParseError::InvalidHeader);
    }

    Ok((scheme, domain.to_string()))
}

fn expect_blank(lines: &mut Lines<'_>) -> Result<(), ParseError> {
    match next_line(lines) {
        Some((_, "")) => Ok(()),
        Some((index, _)) => Err(ParseError::UnexpectedLine {
            line: index + 1,
            reason: "expected blank line",
        }),
        None => Err(ParseError::MissingField("URI")),
    }
}

// Accepts both the canonical blank-line form and the older single-blank
// layout some wallets still produce when there is no statement.
fn parse_statement(lines: &mut Lines<'_>) -> Result<Option<String>, ParseError> {
    match peek_line(lines) {
        Some("") => {
            lines.next();
            Ok(None)
        }
        Some(line) if line.starts_with(URI_TAG) => Ok(None),
        Some(line) => {
            let statement = line.to_string();
            lines.next();
            expect_blank(lines)?;
            Ok(Some(statement))
        }
        None => Err(ParseError::MissingField("URI")),
    }
}

fn required(lines: &mut Lines<'_>, tag: &str, field: &'static str) -> Result<String, ParseError> {
    optional(lines, tag).ok_or(ParseError::MissingField(field))
}

fn optional(lines: &mut Lines<'_>, tag: &str) -> Option<String> {
    let value = peek_line(lines)?.strip_prefix(tag)?.to_string();
    lines.next();
    Some(value)
}

fn parse_resources(lines: &mut Lines<'_>) -> Result<Vec<String>, ParseError> {
    if peek_line(lines) != Some(RESOURCES_TAG) {
        return Ok(Vec::new());
    }
    lines.next();

    let mut resources = Vec::new();
    while let Some(resource) = peek_line(lines).and_then(|l| l.strip_prefix("- ")) {
        if resource.is_empty() || resource.chars().any(char::is_whitespace) {
            return Err(invalid("Resources", "not a valid URI"));
        }
        resources.push(resource.to_string());
        lines.next();
    }
    Ok(resources)
}

fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, ParseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ParseError::InvalidTimestamp {
            field,
            reason: e.to_string(),
        })
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FULL: &str = "https://example.com wants you to sign in with your Ethereum account:
0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed

Sign in to the gateway

URI: https://example.com/login
Version: 1
Chain ID: 10143
Nonce: 32891756abc
Issued At: 2021-09-30T16:25:24Z
Expiration Time: 2021-09-30T16:30:24.000Z
Not Before: 2021-09-30T16:25:24+00:00
Request ID: req-17
Resources:
- ipfs://bafybeiemxf5abjwjbikoz4mc3a3dla6ual3jsgpdr4cjr3oz3evfyavhwq/
- https://example.com/my-web2-claim.json";

    const MINIMAL: &str = "example.com wants you to sign in with your Ethereum account:
0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed


URI: https://example.com
Version: 1
Chain ID: 1
Nonce: abc12345
Issued At: 2024-01-01T00:00:00Z";

    #[test]
    fn test_parse_full_message() {
        let msg = SiweMessage::parse(FULL).unwrap();
        assert_eq!(msg.scheme.as_deref(), Some("https"));
        assert_eq!(msg.domain, "example.com");
        assert_eq!(msg.address.to_string(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        assert_eq!(msg.statement.as_deref(), Some("Sign in to the gateway"));
        assert_eq!(msg.uri, "https://example.com/login");
        assert_eq!(msg.chain_id, 10143);
        assert_eq!(msg.nonce, "32891756abc");
        assert_eq!(msg.issued_at, Utc.with_ymd_and_hms(2021, 9, 30, 16, 25, 24).unwrap());
        assert_eq!(msg.expiration_time, Some(Utc.with_ymd_and_hms(2021, 9, 30, 16, 30, 24).unwrap()));
        assert_eq!(msg.not_before, Some(msg.issued_at));
        assert_eq!(msg.request_id.as_deref(), Some("req-17"));
        assert_eq!(msg.resources.len(), 2);
    }

    #[test]
    fn test_parse_minimal_message() {
        let msg = SiweMessage::parse(MINIMAL).unwrap();
        assert_eq!(msg.scheme, None);
        assert_eq!(msg.statement, None);
        assert_eq!(msg.expiration_time, None);
        assert_eq!(msg.not_before, None);
        assert!(msg.resources.is_empty());
    }

    #[test]
    fn test_parse_accepts_single_blank_without_statement() {
        let raw = MINIMAL.replacen("\n\n\n", "\n\n", 1);
        let msg = SiweMessage::parse(&raw).unwrap();
        assert_eq!(msg.statement, None);
        assert_eq!(msg.uri, "https://example.com");
    }

    #[test]
    fn test_parse_accepts_crlf_and_trailing_newline() {
        let raw = format!("{}\r\n", FULL.replace('\n', "\r\n"));
        let msg = SiweMessage::parse(&raw).unwrap();
        assert_eq!(msg.resources[1], "https://example.com/my-web2-claim.json");
    }

    #[test]
    fn test_rendered_message_parses_back() {
        let msg = SiweMessage::parse(FULL).unwrap();
        let again = SiweMessage::parse(&msg.to_string()).unwrap();
        assert_eq!(msg, again);
    }

    #[test]
    fn test_rejects_bad_header() {
        let raw = MINIMAL.replace("wants you to sign in", "would like you to sign in");
        assert_eq!(SiweMessage::parse(&raw), Err(ParseError::InvalidHeader));

        let raw = MINIMAL.replacen("example.com", "exa mple.com", 1);
        assert_eq!(SiweMessage::parse(&raw), Err(ParseError::InvalidHeader));
    }

    #[test]
    fn test_rejects_bad_address() {
        let raw = MINIMAL.replace("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed", "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD");
        assert!(matches!(SiweMessage::parse(&raw), Err(ParseError::InvalidAddress(_))));
    }

    #[test]
    fn test_rejects_missing_required_fields() {
        for (line, field) in [
            ("URI: https://example.com\n", "URI"),
            ("Version: 1\n", "Version"),
            ("Chain ID: 1\n", "Chain ID"),
            ("Nonce: abc12345\n", "Nonce"),
        ] {
            let raw = MINIMAL.replace(line, "");
            assert_eq!(SiweMessage::parse(&raw), Err(ParseError::MissingField(field)), "{field}");
        }

        let raw = MINIMAL.replace("\nIssued At: 2024-01-01T00:00:00Z", "");
        assert_eq!(SiweMessage::parse(&raw), Err(ParseError::MissingField("Issued At")));
    }

    #[test]
    fn test_rejects_invalid_field_values() {
        let raw = MINIMAL.replace("Version: 1", "Version: 2");
        assert!(matches!(SiweMessage::parse(&raw), Err(ParseError::InvalidField { field: "Version", .. })));

        let raw = MINIMAL.replace("Chain ID: 1", "Chain ID: one");
        assert!(matches!(SiweMessage::parse(&raw), Err(ParseError::InvalidField { field: "Chain ID", .. })));

        let raw = MINIMAL.replace("Nonce: abc12345", "Nonce: abc");
        assert!(matches!(SiweMessage::parse(&raw), Err(ParseError::InvalidField { field: "Nonce", .. })));

        let raw = MINIMAL.replace("Nonce: abc12345", "Nonce: abc-12345");
        assert!(matches!(SiweMessage::parse(&raw), Err(ParseError::InvalidField { field: "Nonce", .. })));
    }

    #[test]
    fn test_rejects_invalid_timestamps() {
        let raw = MINIMAL.replace("2024-01-01T00:00:00Z", "yesterday");
        assert!(matches!(
            SiweMessage::parse(&raw),
            Err(ParseError::InvalidTimestamp { field: "Issued At", .. })
        ));

        let raw = format!("{MINIMAL}\nExpiration Time: 2024-13-01T00:00:00Z");
        assert!(matches!(
            SiweMessage::parse(&raw),
            Err(ParseError::InvalidTimestamp { field: "Expiration Time", .. })
        ));
    }

    #[test]
    fn test_rejects_out_of_order_and_unknown_lines() {
        let raw = format!("{MINIMAL}\nNot Before: 2024-01-01T00:00:00Z\nExpiration Time: 2024-01-02T00:00:00Z");
        assert!(matches!(SiweMessage::parse(&raw), Err(ParseError::UnexpectedLine { .. })));

        let raw = format!("{MINIMAL}\nFavourite Colour: blue");
        assert!(matches!(SiweMessage::parse(&raw), Err(ParseError::UnexpectedLine { .. })));

        let raw = format!("{MINIMAL}\nNonce: abc12345");
        assert!(matches!(SiweMessage::parse(&raw), Err(ParseError::UnexpectedLine { .. })));
    }

    #[test]
    fn test_every_prefix_is_error_or_complete_claim() {
        let issued_at = "Issued At: 2021-09-30T16:25:24Z";
        let required_end = FULL.find(issued_at).unwrap() + issued_at.len();

        for (cut, _) in FULL.char_indices().chain([(FULL.len(), ' ')]) {
            let prefix = &FULL[..cut];
            let Ok(msg) = SiweMessage::parse(prefix) else {
                continue;
            };

            assert!(cut >= required_end, "accepted a claim cut before Issued At: {prefix:?}");
            assert_eq!(msg.address.to_string(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
            assert_eq!(msg.nonce, "32891756abc");
            assert_eq!(msg.chain_id, 10143);
            assert_eq!(SiweMessage::parse(&msg.to_string()).unwrap(), msg);
        }
    }

    #[test]
    fn test_parse_never_panics_on_garbage() {
        for raw in ["", "\n\n\n", "wants you to sign in", "\u{0}\u{1}\u{2}", "x wants you to sign in with your Ethereum account:"] {
            assert!(SiweMessage::parse(raw).is_err());
        }
    }
}
