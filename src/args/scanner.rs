use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use regex::Regex;

use super::{ArgDef, ArgValue, FailureReason, Scanner, TimePoint, ValueTable};
use crate::permissions::{Subject, SubjectKind};
use crate::platform::ChannelInfo;

static DISTANCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([+-])?((?:\d+[smhdw])+)$").expect("valid regex"));
static DISTANCE_PART: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)([smhdw])").expect("valid regex"));
static CHANNEL_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<#([A-Za-z0-9]+)(?:\|[^>]*)?>$").expect("valid regex"));
static USER_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<@!?([A-Za-z0-9]+)(?:\|[^>]*)?>$").expect("valid regex"));
static ROLE_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<@&([0-9]+)>$").expect("valid regex"));
static SLACK_GROUP_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^<!subteam\^([A-Za-z0-9]+)(?:\|[^>]*)?>$").expect("valid regex")
});

/// What scanners may look at besides the tokens themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanContext<'a> {
    /// Channel snapshot of the organization the message came from.
    pub channels: &'a [ChannelInfo],
}

/// A value together with how many leading tokens produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Scanned {
    pub value: ArgValue,
    pub consumed: usize,
}

/// Scan one argument value from the front of `tokens`.
pub fn scan(
    tokens: &[&str],
    def: &ArgDef,
    ctx: &ScanContext<'_>,
) -> Result<Scanned, FailureReason> {
    match def.scanner {
        Scanner::Simple(table) => {
            let token = tokens.first().ok_or(FailureReason::NoInput)?;
            Ok(Scanned {
                value: resolve_item(token, table)?,
                consumed: 1,
            })
        }
        Scanner::Array(table) => {
            let (items, consumed, _) = scan_delimited(tokens, |piece| resolve_item(piece, table));
            Ok(Scanned {
                value: ArgValue::List(items),
                consumed,
            })
        }
        Scanner::TimeDistance => scan_time(tokens),
        Scanner::ChannelRef => {
            let (channels, consumed, failure) =
                scan_delimited(tokens, |piece| resolve_channel(piece, ctx));
            if channels.is_empty() {
                return Err(failure.unwrap_or(FailureReason::NoInput));
            }
            Ok(Scanned {
                value: ArgValue::Channels(channels),
                consumed,
            })
        }
        Scanner::Subject => {
            let token = tokens.first().ok_or(FailureReason::NoInput)?;
            Ok(Scanned {
                value: ArgValue::Subject(parse_subject(token)?),
                consumed: 1,
            })
        }
        Scanner::Rest => {
            if tokens.is_empty() {
                return Err(FailureReason::NoInput);
            }
            Ok(Scanned {
                value: ArgValue::Text(tokens.join(" ")),
                consumed: tokens.len(),
            })
        }
    }
}

fn resolve_item(token: &str, table: Option<ValueTable>) -> Result<ArgValue, FailureReason> {
    let Some(table) = table else {
        return Ok(ArgValue::Text(token.to_string()));
    };
    let lower = token.to_lowercase();
    table
        .iter()
        .find(|(keyword, _)| keyword.to_lowercase() == lower)
        .map(|(_, value)| value.to_value())
        .ok_or_else(|| FailureReason::NotInTable(token.to_string()))
}

/// Consume a comma-separated run that may be spread over several tokens
/// (`a,b`, `a, b`, `a ,b`). Stops before the first token that cannot
/// extend the list; a token with an unparseable item is not consumed.
fn scan_delimited<T>(
    tokens: &[&str],
    mut item: impl FnMut(&str) -> Result<T, FailureReason>,
) -> (Vec<T>, usize, Option<FailureReason>) {
    let mut items = Vec::new();
    let mut consumed = 0;
    let mut expecting = true;

    for token in tokens {
        if !expecting && !token.starts_with(',') {
            break;
        }
        let mut parsed = Vec::new();
        let mut token_expecting = expecting;
        for (k, piece) in token.split(',').enumerate() {
            if k > 0 {
                token_expecting = true;
            }
            if piece.is_empty() {
                continue;
            }
            match item(piece) {
                Ok(value) => {
                    parsed.push(value);
                    token_expecting = false;
                }
                Err(reason) => return (items, consumed, Some(reason)),
            }
        }
        items.extend(parsed);
        consumed += 1;
        expecting = token_expecting;
    }

    (items, consumed, None)
}

fn scan_time(tokens: &[&str]) -> Result<Scanned, FailureReason> {
    let first = *tokens.first().ok_or(FailureReason::NoInput)?;

    if let Some(delta) = parse_distance(first) {
        return Ok(Scanned {
            value: ArgValue::Time(TimePoint::Relative(delta)),
            consumed: 1,
        });
    }

    let absolute = |at: DateTime<Utc>, consumed| Scanned {
        value: ArgValue::Time(TimePoint::Absolute(at)),
        consumed,
    };

    if let Ok(at) = DateTime::parse_from_rfc3339(first) {
        return Ok(absolute(at.with_timezone(&Utc), 1));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(first, format) {
            return Ok(absolute(Utc.from_utc_datetime(&naive), 1));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(first, "%Y-%m-%d") {
        // "2026-01-02 10:00" arrives as two tokens
        if let Some(time) = tokens.get(1).and_then(|t| parse_clock(t)) {
            return Ok(absolute(Utc.from_utc_datetime(&date.and_time(time)), 2));
        }
        return Ok(absolute(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)), 1));
    }

    Err(FailureReason::BadTime(first.to_string()))
}

fn parse_clock(token: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(token, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(token, "%H:%M"))
        .ok()
}

/// `10m`, `1h30m`, `-2d`, `+1w`. Overflow is treated as unparseable.
fn parse_distance(token: &str) -> Option<TimeDelta> {
    let caps = DISTANCE.captures(token)?;
    let negative = caps.get(1).is_some_and(|m| m.as_str() == "-");

    let mut seconds: i64 = 0;
    for part in DISTANCE_PART.captures_iter(&caps[2]) {
        let amount: i64 = part[1].parse().ok()?;
        let unit = match part[2].to_ascii_lowercase().as_str() {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            _ => 604_800,
        };
        seconds = seconds.checked_add(amount.checked_mul(unit)?)?;
    }
    if negative {
        seconds = -seconds;
    }
    TimeDelta::try_seconds(seconds)
}

fn resolve_channel(piece: &str, ctx: &ScanContext<'_>) -> Result<ChannelInfo, FailureReason> {
    let found = if let Some(caps) = CHANNEL_MENTION.captures(piece) {
        ctx.channels.iter().find(|c| c.id == caps[1])
    } else if let Some(name) = piece.strip_prefix('#') {
        let name = name.to_lowercase();
        ctx.channels.iter().find(|c| c.name.to_lowercase() == name)
    } else {
        ctx.channels.iter().find(|c| c.id == piece)
    };
    found
        .cloned()
        .ok_or_else(|| FailureReason::UnknownChannel(piece.to_string()))
}

fn parse_subject(token: &str) -> Result<Subject, FailureReason> {
    let subject = |kind, id: &str| Ok(Subject::new(kind, id));

    if let Some(caps) = ROLE_MENTION.captures(token) {
        return subject(SubjectKind::Role, &caps[1]);
    }
    if let Some(caps) = SLACK_GROUP_MENTION.captures(token) {
        return subject(SubjectKind::Role, &caps[1]);
    }
    if let Some(caps) = USER_MENTION.captures(token) {
        return subject(SubjectKind::User, &caps[1]);
    }
    if let Some(caps) = CHANNEL_MENTION.captures(token) {
        return subject(SubjectKind::Channel, &caps[1]);
    }
    if let Some((kind, id)) = token.split_once(':') {
        if let (Some(kind), false) = (SubjectKind::parse(&kind.to_lowercase()), id.is_empty()) {
            return subject(kind, id);
        }
    }
    Err(FailureReason::UnknownSubject(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::TableValue;

    const SILENT: ValueTable = &[
        ("silent", TableValue::Bool(true)),
        ("s", TableValue::Bool(true)),
    ];

    fn channels() -> Vec<ChannelInfo> {
        vec![
            ChannelInfo {
                id: "100".to_string(),
                name: "general".to_string(),
                is_text: true,
            },
            ChannelInfo {
                id: "200".to_string(),
                name: "Voice".to_string(),
                is_text: false,
            },
        ]
    }

    fn def(scanner: Scanner) -> ArgDef {
        ArgDef::new("arg", scanner)
    }

    fn scan_with(scanner: Scanner, tokens: &[&str]) -> Result<Scanned, FailureReason> {
        let channels = channels();
        let ctx = ScanContext {
            channels: &channels,
        };
        scan(tokens, &def(scanner), &ctx)
    }

    #[test]
    fn test_simple_takes_one_token_verbatim() {
        let scanned = scan_with(Scanner::Simple(None), &["hello", "world"]).unwrap();
        assert_eq!(scanned.value, ArgValue::Text("hello".to_string()));
        assert_eq!(scanned.consumed, 1);
    }

    #[test]
    fn test_simple_table_is_case_insensitive() {
        let scanned = scan_with(Scanner::Simple(Some(SILENT)), &["SILENT"]).unwrap();
        assert_eq!(scanned.value, ArgValue::Bool(true));

        let err = scan_with(Scanner::Simple(Some(SILENT)), &["loud"]).unwrap_err();
        assert_eq!(err, FailureReason::NotInTable("loud".to_string()));
    }

    #[test]
    fn test_simple_without_tokens_fails() {
        let err = scan_with(Scanner::Simple(None), &[]).unwrap_err();
        assert_eq!(err, FailureReason::NoInput);
    }

    #[test]
    fn test_array_empty_input_is_empty_list() {
        let scanned = scan_with(Scanner::Array(None), &[]).unwrap();
        assert_eq!(scanned.value, ArgValue::List(vec![]));
        assert_eq!(scanned.consumed, 0);
    }

    #[test]
    fn test_array_spans_delimited_tokens() {
        let text = |s: &str| ArgValue::Text(s.to_string());
        let scanned = scan_with(Scanner::Array(None), &["a,", "b", ",c", "d"]).unwrap();
        assert_eq!(scanned.value, ArgValue::List(vec![text("a"), text("b"), text("c")]));
        assert_eq!(scanned.consumed, 3);

        let scanned = scan_with(Scanner::Array(None), &["a,b", "c"]).unwrap();
        assert_eq!(scanned.value, ArgValue::List(vec![text("a"), text("b")]));
        assert_eq!(scanned.consumed, 1);
    }

    #[test]
    fn test_array_stops_at_first_unresolvable_token() {
        let scanned = scan_with(Scanner::Array(Some(SILENT)), &["s,", "nope"]).unwrap();
        assert_eq!(scanned.value, ArgValue::List(vec![ArgValue::Bool(true)]));
        assert_eq!(scanned.consumed, 1);

        let scanned = scan_with(Scanner::Array(Some(SILENT)), &["nope"]).unwrap();
        assert_eq!(scanned.value, ArgValue::List(vec![]));
        assert_eq!(scanned.consumed, 0);
    }

    #[test]
    fn test_time_relative_distances() {
        let cases = [
            ("10m", 600),
            ("1h30m", 5_400),
            ("-2d", -172_800),
            ("+1w", 604_800),
            ("45S", 45),
            ("0m", 0),
        ];
        for (token, seconds) in cases {
            let scanned = scan_with(Scanner::TimeDistance, &[token]).unwrap();
            assert_eq!(
                scanned.value,
                ArgValue::Time(TimePoint::Relative(TimeDelta::seconds(seconds))),
                "token {token}"
            );
            assert_eq!(scanned.consumed, 1);
        }
    }

    #[test]
    fn test_time_absolute_forms() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 2, 10, 0, 0).unwrap();

        let scanned = scan_with(Scanner::TimeDistance, &["2026-01-02", "10:00", "x"]).unwrap();
        assert_eq!(scanned.value, ArgValue::Time(TimePoint::Absolute(expected)));
        assert_eq!(scanned.consumed, 2);

        let scanned = scan_with(Scanner::TimeDistance, &["2026-01-02T10:00"]).unwrap();
        assert_eq!(scanned.value, ArgValue::Time(TimePoint::Absolute(expected)));

        let scanned = scan_with(Scanner::TimeDistance, &["2026-01-02T10:00:00Z"]).unwrap();
        assert_eq!(scanned.value, ArgValue::Time(TimePoint::Absolute(expected)));

        let midnight = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let scanned = scan_with(Scanner::TimeDistance, &["2026-01-02", "later"]).unwrap();
        assert_eq!(scanned.value, ArgValue::Time(TimePoint::Absolute(midnight)));
        assert_eq!(scanned.consumed, 1);
    }

    #[test]
    fn test_time_rejects_garbage() {
        let err = scan_with(Scanner::TimeDistance, &["soon"]).unwrap_err();
        assert_eq!(err, FailureReason::BadTime("soon".to_string()));

        let err = scan_with(Scanner::TimeDistance, &["99999999999999999999w"]).unwrap_err();
        assert!(matches!(err, FailureReason::BadTime(_)));
    }

    #[test]
    fn test_channel_reference_forms() {
        for token in ["<#100>", "<#100|general>", "#General", "100"] {
            let scanned = scan_with(Scanner::ChannelRef, &[token]).unwrap();
            match scanned.value {
                ArgValue::Channels(found) => assert_eq!(found[0].id, "100", "token {token}"),
                other => panic!("unexpected value {other:?}"),
            }
        }

        let scanned = scan_with(Scanner::ChannelRef, &["<#100>,", "#voice"]).unwrap();
        match scanned.value {
            ArgValue::Channels(found) => assert_eq!(found.len(), 2),
            other => panic!("unexpected value {other:?}"),
        }
        assert_eq!(scanned.consumed, 2);
    }

    #[test]
    fn test_channel_reference_must_resolve() {
        let err = scan_with(Scanner::ChannelRef, &["<#999>"]).unwrap_err();
        assert_eq!(err, FailureReason::UnknownChannel("<#999>".to_string()));
    }

    #[test]
    fn test_subject_forms() {
        let cases = [
            ("<@42>", SubjectKind::User, "42"),
            ("<@!42>", SubjectKind::User, "42"),
            ("<@U123|bob>", SubjectKind::User, "U123"),
            ("<@&7>", SubjectKind::Role, "7"),
            ("<!subteam^S9|devs>", SubjectKind::Role, "S9"),
            ("<#100>", SubjectKind::Channel, "100"),
            ("role:55", SubjectKind::Role, "55"),
            ("USER:U1", SubjectKind::User, "U1"),
        ];
        for (token, kind, id) in cases {
            let scanned = scan_with(Scanner::Subject, &[token]).unwrap();
            assert_eq!(
                scanned.value,
                ArgValue::Subject(Subject::new(kind, id)),
                "token {token}"
            );
        }

        let err = scan_with(Scanner::Subject, &["bob"]).unwrap_err();
        assert_eq!(err, FailureReason::UnknownSubject("bob".to_string()));
        assert!(scan_with(Scanner::Subject, &["user:"]).is_err());
    }

    #[test]
    fn test_rest_takes_every_token() {
        let scanned = scan_with(Scanner::Rest, &["Deleted", "{0}", "messages"]).unwrap();
        assert_eq!(scanned.value, ArgValue::Text("Deleted {0} messages".to_string()));
        assert_eq!(scanned.consumed, 3);
        assert_eq!(scan_with(Scanner::Rest, &[]).unwrap_err(), FailureReason::NoInput);
    }

    #[test]
    fn test_scanning_is_idempotent() {
        let inputs: [(Scanner, &[&str]); 4] = [
            (Scanner::Array(None), &["a,", "b", "c"]),
            (Scanner::TimeDistance, &["2026-01-02", "10:00"]),
            (Scanner::ChannelRef, &["#general,<#200>"]),
            (Scanner::Simple(Some(SILENT)), &["s"]),
        ];
        for (scanner, tokens) in inputs {
            let first = scan_with(scanner, tokens);
            let second = scan_with(scanner, tokens);
            assert_eq!(first, second);
        }
    }
}
