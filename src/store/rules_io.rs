//! CSV interchange for rule sets.
//!
//! Two layouts share one file format: a header row, data rows, and a trailer
//! row telling spreadsheet editors where to stop. The layout is recognised by
//! field count: 17 (or legacy 16, without uid) for forwarding rules, 7 for
//! bleep rules.

use std::collections::HashSet;
use std::fmt;

use tracing::{info, warn};

use crate::error::ImportError;
use crate::pipeline::rules::{BleepRule, DEFAULT_FORMAT, Rule, TRASH_BIN_TITLE};
use crate::store::traits::RuleStore;

/// Last row of every export. Ignored on import.
pub const TRAILER: &str = "Insert filter definitions before this row";

pub const RULE_HEADER: [&str; 17] = [
    "recip_name",
    "recip_id",
    "donor_name",
    "donor_id",
    "sender_fname",
    "sender_lname",
    "sender_uname",
    "sender_id",
    "filter",
    "black_list",
    "and_list",
    "or_list",
    "format",
    "title",
    "status",
    "user_id",
    "uid",
];

pub const BLEEP_HEADER: [&str; 7] = [
    "donor_name",
    "donor_id",
    "black_list",
    "status",
    "bleep_symbol",
    "bleep_action",
    "action_format",
];

/// Rule rows written before uids were exported.
const LEGACY_RULE_FIELDS: usize = 16;

/// File names used when exporting.
pub const RULES_FILE_NAME: &str = "rules.csv";
pub const BLEEPS_FILE_NAME: &str = "bleeps.csv";

/// Which rule set a CSV file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvKind {
    Rules,
    Bleeps,
}

impl CsvKind {
    fn from_fields(fields: usize) -> Result<Self, ImportError> {
        match fields {
            n if n == RULE_HEADER.len() || n == LEGACY_RULE_FIELDS => Ok(Self::Rules),
            n if n == BLEEP_HEADER.len() => Ok(Self::Bleeps),
            columns => Err(ImportError::UnknownLayout { columns }),
        }
    }
}

impl fmt::Display for CsvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rules => write!(f, "rules"),
            Self::Bleeps => write!(f, "bleep rules"),
        }
    }
}

/// Parsed contents of an import file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCsv {
    Rules(Vec<Rule>),
    Bleeps(Vec<BleepRule>),
}

/// A parsed file plus the rows that were rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub parsed: ParsedCsv,
    /// One message per rejected row.
    pub skipped: Vec<String>,
}

/// What an import did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub kind: CsvKind,
    pub imported: usize,
    pub skipped: Vec<String>,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} stored in database, {} rows skipped",
            self.imported,
            self.kind,
            self.skipped.len()
        )?;
        for reason in &self.skipped {
            write!(f, "\n- {reason}")?;
        }
        Ok(())
    }
}

// ── Export ──────────────────────────────────────────────────────────

/// Serialize forwarding rules. A disabled trash-bin row owned by `owner_id`
/// is appended when the set has none.
pub fn export_rules(rules: &[Rule], owner_id: i64) -> Result<Vec<u8>, ImportError> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    writer.write_record(RULE_HEADER)?;

    for rule in rules {
        writer.write_record(rule_record(rule))?;
    }
    if !rules.iter().any(Rule::is_trash_bin) {
        let trash = Rule {
            title: TRASH_BIN_TITLE.into(),
            user_id: owner_id,
            ..Default::default()
        };
        writer.write_record(rule_record(&trash))?;
    }
    writer.write_record([TRAILER])?;

    finish(writer)
}

/// Serialize bleep rules.
pub fn export_bleep_rules(rules: &[BleepRule]) -> Result<Vec<u8>, ImportError> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    writer.write_record(BLEEP_HEADER)?;

    for rule in rules {
        writer.write_record([
            rule.donor_name.clone(),
            rule.donor_id.to_string(),
            rule.black_list.clone(),
            rule.status.clone(),
            rule.bleep_symbol.clone(),
            rule.bleep_action.clone(),
            rule.action_format.clone(),
        ])?;
    }
    writer.write_record([TRAILER])?;

    finish(writer)
}

fn rule_record(rule: &Rule) -> [String; 17] {
    [
        rule.recip_name.clone(),
        rule.recip_id.to_string(),
        rule.donor_name.clone(),
        rule.donor_id.to_string(),
        rule.sender_fname.clone(),
        rule.sender_lname.clone(),
        rule.sender_uname.clone(),
        rule.sender_id.to_string(),
        rule.filter.clone(),
        rule.black_list.clone(),
        rule.and_list.clone(),
        rule.or_list.clone(),
        rule.format.clone(),
        rule.title.clone(),
        rule.status.clone(),
        rule.user_id.to_string(),
        rule.uid.to_string(),
    ]
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, ImportError> {
    writer
        .into_inner()
        .map_err(|e| ImportError::Csv(csv::Error::from(e.into_error())))
}

// ── Import ──────────────────────────────────────────────────────────

/// Parse an import file without touching storage.
pub fn parse_csv(bytes: &[u8]) -> Result<ParseOutcome, ImportError> {
    let text = String::from_utf8(bytes.to_vec())?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for record in reader.records() {
        records.push(record?);
    }

    let Some((header, data)) = records.split_first() else {
        return Err(ImportError::Empty);
    };

    let data: Vec<&csv::StringRecord> = data.iter().filter(|r| !is_filler(r)).collect();
    let fields = data.first().map_or(header.len(), |r| r.len());
    let kind = CsvKind::from_fields(fields)?;

    let mut skipped = Vec::new();
    let parsed = match kind {
        CsvKind::Rules => {
            let mut rules = Vec::new();
            let mut seen_uids = HashSet::new();
            for record in &data {
                match parse_rule_row(record) {
                    Ok(mut rule) => {
                        if rule.uid != 0 && !seen_uids.insert(rule.uid) {
                            rule.uid = 0;
                        }
                        rules.push(rule);
                    }
                    Err(reason) => skipped.push(format!("line {}: {reason}", line_of(record))),
                }
            }
            ParsedCsv::Rules(rules)
        }
        CsvKind::Bleeps => {
            let mut rules = Vec::new();
            for record in &data {
                match parse_bleep_row(record) {
                    Ok(rule) => rules.push(rule),
                    Err(reason) => skipped.push(format!("line {}: {reason}", line_of(record))),
                }
            }
            ParsedCsv::Bleeps(rules)
        }
    };

    Ok(ParseOutcome { parsed, skipped })
}

/// Parse an import file and replace the matching rule set in the store.
pub async fn import_csv(store: &dyn RuleStore, bytes: &[u8]) -> Result<ImportSummary, ImportError> {
    let ParseOutcome { parsed, skipped } = parse_csv(bytes)?;

    for reason in &skipped {
        warn!(reason = %reason, "Skipped CSV row");
    }

    let (kind, imported) = match parsed {
        ParsedCsv::Rules(rules) => (CsvKind::Rules, store.replace_rules(&rules).await?),
        ParsedCsv::Bleeps(rules) => (CsvKind::Bleeps, store.replace_bleep_rules(&rules).await?),
    };

    info!(%kind, imported, skipped = skipped.len(), "CSV import finished");
    Ok(ImportSummary {
        kind,
        imported,
        skipped,
    })
}

/// 1-based file line a record starts on.
fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map_or(0, |p| p.line())
}

/// Trailer and blank rows.
fn is_filler(record: &csv::StringRecord) -> bool {
    record.iter().all(|f| f.trim().is_empty())
        || record.get(0).is_some_and(|f| f.trim() == TRAILER)
}

/// Parse a chat id. Ids starting with `100` are channel ids written without
/// their sign. `None` for an empty field.
fn parse_chat_id(raw: &str) -> Result<Option<i64>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let signed = if raw.starts_with("100") {
        format!("-{raw}")
    } else {
        raw.to_string()
    };
    signed
        .parse()
        .map(Some)
        .map_err(|_| format!("invalid id '{raw}'"))
}

/// Digits-only numbers; anything else reads as 0.
fn parse_unsigned(raw: &str) -> i64 {
    let raw = raw.trim();
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        raw.parse().unwrap_or(0)
    } else {
        0
    }
}

fn field(record: &csv::StringRecord, index: usize) -> String {
    record.get(index).unwrap_or_default().to_string()
}

fn parse_rule_row(record: &csv::StringRecord) -> Result<Rule, String> {
    if record.len() != RULE_HEADER.len() && record.len() != LEGACY_RULE_FIELDS {
        return Err(format!(
            "expected {} fields, got {}",
            RULE_HEADER.len(),
            record.len()
        ));
    }

    let title = field(record, 13);
    let is_trash_bin = title == TRASH_BIN_TITLE;
    let recip_id = parse_chat_id(&field(record, 1))?;
    let donor_id = parse_chat_id(&field(record, 3))?;

    let (recip_id, donor_id) = if is_trash_bin {
        (recip_id.unwrap_or(0), donor_id.unwrap_or(0))
    } else {
        let (Some(recip), Some(donor)) = (recip_id, donor_id) else {
            return Err(format!(
                "recipient id '{}' or donor id '{}' cannot be empty",
                field(record, 1),
                field(record, 3)
            ));
        };
        if recip == donor {
            return Err(format!(
                "recipient and donor are the same chat ({recip})"
            ));
        }
        (recip, donor)
    };

    let format = match field(record, 12) {
        f if f.trim().is_empty() => DEFAULT_FORMAT.to_string(),
        f => f,
    };

    Ok(Rule {
        uid: record.get(16).map_or(0, parse_unsigned),
        recip_name: field(record, 0),
        recip_id,
        donor_name: field(record, 2),
        donor_id,
        sender_fname: field(record, 4),
        sender_lname: field(record, 5),
        sender_uname: field(record, 6),
        sender_id: parse_unsigned(&field(record, 7)),
        filter: field(record, 8),
        black_list: field(record, 9),
        and_list: field(record, 10),
        or_list: field(record, 11),
        format,
        title,
        status: field(record, 14),
        user_id: parse_unsigned(&field(record, 15)),
    })
}

fn parse_bleep_row(record: &csv::StringRecord) -> Result<BleepRule, String> {
    if record.len() != BLEEP_HEADER.len() {
        return Err(format!(
            "expected {} fields, got {}",
            BLEEP_HEADER.len(),
            record.len()
        ));
    }

    let donor_id = parse_chat_id(&field(record, 1))?
        .ok_or_else(|| "donor id cannot be empty".to_string())?;

    Ok(BleepRule {
        uid: 0,
        donor_name: field(record, 0),
        donor_id,
        black_list: field(record, 2),
        status: field(record, 3),
        bleep_symbol: field(record, 4),
        bleep_action: field(record, 5),
        action_format: field(record, 6),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    fn rule(uid: i64, donor_id: i64, recip_id: i64) -> Rule {
        Rule {
            uid,
            recip_name: "Digest, daily".into(),
            recip_id,
            donor_name: "News \"Live\"".into(),
            donor_id,
            sender_uname: "@alice".into(),
            sender_id: 42,
            filter: "list & !tree | *patt*".into(),
            black_list: "spam|scam".into(),
            and_list: "a+b".into(),
            or_list: "x|y".into(),
            format: "tdm".into(),
            title: "Headlines".into(),
            status: "active".into(),
            user_id: 7,
            ..Default::default()
        }
    }

    fn parse_rules(bytes: &[u8]) -> (Vec<Rule>, Vec<String>) {
        let outcome = parse_csv(bytes).unwrap();
        match outcome.parsed {
            ParsedCsv::Rules(rules) => (rules, outcome.skipped),
            other => panic!("expected rules, got {other:?}"),
        }
    }

    #[test]
    fn export_then_parse_reproduces_rules() {
        let rules = vec![rule(1, -1001, -1002), rule(2, -1003, -1004)];
        let bytes = export_rules(&rules, 7).unwrap();
        let (parsed, skipped) = parse_rules(&bytes);

        assert!(skipped.is_empty());
        let active: Vec<Rule> = parsed.into_iter().filter(Rule::is_active).collect();
        assert_eq!(active, rules);
    }

    #[test]
    fn export_appends_disabled_trash_bin_and_trailer() {
        let bytes = export_rules(&[rule(1, -1001, -1002)], 99).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.trim_end().ends_with(TRAILER));

        let (parsed, _) = parse_rules(&bytes);
        let trash = parsed.iter().find(|r| r.is_trash_bin()).unwrap();
        assert!(!trash.is_active());
        assert_eq!(trash.user_id, 99);
    }

    #[test]
    fn existing_trash_bin_is_not_duplicated() {
        let mut trash = rule(5, 0, -1009);
        trash.title = TRASH_BIN_TITLE.into();
        let bytes = export_rules(&[rule(1, -1001, -1002), trash], 0).unwrap();
        let (parsed, _) = parse_rules(&bytes);
        assert_eq!(parsed.iter().filter(|r| r.is_trash_bin()).count(), 1);
    }

    #[test]
    fn unsigned_channel_ids_are_negated() {
        let csv = "\
recip_name,recip_id,donor_name,donor_id,sender_fname,sender_lname,sender_uname,sender_id,filter,black_list,and_list,or_list,format,title,status,user_id,uid
R,1001234,D,1005678,,,,,*,,,,,,active,,
";
        let (parsed, _) = parse_rules(csv.as_bytes());
        assert_eq!(parsed[0].recip_id, -1001234);
        assert_eq!(parsed[0].donor_id, -1005678);
        assert_eq!(parsed[0].format, "m");
        assert_eq!(parsed[0].uid, 0);
    }

    #[test]
    fn invalid_rows_are_skipped_and_counted() {
        let csv = "\
header1,h2,h3,h4,h5,h6,h7,h8,h9,h10,h11,h12,h13,h14,h15,h16,h17
R,,D,-5,,,,,*,,,,m,,active,,
R,-5,D,-5,,,,,*,,,,m,,active,,
R,abc,D,-6,,,,,*,,,,m,,active,,
R,-7,D,-8,,,,,*,,,,m,,active,,
,,,,,,,,,,,,,__trash_bin__,active,,
Insert filter definitions before this row
";
        let (parsed, skipped) = parse_rules(csv.as_bytes());
        assert_eq!(parsed.len(), 2);
        assert_eq!(skipped.len(), 3);
        assert!(skipped[0].contains("cannot be empty"));
        assert!(skipped[1].contains("same chat"));
        assert!(skipped[2].contains("invalid id"));
        assert!(parsed[1].is_trash_bin());
    }

    #[test]
    fn skip_messages_name_file_lines() {
        let csv = "\
recip_name,recip_id,donor_name,donor_id,sender_fname,sender_lname,sender_uname,sender_id,filter,black_list,and_list,or_list,format,title,status,user_id,uid
R,-7,D,-8,,,,,\"first
second\",,,,m,,active,,
R,-5,D,-5,,,,,*,,,,m,,active,,
";
        let (parsed, skipped) = parse_rules(csv.as_bytes());
        assert_eq!(parsed.len(), 1);
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].starts_with("line 4: "), "{}", skipped[0]);
    }

    #[test]
    fn legacy_rows_without_uid() {
        let csv = "\
recip_name,recip_id,donor_name,donor_id,sender_fname,sender_sname,sender_uname,sender_id,filter,black_list,and_list,or_list,format,title,status,user_id
R,-7,D,-8,,,,x,*,,,,T,,active,12
";
        let (parsed, skipped) = parse_rules(csv.as_bytes());
        assert!(skipped.is_empty());
        assert_eq!(parsed[0].sender_id, 0);
        assert_eq!(parsed[0].user_id, 12);
        assert_eq!(parsed[0].format, "T");
    }

    #[test]
    fn repeated_uids_are_reassigned() {
        let bytes = export_rules(&[rule(3, -1, -2), rule(3, -4, -5)], 0).unwrap();
        let (parsed, _) = parse_rules(&bytes);
        assert_eq!(parsed[0].uid, 3);
        assert_eq!(parsed[1].uid, 0);
    }

    #[test]
    fn bleep_layout_round_trip() {
        let rules = vec![BleepRule {
            uid: 0,
            donor_name: "Chat".into(),
            donor_id: -1001,
            black_list: "heck|darn".into(),
            status: "active".into(),
            bleep_symbol: "#".into(),
            bleep_action: "edit".into(),
            action_format: "".into(),
        }];
        let bytes = export_bleep_rules(&rules).unwrap();
        let outcome = parse_csv(&bytes).unwrap();
        assert_eq!(outcome.parsed, ParsedCsv::Bleeps(rules));
    }

    #[test]
    fn empty_bleep_export_still_parses() {
        let bytes = export_bleep_rules(&[]).unwrap();
        let outcome = parse_csv(&bytes).unwrap();
        assert_eq!(outcome.parsed, ParsedCsv::Bleeps(Vec::new()));
    }

    #[test]
    fn bleep_row_without_donor_is_skipped() {
        let csv = "donor_name,donor_id,black_list,status,bleep_symbol,bleep_action,action_format\nA,,x,active,*,,\n";
        let outcome = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(outcome.parsed, ParsedCsv::Bleeps(Vec::new()));
        assert_eq!(outcome.skipped.len(), 1);
    }

    #[test]
    fn unknown_layout_and_empty_file() {
        assert!(matches!(
            parse_csv(b"a,b,c\n1,2,3\n"),
            Err(ImportError::UnknownLayout { columns: 3 })
        ));
        assert!(matches!(parse_csv(b""), Err(ImportError::Empty)));
        assert!(matches!(
            parse_csv(&[0xff, 0xfe, 0x00]),
            Err(ImportError::Encoding(_))
        ));
    }

    #[test]
    fn byte_order_mark_is_ignored() {
        let mut bytes = "\u{feff}".as_bytes().to_vec();
        bytes.extend(export_rules(&[rule(1, -1001, -1002)], 0).unwrap());
        let (parsed, _) = parse_rules(&bytes);
        assert_eq!(parsed[0].recip_name, "Digest, daily");
    }

    #[tokio::test]
    async fn import_replaces_store_contents() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        store.replace_rules(&[rule(9, -9, -10)]).await.unwrap();

        let bytes = export_rules(&[rule(1, -1001, -1002)], 0).unwrap();
        let summary = import_csv(&store, &bytes).await.unwrap();
        assert_eq!(summary.kind, CsvKind::Rules);
        assert_eq!(summary.imported, 2);
        assert!(summary.skipped.is_empty());
        assert!(summary.to_string().starts_with("2 rules stored"));

        let loaded = store.load_active_rules().await.unwrap();
        assert_eq!(loaded, vec![rule(1, -1001, -1002)]);
    }
}
