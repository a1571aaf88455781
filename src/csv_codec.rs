use crate::models::{ClientRecord, ClientStatus};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

pub const CSV_HEADER: &str =
    "CONTA;NOME_CLIENTE;STATUS;CAMERAS_OK;TOTAL_CAMERAS;COBRANCA_OS;ULTIMA_ATUALIZACAO;OBSERVACOES";

const DISPLAY_TIME_FORMAT: &str = "%d/%m/%Y, %H:%M:%S";

const LOCAL_TIME_FORMATS: [&str; 7] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    DISPLAY_TIME_FORMAT,
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

// A value is either a quoted run or a run of non-delimiter characters.
static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"("[^"]*"|[^;]+)"#).expect("valid csv token regex"));

pub fn export_file_name(prefix: &str, date: NaiveDate) -> String {
    format!("{}_{}.csv", prefix, date.format("%Y-%m-%d"))
}

/// Encodes records with timestamps rendered in the machine's local time.
pub fn encode_records<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = &'a ClientRecord>,
{
    encode_records_with_zone(records, &Local)
}

pub fn encode_records_with_zone<'a, I, Tz>(records: I, zone: &Tz) -> String
where
    I: IntoIterator<Item = &'a ClientRecord>,
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut output = String::from(CSV_HEADER);
    output.push('\n');
    for record in records {
        output.push_str(&encode_line(record, zone));
        output.push('\n');
    }
    output
}

fn encode_line<Tz>(record: &ClientRecord, zone: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    [
        format!("\"{}\"", record.account_id),
        format!("\"{}\"", record.client_name),
        record.status.as_str().to_string(),
        record.cameras_ok.to_string(),
        record.total_cameras.to_string(),
        billing_label(record.billing).to_string(),
        record
            .last_updated
            .with_timezone(zone)
            .format(DISPLAY_TIME_FORMAT)
            .to_string(),
        format!("\"{}\"", sanitize_notes(&record.notes)),
    ]
    .join(";")
}

fn billing_label(billing: bool) -> &'static str {
    if billing {
        "SIM"
    } else {
        "NÃO"
    }
}

/// Newlines become spaces and semicolons become commas; there is no quote escaping.
pub fn sanitize_notes(notes: &str) -> String {
    notes
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .replace(';', ",")
        .trim()
        .to_string()
}

/// Best-effort decode: malformed lines are dropped, never fatal.
pub fn decode_records(text: &str, now: DateTime<Utc>) -> Vec<ClientRecord> {
    decode_records_with_zone(text, now, &Local)
}

pub fn decode_records_with_zone<Tz: TimeZone>(
    text: &str,
    now: DateTime<Utc>,
    zone: &Tz,
) -> Vec<ClientRecord> {
    let mut lines = text.trim_start_matches('\u{feff}').trim().lines();
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let columns = ColumnMap::from_header(header);

    lines
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .filter_map(|(index, line)| {
            let record = decode_line(line, &columns, now, zone);
            if record.is_none() {
                tracing::debug!(line = index + 2, "dropping malformed csv line");
            }
            record
        })
        .collect()
}

#[derive(Debug, Default)]
struct ColumnMap {
    account_id: Option<usize>,
    client_name: Option<usize>,
    status: Option<usize>,
    cameras_ok: Option<usize>,
    total_cameras: Option<usize>,
    billing: Option<usize>,
    last_updated: Option<usize>,
    notes: Option<usize>,
}

impl ColumnMap {
    fn from_header(line: &str) -> Self {
        let headers: Vec<String> = line
            .split(';')
            .map(|header| header.replace('"', "").trim().to_uppercase())
            .collect();
        let position = |name: &str| headers.iter().position(|header| header == name);

        Self {
            account_id: position("CONTA"),
            client_name: position("NOME_CLIENTE"),
            status: position("STATUS"),
            cameras_ok: position("CAMERAS_OK"),
            total_cameras: position("TOTAL_CAMERAS"),
            billing: position("COBRANCA_OS"),
            last_updated: position("ULTIMA_ATUALIZACAO"),
            notes: position("OBSERVACOES"),
        }
    }
}

fn decode_line<Tz: TimeZone>(
    line: &str,
    columns: &ColumnMap,
    now: DateTime<Utc>,
    zone: &Tz,
) -> Option<ClientRecord> {
    let values: Vec<String> = TOKEN_RE
        .find_iter(line)
        .map(|token| token.as_str().replace('"', "").trim().to_string())
        .collect();
    if values.len() < 3 {
        return None;
    }

    let field = |column: Option<usize>| {
        column
            .and_then(|index| values.get(index))
            .map(String::as_str)
            .unwrap_or("")
    };

    let account_id = field(columns.account_id);
    let client_name = field(columns.client_name);
    if account_id.is_empty() || client_name.is_empty() {
        return None;
    }

    let status = ClientStatus::from_label(field(columns.status)).unwrap_or(ClientStatus::NoImage);

    Some(ClientRecord {
        account_id: account_id.to_string(),
        client_name: client_name.to_string(),
        total_cameras: parse_leading_count(field(columns.total_cameras))
            .filter(|total| *total > 0)
            .unwrap_or(1),
        cameras_ok: parse_leading_count(field(columns.cameras_ok)).unwrap_or(0),
        status,
        billing: field(columns.billing).eq_ignore_ascii_case("SIM"),
        notes: field(columns.notes).to_string(),
        last_updated: parse_timestamp(field(columns.last_updated), zone).unwrap_or(now),
        needs_follow_up: status.requires_follow_up(),
    })
}

fn parse_leading_count(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn parse_timestamp<Tz: TimeZone>(raw: &str, zone: &Tz) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in LOCAL_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return zone
                .from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%d/%m/%Y") {
        return date
            .and_hms_opt(0, 0, 0)
            .and_then(|naive| zone.from_local_datetime(&naive).earliest())
            .map(|local| local.with_timezone(&Utc));
    }
    None
}
