extern crate anyhow;
extern crate chrono;
extern crate reqwest;
extern crate xml;

use crate::config;
use crate::config::Config;
use crate::payload::{CameraSlot, CameraSlots, FeedPayload, RegionMessages, TrafficMessage, TunnelSection};
use crate::result;
use crate::tunnel;

use anyhow::Context;
use std::collections::{HashMap, HashSet};

/// Hard cap on the served message list. The spec'd range is 25-80; a
/// wallboard shows at most a screenful, so the low end is plenty.
pub const MAX_MESSAGES: usize = 25;

/// How many deduplicated records to serve when the region filter
/// matches nothing. An empty board is worse than an unfiltered one.
pub const FALLBACK_COUNT: usize = 25;

const UPSTREAM_SNIPPET_LIMIT: usize = 2000;

const FALLBACK_TITLE: &str = "Trafikkmelding";

/// Sub-fields captured per situation record, by local tag name.
/// Priority between them is resolved in `message_from_record`.
const PICKED_TAGS: &[&str] = &[
    "comment",
    "severity",
    "impactOnTraffic",
    "situationRecordCreationTime",
    "versionTime",
    "roadNumber",
    "roadName",
    "directionRelative",
    "areaName",
];

const RECORD_TAG: &str = "situationRecord";

pub struct RegionFilter {
    pub name: &'static str,
    include: &'static [&'static str],
    exclude: &'static [&'static str],
}

static STAVANGER: RegionFilter = RegionFilter {
    name: "stavanger",
    include: &[
        "byfjord",
        "byfjordtunnelen",
        "rennesøy",
        "e39",
        "stavanger",
        "sokn",
        "randaberg",
        "tunnel",
        "tunnelen",
        "eiganes",
        "tasta",
        "madla",
    ],
    // Neighbouring districts on the same trunk roads; a match here
    // drops the record even when an include term also matches.
    exclude: &["haugesund", "karmøy", "tysvær", "bokn", "suldal"],
};

pub fn region_filter(name: &str) -> Option<&'static RegionFilter> {
    if name.eq_ignore_ascii_case(STAVANGER.name) {
        return Some(&STAVANGER);
    }
    return None;
}

pub enum FetchOutcome {
    Snapshot(String),
    UpstreamError { status: u16, snippet: String },
}

fn truncate_chars(s: &str, limit: usize) -> String {
    return s.chars().take(limit).collect();
}

fn snapshot_request(client: &reqwest::blocking::Client, config: &Config)
                    -> reqwest::blocking::RequestBuilder {
    let mut request = client.get(&config.datex_url)
        .header(reqwest::header::USER_AGENT, config::USER_AGENT)
        // The snapshot is time-sensitive; freshness over efficiency.
        .header(reqwest::header::CACHE_CONTROL, "no-cache");

    if let Some(subscription) = &config.datex_subscription {
        // .query() percent-encodes, so the reference may contain
        // reserved characters without corrupting the URL.
        request = request.query(&[("subscriptionReference", subscription.as_str())]);
    }

    if let Some(token) = &config.datex_bearer {
        request = request.bearer_auth(token);
    } else if let (Some(user), Some(pass)) =
        (&config.datex_user, &config.datex_pass) {
        request = request.basic_auth(user, Some(pass));
    }

    return request;
}

/// Fetches the raw DATEX snapshot. A non-2xx upstream answer is a valid
/// outcome here, not an Err: the server maps it to a 502 diagnostic.
pub fn fetch_snapshot(config: &Config) -> result::DashResult<FetchOutcome> {
    use std::io::Read;

    let client = reqwest::blocking::Client::new();
    let mut response = snapshot_request(&client, config).send()
        .with_context(|| format!("while fetching datex snapshot from {}", config.datex_url))?;
    let status = response.status();

    let mut body = String::new();
    response.read_to_string(&mut body)?;

    if !status.is_success() {
        return Ok(FetchOutcome::UpstreamError {
            status: status.as_u16(),
            snippet: truncate_chars(&body, UPSTREAM_SNIPPET_LIMIT),
        });
    }

    return Ok(FetchOutcome::Snapshot(body));
}

struct RawRecord {
    // First captured value per picked tag, local name as key.
    fields: HashMap<&'static str, String>,
}

fn picked_tag(local_name: &str) -> Option<&'static str> {
    return PICKED_TAGS.iter()
        .find(|t| t.eq_ignore_ascii_case(local_name))
        .copied();
}

fn collapse_whitespace(s: &str) -> String {
    return s.split_whitespace().collect::<Vec<&str>>().join(" ");
}

/// Walks the snapshot as an event stream and collects situation records,
/// matching elements by local name so namespace prefixes (ns12:, d2:, …)
/// and schema-version renames don't matter. A parse error mid-document
/// keeps whatever complete records were already seen; malformed input is
/// a "no data" state, never a failure.
fn extract_records(xml_text: &str) -> Vec<RawRecord> {
    use xml::reader::XmlEvent;

    let mut records: Vec<RawRecord> = vec![];
    let mut current: Option<RawRecord> = None;
    // (tag, element depth at open, accumulated text)
    let mut open_field: Option<(&'static str, usize, String)> = None;
    let mut depth: usize = 0;

    let parser = xml::reader::EventReader::new(xml_text.as_bytes());
    for event in parser {
        match event {
            Ok(XmlEvent::StartElement { ref name, .. }) => {
                if name.local_name.eq_ignore_ascii_case(RECORD_TAG) {
                    current = Some(RawRecord { fields: HashMap::new() });
                    open_field = None;
                } else if current.is_some() && open_field.is_none() {
                    if let Some(tag) = picked_tag(&name.local_name) {
                        open_field = Some((tag, depth, String::new()));
                    }
                }
                depth += 1;
            },
            Ok(XmlEvent::Characters(ref text)) | Ok(XmlEvent::CData(ref text)) => {
                if let Some((_, _, ref mut buf)) = open_field {
                    if !buf.is_empty() {
                        buf.push(' ');
                    }
                    buf.push_str(text);
                }
            },
            Ok(XmlEvent::EndElement { ref name }) => {
                depth = depth.saturating_sub(1);

                let close_field = match open_field {
                    Some((tag, open_depth, _)) => {
                        open_depth == depth && tag.eq_ignore_ascii_case(&name.local_name)
                    },
                    None => false,
                };
                if close_field {
                    if let Some((tag, _, buf)) = open_field.take() {
                        let value = collapse_whitespace(&buf);
                        if let Some(ref mut record) = current {
                            // First occurrence within the record wins.
                            record.fields.entry(tag).or_insert(value);
                        }
                    }
                }

                if name.local_name.eq_ignore_ascii_case(RECORD_TAG) {
                    open_field = None;
                    if let Some(record) = current.take() {
                        records.push(record);
                    }
                }
            },
            Ok(_) => {},
            Err(err) => {
                warn!("Datex snapshot truncated or malformed, keeping {} records: {}",
                      records.len(), err);
                break;
            },
        }
    }

    return records;
}

fn first_nonempty(record: &RawRecord, tags: &[&'static str]) -> String {
    for tag in tags {
        if let Some(value) = record.fields.get(tag) {
            if !value.is_empty() {
                return value.clone();
            }
        }
    }
    return String::new();
}

fn message_from_record(record: &RawRecord) -> Option<TrafficMessage> {
    // Upstream uses '|' as a paragraph separator inside comments.
    let comment = first_nonempty(record, &["comment"])
        .replace('|', "\n")
        .trim()
        .to_string();

    let severity = {
        let s = first_nonempty(record, &["severity", "impactOnTraffic"]);
        if s.is_empty() { "INFO".to_string() } else { s }
    };

    let time = first_nonempty(
        record, &["situationRecordCreationTime", "versionTime"]);

    let location = ["roadNumber", "roadName", "directionRelative", "areaName"]
        .iter()
        .map(|&tag| first_nonempty(record, &[tag]))
        .filter(|v| !v.is_empty())
        .collect::<Vec<String>>()
        .join(" ");

    let title = if comment.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        truncate_chars(comment.split('.').next().unwrap_or(""), 90)
    };

    if title.is_empty() && comment.is_empty() {
        return None;
    }

    return Some(TrafficMessage {
        title: title,
        text: comment,
        location: location,
        severity: severity,
        time: time,
    });
}

fn dedup_key(msg: &TrafficMessage) -> String {
    let body = if msg.text.is_empty() { &msg.title } else { &msg.text };
    return format!("{}\u{1}{}",
                   body.trim().to_lowercase(),
                   msg.location.trim().to_lowercase());
}

fn dedup_messages(messages: Vec<TrafficMessage>) -> Vec<TrafficMessage> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut clean = vec![];
    for msg in messages {
        let key = dedup_key(&msg);
        if key == "\u{1}" {
            continue;
        }
        if seen.insert(key) {
            clean.push(msg);
        }
    }
    return clean;
}

fn filter_messages<'a>(messages: &'a [TrafficMessage], filter: &RegionFilter)
                       -> Vec<&'a TrafficMessage> {
    return messages.iter().filter(|m| {
        let haystack = format!("{} {} {}", m.title, m.text, m.location).to_lowercase();
        if filter.exclude.iter().any(|k| haystack.contains(k)) {
            return false;
        }
        return filter.include.iter().any(|k| haystack.contains(k));
    }).collect();
}

/// The full normalization pass, pure given the XML text. Extraction,
/// dedup, region filter with unfiltered fallback, message cap, tunnel
/// status heuristic, payload assembly.
pub fn normalize(xml_text: &str, filter: &RegionFilter, now_iso: &str) -> FeedPayload {
    let raw: Vec<TrafficMessage> = extract_records(xml_text)
        .iter()
        .filter_map(message_from_record)
        .collect();
    let clean = dedup_messages(raw);

    let mut local: Vec<TrafficMessage> =
        filter_messages(&clean, filter).into_iter().cloned().collect();
    if local.is_empty() {
        local = clean.into_iter().take(FALLBACK_COUNT).collect();
    }
    local.truncate(MAX_MESSAGES);

    let (status, reason) = tunnel::derive_status(&local);

    return FeedPayload {
        updated: now_iso.to_string(),
        stavanger: RegionMessages { messages: local },
        byfjord: TunnelSection {
            status: status.as_str().to_string(),
            reason: reason,
            updated: now_iso.to_string(),
            cameras: CameraSlots {
                retning_byfjordtunnelen: CameraSlot {
                    image: "/api/cam?id=nord".to_string(),
                    updated: now_iso.to_string(),
                },
                retning_stavanger: CameraSlot {
                    image: "/api/cam?id=sor".to_string(),
                    updated: now_iso.to_string(),
                },
            },
        },
    };
}

pub fn now_iso() -> String {
    return chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2026-08-25T10:00:00Z";

    fn stavanger() -> &'static RegionFilter {
        return region_filter("stavanger").expect("stavanger filter");
    }

    fn snapshot(records: &[&str]) -> String {
        let body: String = records.iter().map(|comment| format!(
            "<ns12:situationRecord id=\"r{}\">\
               <ns12:situationRecordCreationTime>2026-08-25T09:55:00Z</ns12:situationRecordCreationTime>\
               <ns12:generalPublicComment>\
                 <ns12:comment><ns12:values><ns12:value lang=\"no\">{}</ns12:value></ns12:values></ns12:comment>\
               </ns12:generalPublicComment>\
             </ns12:situationRecord>",
            comment.len(), comment)).collect();
        return format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <ns12:d2LogicalModel xmlns:ns12=\"http://datex2.eu/schema/3/situation\">\
               <ns12:payloadPublication>{}</ns12:payloadPublication>\
             </ns12:d2LogicalModel>", body);
    }

    #[test]
    fn empty_snapshot_yields_empty_board() {
        let payload = normalize(&snapshot(&[]), stavanger(), NOW);
        assert!(payload.stavanger.messages.is_empty());
        assert_eq!("UKJENT", payload.byfjord.status);
        assert_eq!(NOW, payload.updated);
    }

    #[test]
    fn malformed_xml_degrades_to_no_data() {
        let payload = normalize("<broken <<<< not xml", stavanger(), NOW);
        assert!(payload.stavanger.messages.is_empty());
    }

    #[test]
    fn truncated_snapshot_keeps_complete_records() {
        let full = snapshot(&["E39 Byfjordtunnelen: vedlikehold."]);
        let cut = format!("{}<ns12:situationRecord><ns12:comment>half", full);
        let payload = normalize(&cut, stavanger(), NOW);
        assert_eq!(1, payload.stavanger.messages.len());
    }

    #[test]
    fn end_to_end_byfjord_closure() {
        let xml = snapshot(&["E39 Byfjordtunnelen stengt pga brann."]);
        let payload = normalize(&xml, stavanger(), NOW);

        assert_eq!(1, payload.stavanger.messages.len());
        let msg = &payload.stavanger.messages[0];
        assert_eq!("E39 Byfjordtunnelen stengt pga brann", msg.title);
        assert_eq!("E39 Byfjordtunnelen stengt pga brann.", msg.text);
        assert_eq!("INFO", msg.severity);
        assert_eq!("2026-08-25T09:55:00Z", msg.time);

        assert_eq!("STENGT", payload.byfjord.status);
        assert!(payload.byfjord.reason.contains("brann"));
    }

    #[test]
    fn duplicate_records_collapse_to_first() {
        let xml = snapshot(&[
            "E39 Byfjordtunnelen: vedlikeholdsarbeid.",
            "E39 Byfjordtunnelen:   vedlikeholdsarbeid.",
            "E39 Randaberg: kø ved Harestad.",
        ]);
        let payload = normalize(&xml, stavanger(), NOW);
        assert_eq!(2, payload.stavanger.messages.len());
        assert_eq!("E39 Byfjordtunnelen: vedlikeholdsarbeid.",
                   payload.stavanger.messages[0].text);
    }

    #[test]
    fn exclude_term_overrides_include() {
        let xml = snapshot(&[
            "E39 ved Haugesund: vegarbeid.",
            "E39 Eiganestunnelen: normal trafikk i Stavanger retning nord mot Tasta krysset",
        ]);
        let payload = normalize(&xml, stavanger(), NOW);
        assert_eq!(1, payload.stavanger.messages.len());
        assert!(!payload.stavanger.messages[0].text.contains("Haugesund"));
    }

    #[test]
    fn empty_filter_falls_back_to_unfiltered() {
        let xml = snapshot(&[
            "Rv3 Østerdalen: glatt veibane.",
            "Fv50 Hol: midlertidig omlagt kjøremønster i perioder",
        ]);
        let payload = normalize(&xml, stavanger(), NOW);
        assert_eq!(2, payload.stavanger.messages.len());
    }

    #[test]
    fn message_cap_is_applied() {
        let comments: Vec<String> = (0..40)
            .map(|i| format!("E39 Stavanger: hendelse nummer {} pågår", i))
            .collect();
        let refs: Vec<&str> = comments.iter().map(String::as_str).collect();
        let payload = normalize(&snapshot(&refs), stavanger(), NOW);
        assert_eq!(MAX_MESSAGES, payload.stavanger.messages.len());
        assert!(payload.stavanger.messages[0].text.contains("nummer 0"));
    }

    #[test]
    fn entities_decode_to_literals() {
        let xml = snapshot(&[
            "Stavanger sentrum: &quot;E39&quot; &amp; &lt;Tasta&gt; &#39;regulert&#39;.",
        ]);
        let payload = normalize(&xml, stavanger(), NOW);
        let msg = &payload.stavanger.messages[0];
        assert_eq!("Stavanger sentrum: \"E39\" & <Tasta> 'regulert'.", msg.text);
        assert_eq!("Stavanger sentrum: \"E39\" & <Tasta> 'regulert'", msg.title);
    }

    #[test]
    fn pipe_becomes_newline() {
        let xml = snapshot(&["E39 Byfjordtunnelen: vedlikehold | Venting må påregnes"]);
        let payload = normalize(&xml, stavanger(), NOW);
        assert_eq!("E39 Byfjordtunnelen: vedlikehold \n Venting må påregnes",
                   payload.stavanger.messages[0].text);
    }

    #[test]
    fn long_comment_title_truncates() {
        let comment = format!("E39 Stavanger {} sperret", "x".repeat(120));
        let payload = normalize(&snapshot(&[comment.as_str()]), stavanger(), NOW);
        let msg = &payload.stavanger.messages[0];
        assert_eq!(90, msg.title.chars().count());
        assert!(msg.text.len() > msg.title.len());
    }

    #[test]
    fn severity_prefers_severity_tag_then_impact() {
        let xml = "<?xml version=\"1.0\"?><root>\
            <s:situationRecord xmlns:s=\"urn:x\">\
              <s:severity>high</s:severity>\
              <s:impactOnTraffic>heavy</s:impactOnTraffic>\
              <s:comment>E39 Stavanger: ulykke ved Schancheholen.</s:comment>\
            </s:situationRecord>\
            <s:situationRecord xmlns:s=\"urn:x\">\
              <s:impactOnTraffic>heavy</s:impactOnTraffic>\
              <s:comment>E39 Madla: felt sperret etter uhell.</s:comment>\
            </s:situationRecord>\
            <s:situationRecord xmlns:s=\"urn:x\">\
              <s:comment>E39 Randaberg: sakteflytende trafikk nordover.</s:comment>\
            </s:situationRecord></root>";
        let payload = normalize(xml, stavanger(), NOW);
        assert_eq!("high", payload.stavanger.messages[0].severity);
        assert_eq!("heavy", payload.stavanger.messages[1].severity);
        assert_eq!("INFO", payload.stavanger.messages[2].severity);
    }

    #[test]
    fn location_hints_feed_where_field() {
        let xml = "<?xml version=\"1.0\"?>\
            <s:situationRecord xmlns:s=\"urn:x\">\
              <s:comment>Tunnelvask natt til onsdag.</s:comment>\
              <s:groupOfLocations>\
                <s:roadNumber>E39</s:roadNumber>\
                <s:roadName>Byfjordtunnelen</s:roadName>\
                <s:directionRelative>positive</s:directionRelative>\
              </s:groupOfLocations>\
            </s:situationRecord>";
        let payload = normalize(xml, stavanger(), NOW);
        assert_eq!("E39 Byfjordtunnelen positive",
                   payload.stavanger.messages[0].location);
    }

    #[test]
    fn commentless_record_gets_fallback_title() {
        let xml = "<?xml version=\"1.0\"?>\
            <s:situationRecord xmlns:s=\"urn:x\">\
              <s:severity>low</s:severity>\
              <s:roadNumber>E39</s:roadNumber>\
            </s:situationRecord>";
        let payload = normalize(xml, stavanger(), NOW);
        assert_eq!(1, payload.stavanger.messages.len());
        assert_eq!("Trafikkmelding", payload.stavanger.messages[0].title);
        assert_eq!("", payload.stavanger.messages[0].text);
    }

    #[test]
    fn camera_slots_point_at_proxy() {
        let payload = normalize(&snapshot(&[]), stavanger(), NOW);
        assert_eq!("/api/cam?id=nord",
                   payload.byfjord.cameras.retning_byfjordtunnelen.image);
        assert_eq!("/api/cam?id=sor",
                   payload.byfjord.cameras.retning_stavanger.image);
    }

    #[test]
    fn unknown_region_has_no_filter() {
        assert!(region_filter("stavanger").is_some());
        assert!(region_filter("STAVANGER").is_some());
        assert!(region_filter("oslo").is_none());
    }

    #[test]
    fn subscription_reference_is_percent_encoded() {
        let client = reqwest::blocking::Client::new();
        let mut config = Config::default();
        config.datex_subscription = Some("abo 42&x=y".to_string());

        let request = snapshot_request(&client, &config).build().expect("request");
        let query = request.url().query().expect("query string").to_string();

        assert!(query.starts_with("subscriptionReference="));
        assert!(query.contains("%26x"));
        assert!(!query.contains("&x=y"));
    }

    #[test]
    fn snippet_truncation_is_char_safe() {
        let s = "æøå".repeat(1000);
        assert_eq!(2000, truncate_chars(&s, 2000).chars().count());
    }
}
