extern crate anyhow;
extern crate chrono;
extern crate reqwest;

use crate::payload::{FeedPayload, TrafficMessage};
use crate::result;

use anyhow::Context;
use std::time::{Duration, Instant};

pub const POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const RETRY_DELAY: Duration = Duration::from_secs(20);

/// Three-way visual state of the board. Warn is the fail-safe: anything
/// ambiguous must never render as falsely good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Good,
    Bad,
    Warn,
}

impl Theme {
    pub fn css_class(&self) -> &'static str {
        match self {
            Theme::Good => return "good",
            Theme::Bad => return "bad",
            Theme::Warn => return "warn",
        }
    }
}

pub fn theme_for_status(status: &str) -> Theme {
    let status = status.trim().to_uppercase();
    if status == "ÅPEN" {
        return Theme::Good;
    }
    if status == "STENGT" {
        return Theme::Bad;
    }
    return Theme::Warn;
}

pub fn pill_label(status: &str) -> &'static str {
    match status.trim().to_uppercase().as_str() {
        "ÅPEN" => return "FRI FLYT",
        "STENGT" => return "STENGT",
        "AVVIK" => return "AVVIK",
        _ => return "SJEKK STATUS",
    }
}

/// Severity is upstream-defined free text, so the mapping is a small
/// allowlist and everything unrecognized falls through to "info".
pub fn severity_class(severity: &str) -> &'static str {
    match severity.trim().to_uppercase().as_str() {
        "STENGT" => return "bad",
        "ULYKKE" | "VEIARBEID" | "VÆR" | "HIGH" | "HIGHEST" => return "warn",
        _ => return "info",
    }
}

pub fn esc(s: &str) -> String {
    return s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        // Feed text also lands in double-quoted attributes (camera src),
        // so a bare quote must not end the attribute.
        .replace('"', "&quot;");
}

/// Appends the cache-busting timestamp, keeping the URL valid whether or
/// not it already carries a query (the proxy slots do: `?id=nord`).
pub fn cache_busted(url: &str, bust: u64) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    return format!("{}{}t={}", url, sep, bust);
}

fn fmt_time(iso: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(iso) {
        Ok(dt) => return dt.format("%H:%M").to_string(),
        Err(_) => return "--:--".to_string(),
    }
}

/// Poll-loop state. `pending_retry` is the single outstanding retry
/// deadline; scheduling a new one replaces it, so overlapping failures
/// never pile up timers.
pub struct Wallboard {
    pub api_url: String,
    pending_retry: Option<Instant>,
}

impl Wallboard {
    pub fn new(api_url: &str) -> Wallboard {
        return Wallboard {
            api_url: api_url.to_string(),
            pending_retry: None,
        };
    }

    pub fn on_success(&mut self) {
        self.pending_retry = None;
    }

    pub fn schedule_retry(&mut self, now: Instant) {
        self.pending_retry = Some(now + RETRY_DELAY);
    }

    pub fn retry_pending(&self) -> bool {
        return self.pending_retry.is_some();
    }

    /// How long to sleep before the next fetch: the retry deadline when
    /// one is pending, otherwise the regular interval.
    pub fn sleep_duration(&self, now: Instant) -> Duration {
        match self.pending_retry {
            Some(deadline) => {
                return deadline.saturating_duration_since(now);
            },
            None => return POLL_INTERVAL,
        }
    }
}

pub fn fetch_payload(api_url: &str) -> result::DashResult<FeedPayload> {
    use std::io::Read;

    let client = reqwest::blocking::Client::new();
    let mut response = client.get(api_url)
        .header(reqwest::header::CACHE_CONTROL, "no-store")
        .send()
        .with_context(|| format!("while polling {}", api_url))?;

    let status = response.status();
    if !status.is_success() {
        return Err(result::make_error(&format!("Status {}", status.as_u16())));
    }

    let mut body = String::new();
    response.read_to_string(&mut body)?;
    let payload: FeedPayload = serde_json::from_str(&body)?;
    return Ok(payload);
}

fn render_message(msg: &TrafficMessage) -> String {
    return format!(
        "<div class=\"item {}\"><div class=\"badge\"></div><div class=\"itemMain\">\
         <div class=\"itemTitle\">{}</div><div class=\"itemText\">{}</div></div></div>",
        severity_class(&msg.severity), esc(&msg.title), esc(&msg.text));
}

/// Renders one full board snapshot. All feed-sourced text goes through
/// `esc` so a malicious comment can't inject markup into the page.
pub fn render_html(payload: &FeedPayload, cache_bust: u64) -> String {
    let status = payload.byfjord.status.to_uppercase();
    let theme = theme_for_status(&status);
    let time_str = fmt_time(&payload.updated);

    let items = if payload.stavanger.messages.is_empty() {
        "<div class=\"skeleton\">Ingen aktive hendelser i Stavanger.</div>".to_string()
    } else {
        payload.stavanger.messages.iter().map(|m| render_message(m)).collect()
    };

    let reason = if payload.byfjord.reason.is_empty() {
        "Ingen spesielle merknader.".to_string()
    } else {
        esc(&payload.byfjord.reason)
    };

    return format!(
        "<div id=\"app\" class=\"{theme}\">\
         <div id=\"statusText\">{status}</div>\
         <div id=\"statusReason\">{reason}</div>\
         <div id=\"pill\">{pill}</div>\
         <div id=\"updated\">Oppdatert: {time}</div>\
         <img id=\"cam1\" src=\"{cam1}\" />\
         <img id=\"cam2\" src=\"{cam2}\" />\
         <div id=\"items\">{items}</div>\
         </div>",
        theme = theme.css_class(),
        status = esc(&status),
        reason = reason,
        pill = pill_label(&status),
        time = time_str,
        cam1 = esc(&cache_busted(&payload.byfjord.cameras.retning_byfjordtunnelen.image, cache_bust)),
        cam2 = esc(&cache_busted(&payload.byfjord.cameras.retning_stavanger.image, cache_bust)),
        items = items);
}

/// The fixed degraded state: every transport or non-2xx failure collapses
/// to this one rendering, always themed warn.
pub fn render_failure_html(detail: &str) -> String {
    return format!(
        "<div id=\"app\" class=\"warn\">\
         <div id=\"statusText\">KOBLINGSFEIL</div>\
         <div id=\"statusReason\">Kunne ikke hente data ({}). Forsøker igjen om 20s.</div>\
         <div id=\"pill\">OFFLINE</div>\
         </div>",
        esc(detail));
}

fn cache_bust_millis() -> u64 {
    return chrono::Utc::now().timestamp_millis() as u64;
}

fn save_html(path: &str, html: &str) {
    if let Err(err) = std::fs::write(path, html) {
        warn!("Failed writing board snapshot to {}: {}", path, err);
    }
}

pub fn run_poller(api_url: &str, one_shot: bool, html_out: Option<String>) {
    let mut board = Wallboard::new(api_url);

    loop {
        match fetch_payload(&board.api_url) {
            Ok(payload) => {
                board.on_success();
                let status = payload.byfjord.status.to_uppercase();
                info!("Byfjordtunnelen {} ({}), {} hendelser",
                      status,
                      theme_for_status(&status).css_class(),
                      payload.stavanger.messages.len());
                if let Some(ref path) = html_out {
                    save_html(path, &render_html(&payload, cache_bust_millis()));
                }
            },
            Err(err) => {
                warn!("Poll failed: {}", err);
                board.schedule_retry(Instant::now());
                if let Some(ref path) = html_out {
                    save_html(path, &render_failure_html(&err.to_string()));
                }
            },
        }

        if one_shot {
            break;
        }

        std::thread::sleep(board.sleep_duration(Instant::now()));
    }
}
