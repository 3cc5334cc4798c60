use crate::payload::TrafficMessage;

pub const TUNNEL_KEYWORD: &str = "byfjord";

// Checked first; a closure term wins over any deviation term.
const CLOSED_TERMS: &[&str] = &["stengt", "tunnel stengt", "closed", "closure"];

const DEVIATION_TERMS: &[&str] = &[
    "kolonne",
    "stans",
    "omkjøring",
    "lysregulering",
    "dirigering",
    "redusert",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    Open,
    Closed,
    Deviation,
    Unknown,
}

impl TunnelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelStatus::Open => return "ÅPEN",
            TunnelStatus::Closed => return "STENGT",
            TunnelStatus::Deviation => return "AVVIK",
            TunnelStatus::Unknown => return "UKJENT",
        }
    }
}

/// Classifies one message text. Assumes the caller already picked a
/// tunnel-related message; the no-message case is handled in `derive_status`.
fn classify(text: &str) -> TunnelStatus {
    let text = text.to_lowercase();
    if CLOSED_TERMS.iter().any(|t| text.contains(t)) {
        return TunnelStatus::Closed;
    }
    if DEVIATION_TERMS.iter().any(|t| text.contains(t)) {
        return TunnelStatus::Deviation;
    }
    return TunnelStatus::Open;
}

/// Finds the first message mentioning the watched tunnel and derives the
/// coarse status from its text. When no message mentions the tunnel the
/// status is UKJENT rather than ÅPEN: a silent feed does not prove the
/// tunnel is open, and the wallboard renders UKJENT as warn.
pub fn derive_status(messages: &[TrafficMessage]) -> (TunnelStatus, String) {
    let witness = messages.iter().find(|m| {
        format!("{} {}", m.title, m.text).to_lowercase().contains(TUNNEL_KEYWORD)
    });

    match witness {
        Some(msg) => {
            let combined = format!("{} {}", msg.title, msg.text);
            let reason = if msg.text.is_empty() { msg.title.clone() } else { msg.text.clone() };
            return (classify(&combined), reason);
        },
        None => {
            return (TunnelStatus::Unknown, "".to_string());
        },
    }
}
