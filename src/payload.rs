extern crate serde;

/// One normalized traffic event, as served to the wallboard.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrafficMessage {
    pub title: String,
    pub text: String,
    #[serde(rename = "where", default)]
    pub location: String,
    pub severity: String,
    pub time: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RegionMessages {
    pub messages: Vec<TrafficMessage>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CameraSlot {
    pub image: String,
    pub updated: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CameraSlots {
    #[serde(rename = "retningByfjordtunnelen")]
    pub retning_byfjordtunnelen: CameraSlot,
    #[serde(rename = "retningStavanger")]
    pub retning_stavanger: CameraSlot,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TunnelSection {
    pub status: String,
    pub reason: String,
    pub updated: String,
    pub cameras: CameraSlots,
}

/// The wire contract for `GET /api/combined`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FeedPayload {
    pub updated: String,
    pub stavanger: RegionMessages,
    pub byfjord: TunnelSection,
}

/// Diagnostic body for 502/500 responses. `raw` carries a truncated
/// upstream snippet, `message` an internal error string. Credentials
/// must never end up in either.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorPayload {
    pub updated: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
