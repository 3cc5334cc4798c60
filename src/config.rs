extern crate std;

pub const DEFAULT_DATEX_URL: &str =
    "https://datex-server-get-v3-1.atlas.vegvesen.no/datexapi/GetSituation/pullsnapshotdata";

pub const USER_AGENT: &str = "tunneldash/0.1 (byfjord wallboard)";

/// Runtime configuration, read once from the environment at startup.
/// Credentials are optional; the upstream snapshot endpoint works
/// anonymously but rate-limits harder without them.
#[derive(Debug, Clone)]
pub struct Config {
    pub datex_url: String,
    pub datex_user: Option<String>,
    pub datex_pass: Option<String>,
    pub datex_bearer: Option<String>,
    pub datex_subscription: Option<String>,
    pub cam_nord_url: Option<String>,
    pub cam_sor_url: Option<String>,
}

fn env_opt(key: &str) -> Option<String> {
    return std::env::var(key).ok().filter(|v| !v.trim().is_empty());
}

impl Config {
    pub fn from_env() -> Config {
        return Config {
            datex_url: env_opt("DATEX_URL")
                .unwrap_or_else(|| DEFAULT_DATEX_URL.to_string()),
            datex_user: env_opt("DATEX_USER"),
            datex_pass: env_opt("DATEX_PASS"),
            datex_bearer: env_opt("DATEX_BEARER"),
            datex_subscription: env_opt("DATEX_SUBSCRIPTION"),
            cam_nord_url: env_opt("CAM_NORD_URL"),
            cam_sor_url: env_opt("CAM_SOR_URL"),
        };
    }

    pub fn camera_url(&self, slot: &str) -> Option<&str> {
        match slot {
            "nord" => return self.cam_nord_url.as_deref(),
            "sor" => return self.cam_sor_url.as_deref(),
            _ => return None,
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        return Config {
            datex_url: DEFAULT_DATEX_URL.to_string(),
            datex_user: None,
            datex_pass: None,
            datex_bearer: None,
            datex_subscription: None,
            cam_nord_url: None,
            cam_sor_url: None,
        };
    }
}
