extern crate anyhow;
extern crate reqwest;

use crate::config;
use crate::result;

use anyhow::Context;

pub const VALID_SLOTS: &[&str] = &["nord", "sor"];

pub enum CameraOutcome {
    Image { content_type: String, bytes: Vec<u8> },
    UpstreamError(u16),
}

/// Pass-through fetch of one camera snapshot. The image bytes are not
/// inspected; the upstream content type rides along, defaulting to JPEG.
pub fn fetch_camera(upstream_url: &str) -> result::DashResult<CameraOutcome> {
    use std::io::Read;

    let client = reqwest::blocking::Client::new();
    let mut response = client.get(upstream_url)
        .header(reqwest::header::USER_AGENT, config::USER_AGENT)
        .header(reqwest::header::ACCEPT,
                "image/avif,image/webp,image/apng,image/*,*/*;q=0.8")
        .send()
        .with_context(|| "while fetching camera snapshot")?;

    let status = response.status();
    if !status.is_success() {
        return Ok(CameraOutcome::UpstreamError(status.as_u16()));
    }

    let content_type = response.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("image/jpeg")
        .to_string();

    let mut bytes = vec![];
    response.read_to_end(&mut bytes)?;

    return Ok(CameraOutcome::Image {
        content_type: content_type,
        bytes: bytes,
    });
}
