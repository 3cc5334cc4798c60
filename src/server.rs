extern crate querystring;
extern crate tiny_http;

use crate::camera;
use crate::config::Config;
use crate::datex;
use crate::payload::ErrorPayload;
use crate::result;

const DEFAULT_REGION: &str = "stavanger";

/// Everything needed to answer one request. Built behind the panic
/// boundary so the serving loop never sees an unwind.
pub struct Reply {
    pub status: u16,
    pub content_type: String,
    pub cache_control: String,
    pub body: Vec<u8>,
}

impl Reply {
    fn json(status: u16, body: Vec<u8>) -> Reply {
        return Reply {
            status: status,
            content_type: "application/json; charset=utf-8".to_string(),
            cache_control: "no-store".to_string(),
            body: body,
        };
    }

    fn text(status: u16, body: &str) -> Reply {
        return Reply {
            status: status,
            content_type: "text/plain; charset=utf-8".to_string(),
            cache_control: "no-store".to_string(),
            body: body.as_bytes().to_vec(),
        };
    }
}

fn error_reply(status: u16, error: &str, raw: Option<String>, message: Option<String>) -> Reply {
    let payload = ErrorPayload {
        updated: datex::now_iso(),
        error: error.to_string(),
        raw: raw,
        message: message,
    };
    // A serialization failure here has nowhere better to go than plain text.
    match serde_json::to_vec(&payload) {
        Ok(body) => return Reply::json(status, body),
        Err(_) => return Reply::text(status, error),
    }
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    for (k, v) in querystring::querify(query) {
        if k == key {
            return Some(v);
        }
    }
    return None;
}

fn handle_combined(config: &Config, query: &str) -> Reply {
    let region = query_param(query, "region").unwrap_or(DEFAULT_REGION);
    let filter = match datex::region_filter(region) {
        Some(filter) => filter,
        None => {
            return error_reply(400, &format!("Ukjent region: {}", region), None, None);
        },
    };

    match datex::fetch_snapshot(config) {
        Ok(datex::FetchOutcome::Snapshot(xml)) => {
            let payload = datex::normalize(&xml, filter, &datex::now_iso());
            match serde_json::to_vec(&payload) {
                Ok(body) => return Reply::json(200, body),
                Err(err) => {
                    error!("Payload serialization failed: {}", err);
                    return error_reply(500, "Internal error", None, Some(err.to_string()));
                },
            }
        },
        Ok(datex::FetchOutcome::UpstreamError { status, snippet }) => {
            warn!("Upstream snapshot returned {}", status);
            return error_reply(
                502, &format!("Upstream {}", status), Some(snippet), None);
        },
        Err(err) => {
            // Transport-level failures are the upstream's problem (502);
            // anything else is ours (500).
            match err {
                result::DashError::HttpError(_)
                | result::DashError::IoError(_)
                | result::DashError::AnnotatedError(_) => {
                    warn!("Upstream fetch failed: {}", err);
                    return error_reply(
                        502, "Upstream fetch failed", None, Some(err.to_string()));
                },
                _ => {
                    error!("Internal error handling /api/combined: {}", err);
                    return error_reply(
                        500, "Internal error", None, Some(err.to_string()));
                },
            }
        },
    }
}

fn handle_camera(config: &Config, query: &str) -> Reply {
    let slot = query_param(query, "id").unwrap_or("").to_lowercase();
    if !camera::VALID_SLOTS.contains(&slot.as_str()) {
        return Reply::text(400, "Ukjent kamera. Bruk id=nord eller id=sor.");
    }

    let upstream = match config.camera_url(&slot) {
        Some(url) => url,
        None => {
            warn!("Camera slot '{}' has no configured source", slot);
            return Reply::text(502, "Kamerakilde ikke konfigurert.");
        },
    };

    match camera::fetch_camera(upstream) {
        Ok(camera::CameraOutcome::Image { content_type, bytes }) => {
            return Reply {
                status: 200,
                content_type: content_type,
                // Snapshots refresh every ~15s upstream; a short shared
                // cache keeps multiple wallboards from hammering the source.
                cache_control: "public, max-age=15".to_string(),
                body: bytes,
            };
        },
        Ok(camera::CameraOutcome::UpstreamError(status)) => {
            warn!("Camera source for '{}' returned {}", slot, status);
            return Reply::text(502, &format!("Kamerakilde feilet: {}", status));
        },
        Err(err) => {
            warn!("Camera fetch for '{}' failed: {}", slot, err);
            return Reply::text(502, "Kamerakilde feilet.");
        },
    }
}

pub fn handle(config: &Config, method: &tiny_http::Method, url: &str) -> Reply {
    if *method != tiny_http::Method::Get {
        return Reply::text(405, "Method not allowed");
    }

    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    };

    match path {
        "/api/combined" => return handle_combined(config, query),
        "/api/cam" => return handle_camera(config, query),
        _ => return Reply::text(404, "Not found"),
    }
}

fn header(name: &str, value: &str) -> tiny_http::Header {
    return tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes())
        .expect("static header");
}

pub fn run_server(port: u16, config: Config) -> result::DashResult<()> {
    let server = tiny_http::Server::http(("0.0.0.0", port))
        .map_err(|err| result::make_error(&format!("HTTP server startup: {}", err)))?;
    info!("Serving /api/combined and /api/cam on port {}", port);

    for request in server.incoming_requests() {
        let method = request.method().clone();
        let url = request.url().to_string();
        debug!("{:?} {}", method, url);

        // One bad request must not take the wallboard feed down.
        let reply = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            return handle(&config, &method, &url);
        })).unwrap_or_else(|_| {
            error!("Handler panicked on {:?} {}", method, url);
            return error_reply(500, "Internal error", None, None);
        });

        let response = tiny_http::Response::from_data(reply.body)
            .with_status_code(reply.status)
            .with_header(header("Content-Type", &reply.content_type))
            .with_header(header("Cache-Control", &reply.cache_control))
            .with_header(header("Access-Control-Allow-Origin", "*"));

        if let Err(err) = request.respond(response) {
            warn!("Failed writing response: {}", err);
        }
    }

    return Ok(());
}
