extern crate chrono;
extern crate flexi_logger;
extern crate getopts;
extern crate reqwest;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

mod camera;
mod config;
mod datex;
mod payload;
mod result;
mod server;
mod tunnel;
mod wallboard;

const DEFAULT_PORT: u16 = 8787;

fn main() {
    let _logger = flexi_logger::Logger::try_with_env_or_str("info")
        .expect("logger spec")
        .start()
        .expect("logger start");

    let args: Vec<String> = std::env::args().collect();
    let mut opts = getopts::Options::new();
    opts.optopt("p", "port", "HTTP port for the feed API.", "PORT");
    opts.optopt("a", "api", "Poll this combined-feed URL instead of the local server.", "URL");
    opts.optopt("s", "save-html", "Where to write the rendered board each cycle.", "FILENAME");
    opts.optflag("o", "one-shot", "Poll once and exit.");
    opts.optflag("n", "server-only", "Serve the API without running the wallboard poller.");

    let matches = opts.parse(&args[1..]).expect("parse opts");

    let port = matches.opt_str("port")
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let server_only = matches.opt_present("server-only");
    let one_shot = matches.opt_present("one-shot");

    let config = config::Config::from_env();
    info!("Running. port={} server_only={} one_shot={}", port, server_only, one_shot);

    if server_only {
        if let Err(err) = server::run_server(port, config) {
            error!("{}", err);
            std::process::exit(1);
        }
        return;
    }

    let api_url = matches.opt_str("api").unwrap_or_else(|| {
        format!("http://127.0.0.1:{}/api/combined?region=stavanger", port)
    });

    let server_config = config.clone();
    std::thread::spawn(move || {
        if let Err(err) = server::run_server(port, server_config) {
            error!("{}", err);
            std::process::exit(1);
        }
    });
    // Let the listener come up before the first poll.
    std::thread::sleep(std::time::Duration::from_millis(200));

    wallboard::run_poller(&api_url, one_shot, matches.opt_str("save-html"));
}
