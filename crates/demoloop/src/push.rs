use std::time::Duration;

use anyhow::{bail, Context, Result};
use livereload::Stage;
use reqwest::blocking::Client;
use reqwest::Url;

use crate::cli::PushArgs;
use crate::config::DemoConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends every stage of the manifest's passes to a running demo.
pub fn run(args: PushArgs) -> Result<()> {
    let config = DemoConfig::load(&args.config)
        .with_context(|| format!("failed to load demo manifest {}", args.config.display()))?;
    let sources = config.pass_sources()?;
    let port = args.port.unwrap_or(config.server.port);
    let base = Url::parse(&format!("http://{}:{port}/", args.host))
        .with_context(|| format!("invalid host '{}'", args.host))?;

    let selected: Vec<usize> = match args.pass {
        Some(pass) if pass >= sources.len() => {
            bail!("pass {pass} is out of range; the manifest defines {}", sources.len())
        }
        Some(pass) => vec![pass],
        None => (0..sources.len()).collect(),
    };

    let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let mut failures = 0usize;
    for pass in selected {
        for stage in Stage::ALL {
            let url = base.join(&format!("passes/{pass}/{stage}"))?;
            let response = http
                .post(url.clone())
                .header("Content-Type", "text/plain")
                .body(sources[pass].get(stage).to_owned())
                .send()
                .with_context(|| format!("posting {url}"))?;
            let status = response.status();
            println!("pass {pass} {stage}: {status}");
            if status.is_success() {
                tracing::debug!(%url, %status, "stage pushed");
            } else {
                tracing::warn!(%url, %status, "stage refused");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} stage(s) were refused by the demo at {base}");
    }
    Ok(())
}
