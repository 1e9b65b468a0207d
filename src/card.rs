/// HTTP transport for the ez Share WiFi SD card (firmware 4.4.0).
///
/// Firmware quirks this works around:
///   - Directory listing is broken, so nothing here lists; callers probe.
///   - Missing files do NOT 404. The card answers 200 with an HTML page
///     (`Content-Type: text/html`, chunked). Real files come back with a
///     non-HTML Content-Type and a Content-Length.
///   - Folders answer HEAD like a zero-length file.
///   - HEAD responses carry a junk Content-Disposition; ignore it.
///
/// All calls block. The card's radio falls over under concurrent load, so
/// there is exactly one request in flight at a time.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ureq::Agent;
use ureq::http::Response;

use crate::download::Fetch;
use crate::error::CardError;
use crate::prober::{Probe, ProbeOutcome};

pub const CONFIRMED_FIRMWARE: &str = "4.4.0";
const USER_AGENT: &str = "Mozilla/5.0";
const PING_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Card {
    base_url: String,
    agent: Agent,
    ping_agent: Agent,
}

impl Card {
    /// `address` is a bare host (`192.168.4.1`, `host:port`) or a full `http://` URL.
    pub fn new(address: &str, timeout: Duration) -> Self {
        let base_url = if address.contains("://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };
        Self { base_url, agent: build_agent(timeout), ping_agent: build_agent(PING_TIMEOUT) }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Check the card is reachable and return its firmware version.
    ///
    /// The version endpoint answers with XML like:
    ///   <response><device><version>
    ///   LZ1001EDPG:4.4.0:2014-07-28:62 LZ1001EDRS:4.4.0:2014-07-28:62 ...
    ///   </version></device></response>
    pub fn ping(&self) -> Option<String> {
        let body = self
            .ping_agent
            .get(&self.url("client?command=version"))
            .header("User-Agent", USER_AGENT)
            .call()
            .ok()
            .filter(|r| r.status().is_success())?
            .body_mut()
            .read_to_string()
            .ok()?;
        parse_version(&body)
    }
}

fn build_agent(timeout: Duration) -> Agent {
    let config = Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .max_redirects(0)
        .build();
    config.into()
}

fn content_type<B>(resp: &Response<B>) -> &str {
    resp.headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn content_length<B>(resp: &Response<B>) -> u64 {
    resp.headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Firmware version from the `<version>` element: the first `:X.Y.Z:` token.
fn parse_version(xml: &str) -> Option<String> {
    let start = xml.find("<version>")? + "<version>".len();
    let end = start + xml[start..].find("</version>")?;
    xml[start..end]
        .split(':')
        .skip(1)
        .find(|part| {
            let nums: Vec<&str> = part.split('.').collect();
            nums.len() == 3 && nums.iter().all(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        })
        .map(str::to_string)
}

impl Probe for Card {
    fn probe(&self, path: &str) -> ProbeOutcome {
        let resp = match self.agent.head(&self.url(path)).header("User-Agent", USER_AGENT).call() {
            Ok(r) => r,
            Err(e) => return ProbeOutcome::Failed(e.into()),
        };
        if !resp.status().is_success() || content_type(&resp).contains("text/html") {
            return ProbeOutcome::Absent;
        }
        ProbeOutcome::Present { size: content_length(&resp) }
    }
}

impl Fetch for Card {
    /// Stream `path` into `dest` via a `.part` file, renamed on completion.
    fn fetch(&self, path: &str, dest: &Path) -> Result<u64, CardError> {
        let resp = self.agent.get(&self.url(path)).header("User-Agent", USER_AGENT).call()?;
        if !resp.status().is_success() || content_type(&resp).contains("text/html") {
            return Err(CardError::NotAFile(path.to_string()));
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let part = part_path(dest);
        let mut reader = resp.into_body().into_reader();
        match write_part(&mut reader, &part, dest) {
            Ok(written) => Ok(written),
            Err(e) => {
                let _ = std::fs::remove_file(&part);
                Err(e.into())
            }
        }
    }
}

/// Copy into `part`, flush to disk, then move it over `dest`.
fn write_part(reader: &mut impl Read, part: &Path, dest: &Path) -> std::io::Result<u64> {
    let mut file = File::create(part)?;
    let written = std::io::copy(reader, &mut file)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(part, dest)?;
    Ok(written)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
