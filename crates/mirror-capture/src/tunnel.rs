//! tunneld directory lookup (spec §4.6 strategy 2, §6 Outbound HTTP).
//!
//! `GET http://127.0.0.1:49151/` returns a flat `udid -> [descriptor]` map.
//! Matching falls back through exact id, substring, dashless, then any
//! tunnel from any device — kept exactly as the system this was distilled
//! from behaves (spec.md's Open Question answers "keep the fallback").

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use mirror_core::DeviceId;

const TUNNELD_URL: &str = "http://127.0.0.1:49151/";
const TUNNELD_TIMEOUT: Duration = Duration::from_secs(5);

/// A resolved tunnel endpoint to dial via remote service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelDescriptor {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone)]
struct RawDescriptor {
    #[serde(rename = "tunnel-address", alias = "address")]
    host: Option<String>,
    #[serde(rename = "tunnel-port", alias = "port")]
    port: Option<u16>,
}

type Directory = HashMap<String, Vec<RawDescriptor>>;

/// Looks up the tunnel descriptor for `device`, querying the local tunneld
/// directory over HTTP. Returns `None` on any network, parse, or
/// no-match failure — the caller treats that as "fall through".
pub fn lookup(device: &DeviceId) -> Option<TunnelDescriptor> {
    let directory = fetch_directory().ok()?;
    match_descriptor(device, &directory)
}

fn fetch_directory() -> reqwest::Result<Directory> {
    let client = reqwest::blocking::Client::builder()
        .timeout(TUNNELD_TIMEOUT)
        .build()?;
    client.get(TUNNELD_URL).send()?.json()
}

fn match_descriptor(device: &DeviceId, directory: &Directory) -> Option<TunnelDescriptor> {
    let udid = device.as_str();

    if let Some(list) = directory.get(udid) {
        if let Some(d) = first_valid(list) {
            return Some(d);
        }
    }

    for (tunnel_udid, list) in directory {
        if tunnel_udid == udid || tunnel_udid.contains(udid) || tunnel_udid.replace('-', "") == udid {
            if let Some(d) = first_valid(list) {
                return Some(d);
            }
        }
    }

    for list in directory.values() {
        if let Some(d) = first_valid(list) {
            return Some(d);
        }
    }

    None
}

fn first_valid(list: &[RawDescriptor]) -> Option<TunnelDescriptor> {
    list.iter().find_map(|d| match (&d.host, d.port) {
        (Some(host), Some(port)) if !host.is_empty() && port != 0 => Some(TunnelDescriptor {
            host: host.clone(),
            port,
        }),
        _ => None,
    })
}
