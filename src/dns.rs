//! DNS uploaders: point a name at the ranking's addresses.
//!
//! A provider replaces the records wholesale: delete every existing A or AAAA
//! record for the target name, then create one record per address. The two
//! shipped providers speak the Cloudflare and Vercel REST APIs over a
//! blocking `reqwest` client.

use serde::Deserialize;
use serde_json::json;
use std::net::IpAddr;
use thiserror::Error;

const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";
const VERCEL_API_BASE: &str = "https://api.vercel.com";

/// Errors from provider construction or the REST round-trips.
#[derive(Debug, Error)]
pub enum DnsError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{provider} API error: {message}")]
    Api {
        provider: &'static str,
        message: String,
    },
    #[error("cloudflare: API token required (token field or CF_API_TOKEN)")]
    MissingCloudflareToken,
    #[error("cloudflare: zone ID required (zone field or CF_ZONE_ID)")]
    MissingCloudflareZone,
    #[error("vercel: API token required (token field or VERCEL_TOKEN)")]
    MissingVercelToken,
    #[error("vercel: domain required (zone field)")]
    MissingVercelDomain,
    #[error("unknown DNS provider `{0}` (supported: cloudflare, vercel)")]
    UnknownProvider(String),
}

/// Upload settings, typically filled from CLI flags with env fallbacks.
#[derive(Debug, Clone, Default)]
pub struct DnsConfig {
    /// `cloudflare` or `vercel`.
    pub provider: String,
    /// API token; falls back to `CF_API_TOKEN` / `VERCEL_TOKEN`.
    pub token: String,
    /// Zone ID (Cloudflare) or domain (Vercel).
    pub zone: String,
    /// Subdomain prefix, e.g. `cf` for `cf.example.com`; empty or `@` means
    /// the apex.
    pub subdomain: String,
    /// Vercel team scope; falls back to `VERCEL_TEAM_ID`.
    pub team_id: String,
}

/// Record management surface the uploader drives.
pub trait DnsProvider {
    fn name(&self) -> &'static str;
    /// Delete every A (or AAAA) record for the subdomain.
    fn delete_records(&mut self, subdomain: &str, ipv6: bool) -> Result<(), DnsError>;
    /// Create one A/AAAA record per address.
    fn create_records(&mut self, subdomain: &str, ips: &[IpAddr]) -> Result<(), DnsError>;
}

/// Build a provider from the config, filling blanks from the environment.
pub fn new_provider(cfg: &DnsConfig) -> Result<Box<dyn DnsProvider>, DnsError> {
    let env = |key: &str| std::env::var(key).unwrap_or_default();
    match cfg.provider.as_str() {
        "cloudflare" => {
            let token = non_empty(&cfg.token, || env("CF_API_TOKEN"));
            let zone = non_empty(&cfg.zone, || env("CF_ZONE_ID"));
            if token.is_empty() {
                return Err(DnsError::MissingCloudflareToken);
            }
            if zone.is_empty() {
                return Err(DnsError::MissingCloudflareZone);
            }
            Ok(Box::new(CloudflareDns::new(token, zone)?))
        }
        "vercel" => {
            let token = non_empty(&cfg.token, || env("VERCEL_TOKEN"));
            let team_id = non_empty(&cfg.team_id, || env("VERCEL_TEAM_ID"));
            if token.is_empty() {
                return Err(DnsError::MissingVercelToken);
            }
            if cfg.zone.is_empty() {
                return Err(DnsError::MissingVercelDomain);
            }
            Ok(Box::new(VercelDns::new(token, cfg.zone.clone(), team_id)?))
        }
        other => Err(DnsError::UnknownProvider(other.to_string())),
    }
}

fn non_empty(value: &str, fallback: impl FnOnce() -> String) -> String {
    if value.is_empty() {
        fallback()
    } else {
        value.to_string()
    }
}

/// Replace the subdomain's records with `ips`, one family at a time.
///
/// Empty input is a no-op; a partial ranking (e.g. after cancellation) still
/// uploads whatever it contains.
pub fn upload(provider: &mut dyn DnsProvider, subdomain: &str, ips: &[IpAddr]) -> Result<(), DnsError> {
    if ips.is_empty() {
        return Ok(());
    }
    let (v4, v6): (Vec<IpAddr>, Vec<IpAddr>) = ips.iter().partition(|ip| ip.is_ipv4());

    for (family_ips, ipv6, rtype) in [(v4, false, "A"), (v6, true, "AAAA")] {
        if family_ips.is_empty() {
            continue;
        }
        tracing::info!(
            provider = provider.name(),
            subdomain,
            rtype,
            "deleting existing records"
        );
        provider.delete_records(subdomain, ipv6)?;
        tracing::info!(
            provider = provider.name(),
            subdomain,
            rtype,
            count = family_ips.len(),
            "creating records"
        );
        provider.create_records(subdomain, &family_ips)?;
    }
    tracing::info!(provider = provider.name(), subdomain, total = ips.len(), "upload complete");
    Ok(())
}

fn record_type(ip: &IpAddr) -> &'static str {
    if ip.is_ipv4() {
        "A"
    } else {
        "AAAA"
    }
}

// ---------------------------------------------------------------------------
// Cloudflare
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CfRecord {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CfError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct CfListResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<CfError>,
    #[serde(default)]
    result: Vec<CfRecord>,
}

#[derive(Debug, Deserialize)]
struct CfWriteResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<CfError>,
}

#[derive(Debug, Deserialize)]
struct CfZoneResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<CfError>,
    result: Option<CfZoneResult>,
}

#[derive(Debug, Deserialize)]
struct CfZoneResult {
    name: String,
}

fn cf_failure(errors: &[CfError]) -> DnsError {
    DnsError::Api {
        provider: "cloudflare",
        message: errors
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

/// Cloudflare DNS over the v4 REST API.
pub struct CloudflareDns {
    token: String,
    zone_id: String,
    /// Cached zone name (e.g. `example.com`).
    zone_name: Option<String>,
    client: reqwest::blocking::Client,
}

impl CloudflareDns {
    pub fn new(token: String, zone_id: String) -> Result<Self, DnsError> {
        Ok(Self {
            token,
            zone_id,
            zone_name: None,
            client: reqwest::blocking::Client::builder().build()?,
        })
    }

    fn zone_name(&mut self) -> Result<String, DnsError> {
        if let Some(name) = &self.zone_name {
            return Ok(name.clone());
        }
        let url = format!("{CLOUDFLARE_API_BASE}/zones/{}", self.zone_id);
        let resp: CfZoneResponse = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()?
            .json()?;
        if !resp.success {
            return Err(cf_failure(&resp.errors));
        }
        let name = resp
            .result
            .map(|r| r.name)
            .ok_or_else(|| cf_failure(&[]))?;
        self.zone_name = Some(name.clone());
        Ok(name)
    }

    fn fqdn(&mut self, subdomain: &str) -> Result<String, DnsError> {
        let zone = self.zone_name()?;
        if subdomain.is_empty() || subdomain == "@" {
            Ok(zone)
        } else {
            Ok(format!("{subdomain}.{zone}"))
        }
    }

    fn list_records(&self, name: &str, rtype: &str) -> Result<Vec<CfRecord>, DnsError> {
        let url = format!("{CLOUDFLARE_API_BASE}/zones/{}/dns_records", self.zone_id);
        let resp: CfListResponse = self
            .client
            .get(url)
            .query(&[("type", rtype), ("name", name)])
            .bearer_auth(&self.token)
            .send()?
            .json()?;
        if !resp.success {
            return Err(cf_failure(&resp.errors));
        }
        Ok(resp.result)
    }

    fn delete_record(&self, record_id: &str) -> Result<(), DnsError> {
        let url = format!(
            "{CLOUDFLARE_API_BASE}/zones/{}/dns_records/{record_id}",
            self.zone_id
        );
        let resp: CfWriteResponse = self
            .client
            .delete(url)
            .bearer_auth(&self.token)
            .send()?
            .json()?;
        if !resp.success {
            return Err(cf_failure(&resp.errors));
        }
        Ok(())
    }

    fn create_record(&self, name: &str, rtype: &str, content: &str) -> Result<(), DnsError> {
        let url = format!("{CLOUDFLARE_API_BASE}/zones/{}/dns_records", self.zone_id);
        let resp: CfWriteResponse = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&json!({
                "type": rtype,
                "name": name,
                "content": content,
                "ttl": 1, // auto
                "proxied": false,
            }))
            .send()?
            .json()?;
        if !resp.success {
            return Err(cf_failure(&resp.errors));
        }
        Ok(())
    }
}

impl DnsProvider for CloudflareDns {
    fn name(&self) -> &'static str {
        "cloudflare"
    }

    fn delete_records(&mut self, subdomain: &str, ipv6: bool) -> Result<(), DnsError> {
        let rtype = if ipv6 { "AAAA" } else { "A" };
        let fqdn = self.fqdn(subdomain)?;
        for record in self.list_records(&fqdn, rtype)? {
            self.delete_record(&record.id)?;
        }
        Ok(())
    }

    fn create_records(&mut self, subdomain: &str, ips: &[IpAddr]) -> Result<(), DnsError> {
        let fqdn = self.fqdn(subdomain)?;
        for ip in ips {
            self.create_record(&fqdn, record_type(ip), &ip.to_string())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Vercel
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VercelRecord {
    id: String,
    #[serde(rename = "type")]
    rtype: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct VercelListResponse {
    #[serde(default)]
    records: Vec<VercelRecord>,
}

#[derive(Debug, Deserialize)]
struct VercelErrorBody {
    error: Option<VercelErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct VercelErrorDetail {
    message: String,
}

/// Vercel DNS over the v2/v4 domain-records API.
pub struct VercelDns {
    token: String,
    domain: String,
    team_id: String,
    client: reqwest::blocking::Client,
}

impl VercelDns {
    pub fn new(token: String, domain: String, team_id: String) -> Result<Self, DnsError> {
        Ok(Self {
            token,
            domain,
            team_id,
            client: reqwest::blocking::Client::builder().build()?,
        })
    }

    fn request(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        let req = req.bearer_auth(&self.token);
        if self.team_id.is_empty() {
            req
        } else {
            req.query(&[("teamId", self.team_id.as_str())])
        }
    }

    /// Vercel signals failure by status; the body may carry a message.
    fn check(resp: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, DnsError> {
        if resp.status().as_u16() < 400 {
            return Ok(resp);
        }
        let status = resp.status();
        let message = resp
            .json::<VercelErrorBody>()
            .ok()
            .and_then(|b| b.error)
            .map(|e| e.message)
            .unwrap_or_else(|| format!("status {status}"));
        Err(DnsError::Api {
            provider: "vercel",
            message,
        })
    }

    fn list_records(&self) -> Result<Vec<VercelRecord>, DnsError> {
        let url = format!("{VERCEL_API_BASE}/v4/domains/{}/records", self.domain);
        let resp = Self::check(self.request(self.client.get(url)).send()?)?;
        Ok(resp.json::<VercelListResponse>()?.records)
    }

    fn delete_record(&self, record_id: &str) -> Result<(), DnsError> {
        let url = format!(
            "{VERCEL_API_BASE}/v2/domains/{}/records/{record_id}",
            self.domain
        );
        Self::check(self.request(self.client.delete(url)).send()?)?;
        Ok(())
    }

    fn create_record(&self, name: &str, rtype: &str, value: &str) -> Result<(), DnsError> {
        let url = format!("{VERCEL_API_BASE}/v2/domains/{}/records", self.domain);
        Self::check(
            self.request(self.client.post(url))
                .json(&json!({
                    "name": name,
                    "type": rtype,
                    "value": value,
                    "ttl": 60,
                }))
                .send()?,
        )?;
        Ok(())
    }
}

impl DnsProvider for VercelDns {
    fn name(&self) -> &'static str {
        "vercel"
    }

    fn delete_records(&mut self, subdomain: &str, ipv6: bool) -> Result<(), DnsError> {
        let rtype = if ipv6 { "AAAA" } else { "A" };
        for record in self.list_records()? {
            if record.rtype == rtype && record.name == subdomain {
                self.delete_record(&record.id)?;
            }
        }
        Ok(())
    }

    fn create_records(&mut self, subdomain: &str, ips: &[IpAddr]) -> Result<(), DnsError> {
        for ip in ips {
            self.create_record(subdomain, record_type(ip), &ip.to_string())?;
        }
        Ok(())
    }
}
