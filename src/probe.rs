//! One-IP measurement harness: TCP connect, TLS handshake with overridden
//! SNI, a single HTTP/1.1 GET, repeated over several rounds and averaged.
//!
//! The harness dials the raw address with `TcpStream::connect_timeout`, so no
//! environment-based proxy resolution can ever run; a proxy hop would
//! invalidate every latency number. Certificate *chains* are accepted without
//! name verification: the endpoint is addressed by IP while the SNI carries an
//! unrelated hostname, so name checks cannot succeed and are not the point of
//! the measurement.
//!
//! Probe failures are data, not errors: any failed step yields a round with
//! `ok = false` and the outcome absorbs it into the averages.

use crate::config::{ConfigError, SearchConfig};
use crate::control::CancelToken;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

const HTTPS_PORT: u16 = 443;
/// Response bytes kept per round; plenty for headers plus a trace body.
const RESPONSE_CAP: usize = 8 * 1024;

/// Aggregated result of probing one IP across all rounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeOutcome {
    /// True iff at least one post-warm-up round completed a 2xx exchange.
    pub ok: bool,
    /// Most recently observed HTTP status (0 if nothing ever answered).
    pub http_status: u16,
    pub connect_ms: f64,
    pub tls_ms: f64,
    pub ttfb_ms: f64,
    pub total_ms: f64,
    /// Most common non-empty `colo=` value among successful rounds.
    pub colo: Option<String>,
    /// Successful post-warm-up rounds.
    pub rounds_ok: u8,
}

impl ProbeOutcome {
    /// The all-failed outcome: zero reward, no usable latencies.
    pub fn failed() -> Self {
        Self {
            ok: false,
            http_status: 0,
            connect_ms: 0.0,
            tls_ms: 0.0,
            ttfb_ms: 0.0,
            total_ms: 0.0,
            colo: None,
            rounds_ok: 0,
        }
    }
}

/// Per-probe settings, lifted out of [`SearchConfig`] so the harness can be
/// used standalone.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// TLS SNI and HTTP `Host` header.
    pub host: String,
    /// Request path.
    pub path: String,
    /// Wall-clock bound per round; the whole probe takes at most
    /// `timeout × rounds`.
    pub timeout: Duration,
    /// Measurement rounds against the same IP.
    pub rounds: u8,
    /// Leading rounds discarded from the averages (TLS session and cache
    /// warm-up noise).
    pub skip_first: u8,
}

impl From<&SearchConfig> for ProbeConfig {
    fn from(cfg: &SearchConfig) -> Self {
        Self {
            host: cfg.host.clone(),
            path: cfg.path.clone(),
            timeout: cfg.timeout,
            rounds: cfg.rounds,
            skip_first: cfg.skip_first,
        }
    }
}

/// The measurement seam the engine consumes.
///
/// Tests substitute deterministic in-memory implementations; production uses
/// [`HttpProber`].
pub trait Prober: Send + Sync {
    fn probe(&self, ip: IpAddr, cancel: &CancelToken) -> ProbeOutcome;
}

/// One complete measurement round.
#[derive(Debug, Clone, Default)]
struct RoundMeasure {
    ok: bool,
    status: u16,
    connect_ms: f64,
    tls_ms: f64,
    ttfb_ms: f64,
    total_ms: f64,
    colo: Option<String>,
}

/// Real TCP+TLS+HTTP prober. One shared rustls config serves every worker.
pub struct HttpProber {
    cfg: ProbeConfig,
    tls: Arc<rustls::ClientConfig>,
    sni: ServerName<'static>,
}

impl HttpProber {
    pub fn new(cfg: ProbeConfig) -> Result<Self, ConfigError> {
        let sni = ServerName::try_from(cfg.host.clone()).map_err(|e| ConfigError::BadHost {
            host: cfg.host.clone(),
            reason: e.to_string(),
        })?;
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let tls = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| ConfigError::Tls(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
            .with_no_client_auth();
        Ok(Self {
            cfg,
            tls: Arc::new(tls),
            sni,
        })
    }

    fn round(&self, ip: IpAddr) -> RoundMeasure {
        self.try_round(ip).unwrap_or_else(|_| RoundMeasure::default())
    }

    fn try_round(&self, ip: IpAddr) -> io::Result<RoundMeasure> {
        let start = Instant::now();
        let deadline = start + self.cfg.timeout;

        let mut tcp = TcpStream::connect_timeout(&SocketAddr::new(ip, HTTPS_PORT), self.cfg.timeout)?;
        let connect_ms = ms_since(start);
        tcp.set_nodelay(true)?;
        apply_deadline(&tcp, deadline)?;

        let mut conn = rustls::ClientConnection::new(self.tls.clone(), self.sni.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tls_start = Instant::now();
        while conn.is_handshaking() {
            apply_deadline(&tcp, deadline)?;
            conn.complete_io(&mut tcp)?;
        }
        let tls_ms = ms_since(tls_start);

        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: prospector/{}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
            self.cfg.path,
            self.cfg.host,
            env!("CARGO_PKG_VERSION"),
        );
        let mut stream = rustls::StreamOwned::new(conn, tcp);
        apply_deadline(&stream.sock, deadline)?;
        stream.write_all(request.as_bytes())?;
        stream.flush()?;

        let mut response = Vec::with_capacity(2048);
        let mut chunk = [0u8; 2048];
        let mut ttfb_ms = 0.0;
        loop {
            if Instant::now() >= deadline || response.len() >= RESPONSE_CAP {
                break;
            }
            apply_deadline(&stream.sock, deadline)?;
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if response.is_empty() {
                        ttfb_ms = ms_since(start);
                    }
                    response.extend_from_slice(&chunk[..n]);
                }
                // A missing close_notify after `Connection: close` is routine.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !response.is_empty() => break,
                Err(e) => return Err(e),
            }
        }
        let total_ms = ms_since(start);

        let status = parse_status(&response).unwrap_or(0);
        Ok(RoundMeasure {
            ok: status / 100 == 2,
            status,
            connect_ms,
            tls_ms,
            ttfb_ms,
            total_ms,
            colo: parse_colo(&response),
        })
    }
}

impl Prober for HttpProber {
    fn probe(&self, ip: IpAddr, cancel: &CancelToken) -> ProbeOutcome {
        let mut rounds = Vec::with_capacity(self.cfg.rounds as usize);
        for _ in 0..self.cfg.rounds {
            if cancel.is_cancelled() {
                break;
            }
            rounds.push(self.round(ip));
        }
        aggregate_rounds(&self.cfg, &rounds)
    }
}

/// Fold per-round measurements into one outcome.
///
/// The first `skip_first` rounds are warm-up and never averaged; latencies
/// come from the remaining *successful* rounds only.
fn aggregate_rounds(cfg: &ProbeConfig, rounds: &[RoundMeasure]) -> ProbeOutcome {
    let http_status = rounds
        .iter()
        .rev()
        .map(|r| r.status)
        .find(|&s| s != 0)
        .unwrap_or(0);

    let successes: Vec<&RoundMeasure> = rounds
        .iter()
        .skip(cfg.skip_first as usize)
        .filter(|r| r.ok)
        .collect();
    if successes.is_empty() {
        return ProbeOutcome {
            http_status,
            ..ProbeOutcome::failed()
        };
    }

    let n = successes.len() as f64;
    let avg = |f: fn(&RoundMeasure) -> f64| successes.iter().map(|r| f(r)).sum::<f64>() / n;

    // Most common non-empty colo, first-seen tiebreak.
    let mut colos: Vec<(&str, usize)> = Vec::new();
    for r in &successes {
        if let Some(c) = r.colo.as_deref() {
            if c.is_empty() {
                continue;
            }
            match colos.iter_mut().find(|(name, _)| *name == c) {
                Some((_, count)) => *count += 1,
                None => colos.push((c, 1)),
            }
        }
    }
    let mut colo: Option<(&str, usize)> = None;
    for (name, count) in &colos {
        if colo.map_or(true, |(_, best)| *count > best) {
            colo = Some((name, *count));
        }
    }
    let colo = colo.map(|(name, _)| name.to_string());

    ProbeOutcome {
        ok: true,
        http_status,
        connect_ms: avg(|r| r.connect_ms),
        tls_ms: avg(|r| r.tls_ms),
        ttfb_ms: avg(|r| r.ttfb_ms),
        total_ms: avg(|r| r.total_ms),
        colo,
        rounds_ok: successes.len() as u8,
    }
}

/// Parse the status code out of an HTTP/1.x status line.
fn parse_status(response: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(response.get(..response.len().min(64))?).ok()?;
    let line = text.lines().next()?;
    if !line.starts_with("HTTP/") {
        return None;
    }
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Extract `colo=XXX` from a `key=value` trace body. Missing colo is normal
/// for non-trace endpoints.
fn parse_colo(response: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(response);
    let body = match text.split_once("\r\n\r\n") {
        Some((_, body)) => body,
        None => return None,
    };
    for line in body.lines() {
        if let Some(value) = line.trim().strip_prefix("colo=") {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn ms_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn apply_deadline(tcp: &TcpStream, deadline: Instant) -> io::Result<()> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "round deadline"));
    }
    tcp.set_read_timeout(Some(remaining))?;
    tcp.set_write_timeout(Some(remaining))
}

/// Accepts any certificate chain; signatures are still verified with the
/// provider's algorithms so a broken handshake cannot masquerade as success.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
