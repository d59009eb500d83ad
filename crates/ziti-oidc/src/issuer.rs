//! Issuer host binding.
//!
//! A controller can listen on several interfaces and names. Each request is
//! bound to the issuer whose host and port match the address the client
//! connected to, so tokens never carry an issuer the client did not use.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use x509_parser::extensions::GeneralName;

/// Port assumed when an issuer or address omits one.
pub const DEFAULT_TLS_PORT: u16 = 443;

/// Path the OIDC API is served under.
pub const OIDC_PATH: &str = "/oidc";

/// Errors from parsing issuers or validating addresses against them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IssuerError {
    #[error("empty host")]
    Empty,

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("invalid host: {0}")]
    InvalidHost(String),

    #[error("port {actual} does not match issuer port {expected}")]
    PortMismatch { expected: u16, actual: u16 },

    #[error("host {actual} does not match issuer host {expected}")]
    HostMismatch { expected: String, actual: String },

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Host {
    Ip(IpAddr),
    /// Lowercased, without a trailing dot.
    Dns(String),
}

impl Host {
    fn parse(host: &str) -> Result<Self, IssuerError> {
        if host.is_empty() {
            return Err(IssuerError::Empty);
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(Self::Ip(ip));
        }

        let name = host.trim_end_matches('.').to_ascii_lowercase();
        let valid = !name.is_empty()
            && name.split('.').enumerate().all(|(i, label)| {
                (i == 0 && label == "*")
                    || (!label.is_empty()
                        && !label.starts_with('-')
                        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
            });
        if !valid {
            return Err(IssuerError::InvalidHost(host.to_string()));
        }
        Ok(Self::Dns(name))
    }

    fn is_localhost(&self) -> bool {
        matches!(self, Self::Dns(name) if name == "localhost")
    }

    fn is_loopback(&self) -> bool {
        matches!(self, Self::Ip(ip) if ip.is_loopback())
    }

    /// Hostname verification of `other` against this issuer host.
    fn matches(&self, other: &Host) -> bool {
        if self.is_localhost() && other.is_loopback() {
            return true;
        }
        match (self, other) {
            (Self::Ip(a), Self::Ip(b)) => a == b,
            (Self::Dns(pattern), Self::Dns(name)) => dns_matches(pattern, name),
            _ => false,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(IpAddr::V6(ip)) => write!(f, "[{ip}]"),
            Self::Ip(ip) => write!(f, "{ip}"),
            Self::Dns(name) => f.write_str(name),
        }
    }
}

fn dns_matches(pattern: &str, name: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return name
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix);
    }
    pattern == name
}

/// Splits `host[:port]`, accepting bracketed IPv6 and bare IPv6 literals.
fn split_host_port(value: &str) -> Result<(Host, u16), IssuerError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(IssuerError::Empty);
    }

    if let Some(rest) = value.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| IssuerError::InvalidHost(value.to_string()))?;
        let ip = host
            .parse::<IpAddr>()
            .map_err(|_| IssuerError::InvalidHost(host.to_string()))?;
        let port = match tail {
            "" => DEFAULT_TLS_PORT,
            _ => parse_port(
                tail.strip_prefix(':')
                    .ok_or_else(|| IssuerError::InvalidHost(value.to_string()))?,
            )?,
        };
        return Ok((Host::Ip(ip), port));
    }

    if let Ok(ip) = value.parse::<IpAddr>() {
        return Ok((Host::Ip(ip), DEFAULT_TLS_PORT));
    }

    match value.rsplit_once(':') {
        Some((host, port)) => Ok((Host::parse(host)?, parse_port(port)?)),
        None => Ok((Host::parse(value)?, DEFAULT_TLS_PORT)),
    }
}

fn parse_port(port: &str) -> Result<u16, IssuerError> {
    port.parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| IssuerError::InvalidPort(port.to_string()))
}

/// A `host:port` this controller answers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Issuer {
    host: Host,
    port: u16,
}

impl Issuer {
    /// Parses `host[:port]`. The port defaults to 443.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is empty or malformed, or the port is not
    /// a non-zero 16-bit number.
    pub fn parse(value: &str) -> Result<Self, IssuerError> {
        let (host, port) = split_host_port(value)?;
        Ok(Self { host, port })
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The host, with IPv6 addresses bracketed.
    #[must_use]
    pub fn host(&self) -> String {
        self.host.to_string()
    }

    /// The issuer URL placed in `iss`.
    #[must_use]
    pub fn url(&self) -> String {
        format!("https://{self}{OIDC_PATH}")
    }

    /// Checks that `addr` (`host[:port]`) is bound to this issuer.
    ///
    /// Ports must match exactly. IP issuers compare by address; DNS issuers
    /// use hostname verification, where a leading `*.` matches one label and
    /// `localhost` also matches loopback addresses.
    ///
    /// # Errors
    ///
    /// Returns an error if `addr` does not parse or does not match.
    pub fn validate_addr(&self, addr: &str) -> Result<(), IssuerError> {
        let (host, port) = split_host_port(addr)?;
        if port != self.port {
            return Err(IssuerError::PortMismatch {
                expected: self.port,
                actual: port,
            });
        }
        if !self.host.matches(&host) {
            return Err(IssuerError::HostMismatch {
                expected: self.host.to_string(),
                actual: host.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Issuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The issuers of one controller.
#[derive(Debug, Clone, Default)]
pub struct IssuerSet {
    issuers: Vec<Issuer>,
}

impl IssuerSet {
    #[must_use]
    pub fn new(issuers: Vec<Issuer>) -> Self {
        Self { issuers }
    }

    /// Parses every issuer string.
    ///
    /// # Errors
    ///
    /// Returns the first parse error.
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Result<Self, IssuerError> {
        values
            .iter()
            .map(|v| Issuer::parse(v.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    /// The first issuer `addr` is bound to.
    #[must_use]
    pub fn select(&self, addr: &str) -> Option<&Issuer> {
        self.issuers.iter().find(|i| i.validate_addr(addr).is_ok())
    }

    #[must_use]
    pub fn issuers(&self) -> &[Issuer] {
        &self.issuers
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty()
    }
}

/// Every `host[:port]` a client may use to reach the controller.
///
/// Combines each bind address with the certificate SAN DNS names and IPs on
/// every bind port. Hosts reached on port 443 are also listed bare, for
/// clients that drop the default port. Bind addresses that do not split
/// into host and port are skipped.
#[must_use]
pub fn possible_issuers(
    bind_addresses: &[String],
    san_dns: &[String],
    san_ips: &[IpAddr],
) -> Vec<String> {
    let mut issuers = BTreeSet::new();
    let mut ports = BTreeSet::new();

    for addr in bind_addresses {
        let Some((host, port)) = addr.rsplit_once(':') else {
            continue;
        };
        let Ok(port) = parse_port(port) else {
            continue;
        };
        ports.insert(port);
        if port == DEFAULT_TLS_PORT {
            issuers.insert(host.to_string());
        }
        issuers.insert(addr.clone());
    }

    let hosts = san_dns
        .iter()
        .cloned()
        .chain(san_ips.iter().map(|ip| match ip {
            IpAddr::V6(v6) => format!("[{v6}]"),
            IpAddr::V4(v4) => v4.to_string(),
        }));
    for host in hosts {
        for port in &ports {
            issuers.insert(format!("{host}:{port}"));
            if *port == DEFAULT_TLS_PORT {
                issuers.insert(host.clone());
            }
        }
    }

    issuers.into_iter().collect()
}

/// DNS names and IP addresses from a certificate's subject alternative names.
///
/// # Errors
///
/// Returns an error if the certificate does not parse.
pub fn cert_sans(der: &[u8]) -> Result<(Vec<String>, Vec<IpAddr>), IssuerError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| IssuerError::InvalidCertificate(e.to_string()))?;

    let mut dns = Vec::new();
    let mut ips = Vec::new();
    let san = cert
        .subject_alternative_name()
        .map_err(|e| IssuerError::InvalidCertificate(e.to_string()))?;
    if let Some(san) = san {
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(d) => dns.push((*d).to_string()),
                GeneralName::IPAddress(bytes) => {
                    if let Ok(octets) = <[u8; 4]>::try_from(*bytes) {
                        ips.push(IpAddr::from(octets));
                    } else if let Ok(octets) = <[u8; 16]>::try_from(*bytes) {
                        ips.push(IpAddr::from(octets));
                    }
                }
                _ => {}
            }
        }
    }
    Ok((dns, ips))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults_port() {
        let issuer = Issuer::parse("ctrl.example.com").unwrap();
        assert_eq!(issuer.port(), 443);
        assert_eq!(issuer.to_string(), "ctrl.example.com:443");
        assert_eq!(issuer.url(), "https://ctrl.example.com:443/oidc");

        let issuer = Issuer::parse("[::1]:1280").unwrap();
        assert_eq!(issuer.port(), 1280);
        assert_eq!(issuer.host(), "[::1]");

        assert_eq!(Issuer::parse("::1").unwrap().port(), 443);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Issuer::parse(""), Err(IssuerError::Empty));
        assert!(matches!(
            Issuer::parse("host:notaport"),
            Err(IssuerError::InvalidPort(_))
        ));
        assert!(matches!(Issuer::parse("host:0"), Err(IssuerError::InvalidPort(_))));
        assert!(matches!(
            Issuer::parse("bad_host:80"),
            Err(IssuerError::InvalidHost(_))
        ));
        assert!(matches!(Issuer::parse("[::1"), Err(IssuerError::InvalidHost(_))));
    }

    #[test]
    fn test_localhost_matches_loopback() {
        let issuer = Issuer::parse("localhost:443").unwrap();
        assert!(issuer.validate_addr("127.0.0.1:443").is_ok());
        assert!(issuer.validate_addr("[::1]:443").is_ok());
        assert!(issuer.validate_addr("localhost").is_ok());
        assert_eq!(
            issuer.validate_addr("localhost:8080"),
            Err(IssuerError::PortMismatch {
                expected: 443,
                actual: 8080
            })
        );
        assert!(issuer.validate_addr("10.0.0.1:443").is_err());
    }

    #[test]
    fn test_ip_issuer() {
        let issuer = Issuer::parse("10.0.0.5:1280").unwrap();
        assert!(issuer.validate_addr("10.0.0.5:1280").is_ok());
        assert!(issuer.validate_addr("10.0.0.6:1280").is_err());
        assert!(issuer.validate_addr("ctrl.example.com:1280").is_err());
    }

    #[test]
    fn test_loopback_ip_issuer_rejects_localhost_name() {
        let issuer = Issuer::parse("127.0.0.1:443").unwrap();
        assert!(issuer.validate_addr("127.0.0.1:443").is_ok());
        assert!(issuer.validate_addr("localhost:443").is_err());
        assert!(issuer.validate_addr("[::1]:443").is_err());
    }

    #[test]
    fn test_dns_issuer() {
        let issuer = Issuer::parse("Ctrl.Example.com:1280").unwrap();
        assert!(issuer.validate_addr("ctrl.example.COM.:1280").is_ok());
        assert!(issuer.validate_addr("other.example.com:1280").is_err());
        assert!(issuer.validate_addr("ctrl.example.com:1281").is_err());
    }

    #[test]
    fn test_wildcard_matches_one_label() {
        let issuer = Issuer::parse("*.example.com:443").unwrap();
        assert!(issuer.validate_addr("ctrl.example.com").is_ok());
        assert!(issuer.validate_addr("a.b.example.com").is_err());
        assert!(issuer.validate_addr("example.com").is_err());
    }

    #[test]
    fn test_issuer_set_select() {
        let set = IssuerSet::parse(&["ctrl.example.com:1280", "10.0.0.5:1280"]).unwrap();
        assert_eq!(
            set.select("10.0.0.5:1280").map(ToString::to_string),
            Some("10.0.0.5:1280".to_string())
        );
        assert!(set.select("10.0.0.5:443").is_none());
        assert!(IssuerSet::parse(&["bad host"]).is_err());
    }

    #[test]
    fn test_possible_issuers() {
        let issuers = possible_issuers(
            &["0.0.0.0:443".to_string(), "ctrl.example.com:1280".to_string(), "garbage".to_string()],
            &["ctrl.example.com".to_string()],
            &["10.0.0.5".parse().unwrap(), "::1".parse().unwrap()],
        );
        for expected in [
            "0.0.0.0",
            "0.0.0.0:443",
            "ctrl.example.com",
            "ctrl.example.com:443",
            "ctrl.example.com:1280",
            "10.0.0.5",
            "10.0.0.5:443",
            "10.0.0.5:1280",
            "[::1]:1280",
        ] {
            assert!(issuers.contains(&expected.to_string()), "missing {expected}");
        }
        assert!(!issuers.iter().any(|i| i == "garbage"));
        for issuer in &issuers {
            assert!(Issuer::parse(issuer).is_ok(), "{issuer} should parse");
        }
    }

    #[test]
    fn test_cert_sans() {
        let pem = include_str!("../tests/fixtures/rsa.crt");
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).unwrap();
        let (dns, ips) = cert_sans(&pem.contents).unwrap();
        assert_eq!(dns, vec!["ctrl.example.com"]);
        assert_eq!(ips, vec!["10.0.0.5".parse::<IpAddr>().unwrap()]);
    }
}
