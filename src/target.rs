//! Target parsing and validation.

use crate::ChannelError;
use std::fmt;
use std::net::IpAddr;

/// How a [`Target`]'s hostname is turned into endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    /// Resolve once at channel start; the endpoint set never changes.
    Static,
    /// Re-resolve on a periodic schedule; the endpoint set follows the
    /// addresses the name currently resolves to.
    Dynamic,
}

/// The symbolic name of the service a channel connects to.
///
/// Two forms are accepted:
///
/// * a plain `host:port`, which implies static one-shot resolution, and
/// * `dns:///host:port`, which implies periodic DNS resolution.
///
/// The hostname is validated when the target is built; a malformed target
/// is a configuration error surfaced before any call is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    hostname: String,
    port: u16,
    kind: ResolutionKind,
}

impl Target {
    /// Parse a target string, either `host:port` or `dns:///host:port`.
    pub fn parse(target: &str) -> Result<Self, ChannelError> {
        match target.split_once("://") {
            None => Self::from_parts(target_host(target)?, target_port(target)?),
            Some(("dns", rest)) => {
                let authority = rest.trim_start_matches('/');
                let target = Self::from_parts(target_host(authority)?, target_port(authority)?)?;
                Ok(target.with_kind(ResolutionKind::Dynamic))
            }
            Some((scheme, _)) => Err(ChannelError::Configuration(format!(
                "unsupported target scheme `{scheme}`"
            ))),
        }
    }

    /// Create a static [`Target`] from a valid `hostname` and `port`.
    ///
    /// This function will fail if the `hostname` is neither an IP address
    /// nor a valid domain name.
    pub fn from_parts<T: ToString>(hostname: T, port: u16) -> Result<Self, ChannelError> {
        let hostname = hostname.to_string();

        if hostname.parse::<IpAddr>().is_err() {
            hickory_resolver::Name::from_ascii(&hostname).map_err(|err| {
                ChannelError::Configuration(format!("invalid hostname `{hostname}`: {err}"))
            })?;
        }

        Ok(Self {
            hostname,
            port,
            kind: ResolutionKind::Static,
        })
    }

    fn with_kind(mut self, kind: ResolutionKind) -> Self {
        self.kind = kind;
        self
    }

    /// The `hostname` part of the target.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The `port` part of the target.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The resolution strategy the target implies.
    pub fn kind(&self) -> ResolutionKind {
        self.kind
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ResolutionKind::Static => write!(f, "{}:{}", self.hostname, self.port),
            ResolutionKind::Dynamic => write!(f, "dns:///{}:{}", self.hostname, self.port),
        }
    }
}

fn target_host(authority: &str) -> Result<&str, ChannelError> {
    let (host, _) = split_authority(authority)?;
    Ok(host)
}

fn target_port(authority: &str) -> Result<u16, ChannelError> {
    let (_, port) = split_authority(authority)?;
    port.parse().map_err(|_| {
        ChannelError::Configuration(format!("invalid port in target `{authority}`"))
    })
}

/// Split `host:port`, handling bracketed IPv6 literals (`[::1]:50051`).
fn split_authority(authority: &str) -> Result<(&str, &str), ChannelError> {
    let malformed =
        || ChannelError::Configuration(format!("target `{authority}` is not of the form host:port"));

    if let Some(rest) = authority.strip_prefix('[') {
        let (host, rest) = rest.split_once(']').ok_or_else(malformed)?;
        let port = rest.strip_prefix(':').ok_or_else(malformed)?;
        return Ok((host, port));
    }

    authority.rsplit_once(':').ok_or_else(malformed)
}

/// ```
/// let target = canale::Target::try_from(("localhost", 8090)).unwrap();
/// assert_eq!(target.hostname(), "localhost");
/// assert_eq!(target.port(), 8090);
/// ```
impl TryFrom<(&str, u16)> for Target {
    type Error = ChannelError;

    fn try_from((hostname, port): (&str, u16)) -> Result<Self, Self::Error> {
        Self::from_parts(hostname, port)
    }
}

/// ```
/// let target = canale::Target::try_from((String::from("localhost"), 8090)).unwrap();
/// assert_eq!(target.hostname(), "localhost");
/// assert_eq!(target.port(), 8090);
/// ```
impl TryFrom<(String, u16)> for Target {
    type Error = ChannelError;

    fn try_from((hostname, port): (String, u16)) -> Result<Self, Self::Error> {
        Self::from_parts(hostname, port)
    }
}

impl TryFrom<&str> for Target {
    type Error = ChannelError;

    fn try_from(target: &str) -> Result<Self, Self::Error> {
        Self::parse(target)
    }
}

impl TryFrom<String> for Target {
    type Error = ChannelError;

    fn try_from(target: String) -> Result<Self, Self::Error> {
        Self::parse(&target)
    }
}
