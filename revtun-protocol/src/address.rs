//! Tagged IPv4/IPv6 endpoint as carried in BUILD_TUNNEL
//!
//! ```text
//! ┌──────┬──────────────┬──────┐
//! │ ATYP │ ADDR         │ PORT │
//! │ 1    │ 4 or 16      │ 2    │
//! └──────┴──────────────┴──────┘
//! ```

use crate::constants::{ATYP_IPV4, ATYP_IPV6};
use crate::validation::ProtocolError;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// An IP endpoint. The address type is derived from the IP family, so the
/// byte length of the address always matches the declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(SocketAddr);

impl Address {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self(SocketAddr::new(ip, port))
    }

    /// Parse a textual `ip:port` (IPv6 in brackets). Host names are not
    /// resolved; the wire format only carries raw IP bytes.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        s.parse::<SocketAddr>()
            .map(Self)
            .map_err(|_| ProtocolError::InvalidAddress(s.to_string()))
    }

    /// Build an address from its wire parts.
    pub fn from_parts(atype: u8, ip: &[u8], port: u16) -> Result<Self, ProtocolError> {
        let ip = match atype {
            ATYP_IPV4 => {
                let octets: [u8; 4] = ip
                    .try_into()
                    .map_err(|_| ProtocolError::AddressLengthMismatch {
                        atype,
                        len: ip.len(),
                    })?;
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            ATYP_IPV6 => {
                let octets: [u8; 16] =
                    ip.try_into()
                        .map_err(|_| ProtocolError::AddressLengthMismatch {
                            atype,
                            len: ip.len(),
                        })?;
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => return Err(ProtocolError::UnknownAddressType(other)),
        };
        Ok(Self::new(ip, port))
    }

    pub fn atype(&self) -> u8 {
        match self.0 {
            SocketAddr::V4(_) => ATYP_IPV4,
            SocketAddr::V6(_) => ATYP_IPV6,
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Number of IP bytes for an address type, or `None` if the type is unknown.
    pub const fn ip_len(atype: u8) -> Option<usize> {
        match atype {
            ATYP_IPV4 => Some(4),
            ATYP_IPV6 => Some(16),
            _ => None,
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl From<Address> for SocketAddr {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let addr = Address::parse("127.0.0.1:9100").unwrap();
        assert_eq!(addr.atype(), ATYP_IPV4);
        assert_eq!(addr.port(), 9100);
        assert_eq!(addr.to_string(), "127.0.0.1:9100");
    }

    #[test]
    fn test_parse_ipv6() {
        let addr = Address::parse("[fe80::ba97:5aff:fe9e:4abf]:443").unwrap();
        assert_eq!(addr.atype(), ATYP_IPV6);
        assert_eq!(addr.port(), 443);
    }

    #[test]
    fn test_parse_rejects_hostnames() {
        assert!(Address::parse("localhost:80").is_err());
        assert!(Address::parse("127.0.0.1").is_err());
        assert!(Address::parse("127.0.0.1:70000").is_err());
    }

    #[test]
    fn test_from_parts_length_mismatch() {
        assert!(matches!(
            Address::from_parts(ATYP_IPV4, &[0; 16], 80),
            Err(ProtocolError::AddressLengthMismatch { len: 16, .. })
        ));
        assert!(matches!(
            Address::from_parts(ATYP_IPV6, &[0; 4], 80),
            Err(ProtocolError::AddressLengthMismatch { len: 4, .. })
        ));
        assert!(matches!(
            Address::from_parts(0x03, &[0; 4], 80),
            Err(ProtocolError::UnknownAddressType(0x03))
        ));
    }
}
