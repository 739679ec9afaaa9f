//! The `addr` payload: known peer endpoints with freshness stamps.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use crate::io::{BinReader, BinWriter, Decodable, Encodable, IoResult};

/// One advertised endpoint. IPv4 addresses travel in their IPv6-mapped
/// form inside the fixed 16-byte field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrWithTime {
    pub timestamp: u32,
    pub services: u64,
    pub ip: [u8; 16],
    pub port: u16,
}

impl AddrWithTime {
    pub fn new(addr: SocketAddr, timestamp: u32) -> Self {
        let ip = match addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        AddrWithTime {
            timestamp,
            services: super::version::NODE_PEER_SERVICE,
            ip,
            port: addr.port(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        let v6 = Ipv6Addr::from(self.ip);
        match v6.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), self.port),
            None => SocketAddr::new(IpAddr::V6(v6), self.port),
        }
    }
}

impl Encodable for AddrWithTime {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_u32_le(self.timestamp)?;
        w.write_u64_le(self.services)?;
        w.write_bytes(&self.ip)?;
        w.write_u16_le(self.port)
    }
}

impl Decodable for AddrWithTime {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        let timestamp = r.read_u32_le()?;
        let services = r.read_u64_le()?;
        let mut ip = [0u8; 16];
        r.read_into(&mut ip)?;
        Ok(AddrWithTime {
            timestamp,
            services,
            ip,
            port: r.read_u16_le()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressList {
    pub addrs: Vec<AddrWithTime>,
}

impl Encodable for AddressList {
    fn encode_binary(&self, w: &mut BinWriter) -> IoResult<()> {
        w.write_array(&self.addrs)
    }
}

impl Decodable for AddressList {
    fn decode_binary(r: &mut BinReader<'_>) -> IoResult<Self> {
        Ok(AddressList {
            addrs: r.read_array()?,
        })
    }
}
