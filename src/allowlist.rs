//! Source address allow-listing for inbound webhooks.

use std::net::IpAddr;
use std::str::FromStr;

/// Address ranges YooKassa publishes for outgoing notifications.
pub const YOOKASSA_RANGES: &[&str] = &[
    "185.71.76.0/27",
    "185.71.77.0/27",
    "77.75.153.0/25",
    "77.75.156.11",
    "77.75.156.35",
    "77.75.154.128/25",
    "2a02:5180::/32",
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid address range `{0}`")]
pub struct InvalidRange(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn mask_u32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn mask_u128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl FromStr for IpRange {
    type Err = InvalidRange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || InvalidRange(s.to_string());
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(IpRange { network, prefix })
    }
}

#[derive(Debug, Clone, Default)]
pub struct IpAllowList {
    ranges: Vec<IpRange>,
}

impl IpAllowList {
    pub fn parse<'a, I>(entries: I) -> Result<Self, InvalidRange>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ranges = entries
            .into_iter()
            .filter(|e| !e.trim().is_empty())
            .map(str::parse::<IpRange>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ranges })
    }

    pub fn yookassa() -> Self {
        // The built-in list is static and always parses.
        Self::parse(YOOKASSA_RANGES.iter().copied()).unwrap_or_default()
    }

    pub fn allows(&self, addr: IpAddr) -> bool {
        self.ranges.iter().any(|r| r.contains(addr))
    }
}
