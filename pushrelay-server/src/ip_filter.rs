//! Address allow-list for the push endpoint.
//!
//! Matching is by textual prefix (`"10.0."` admits `10.0.5.2`), after
//! IPv4-mapped IPv6 peers are normalized to their IPv4 form. An empty list
//! admits everyone.

use std::net::IpAddr;

use crate::error::RelayError;

#[derive(Debug, Clone, Default)]
pub struct IpFilter {
    prefixes: Vec<String>,
}

impl IpFilter {
    pub fn new(prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.prefixes.is_empty()
    }

    pub fn permits(&self, addr: IpAddr) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let addr = normalize(addr).to_string();
        self.prefixes.iter().any(|p| addr.starts_with(p.as_str()))
    }

    pub fn check(&self, addr: IpAddr) -> Result<(), RelayError> {
        if self.permits(addr) {
            Ok(())
        } else {
            Err(RelayError::AccessDenied(normalize(addr)))
        }
    }
}

/// `::ffff:a.b.c.d` → `a.b.c.d`; everything else unchanged.
pub fn normalize(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}
