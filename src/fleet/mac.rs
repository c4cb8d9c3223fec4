//! MAC Address Generation
//!
//! Interfaces get random locally-administered unicast addresses so they can
//! never collide with vendor-assigned hardware addresses.

use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

const MULTICAST_BIT: u8 = 0x01;
const LOCAL_BIT: u8 = 0x02;

/// 48-bit MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Random address with the locally-administered bit set and the
    /// multicast bit clear
    pub fn random_local<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut octets: [u8; 6] = rng.gen();
        octets[0] = (octets[0] & !MULTICAST_BIT) | LOCAL_BIT;
        Self(octets)
    }

    /// `count` distinct random local addresses
    pub fn random_local_set<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<Self> {
        let mut macs: Vec<Self> = Vec::with_capacity(count);
        while macs.len() < count {
            let mac = Self::random_local(rng);
            if !macs.contains(&mac) {
                macs.push(mac);
            }
        }
        macs
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_local(&self) -> bool {
        self.0[0] & LOCAL_BIT != 0
    }

    pub fn is_unicast(&self) -> bool {
        self.0[0] & MULTICAST_BIT == 0
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl std::str::FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Configuration(format!("invalid MAC address: {}", s));

        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_addresses_are_local_unicast() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let mac = MacAddress::random_local(&mut rng);
            assert!(mac.is_local(), "{} is not local", mac);
            assert!(mac.is_unicast(), "{} is multicast", mac);
        }
    }

    #[test]
    fn test_display_and_parse() {
        let mac = MacAddress::new([0x52, 0x54, 0x00, 0xab, 0x0c, 0xff]);
        assert_eq!(mac.to_string(), "52:54:00:ab:0c:ff");
        assert_eq!("52:54:00:ab:0c:ff".parse::<MacAddress>().unwrap(), mac);
        assert!("52:54:00:ab:0c".parse::<MacAddress>().is_err());
        assert!("52:54:00:ab:0c:ff:01".parse::<MacAddress>().is_err());
        assert!("52:54:00:ab:0c:zz".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_set_is_distinct() {
        let mut rng = StdRng::seed_from_u64(42);
        let macs = MacAddress::random_local_set(&mut rng, 8);
        assert_eq!(macs.len(), 8);
        for (i, a) in macs.iter().enumerate() {
            for b in &macs[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_serde_as_string() {
        let mac = MacAddress::new([0x02, 0, 0, 0, 0, 1]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"02:00:00:00:00:01\"");
        let back: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }
}
