//! `NetworkIdentity` — the `(Role, UUID)` pair every process presents.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// The kind of process a [`NetworkIdentity`] belongs to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    Shard,
    Coordinator,
    Proxy,
    Client,
    Observer,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::Shard => "shard",
            Role::Coordinator => "coordinator",
            Role::Proxy => "proxy",
            Role::Client => "client",
            Role::Observer => "observer",
        }
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shard" => Ok(Role::Shard),
            "coordinator" => Ok(Role::Coordinator),
            "proxy" => Ok(Role::Proxy),
            "client" => Ok(Role::Client),
            "observer" => Ok(Role::Observer),
            other => Err(CoreError::UnknownRole(other.to_string())),
        }
    }
}

/// Stable identity of a process: its role plus a UUID minted at process
/// start. Equality and hashing cover both fields.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NetworkIdentity {
    pub role: Role,
    pub uuid: Uuid,
}

impl NetworkIdentity {
    pub fn new(role: Role, uuid: Uuid) -> Self {
        Self { role, uuid }
    }

    /// Mint a fresh identity for the given role, generating a random UUID.
    pub fn generate(role: Role) -> Self {
        Self {
            role,
            uuid: Uuid::new_v4(),
        }
    }

    /// The claim key used as the hash field in `Heuristic_Bounds_Claimed`
    /// and as the lease-key ordering input: the stringified identity.
    pub fn claim_key(&self) -> String {
        self.to_string()
    }
}

/// Wire/claim-key presentation is the opaque UTF-8 string `"<role> <uuid>"`,
/// matching the identity handshake described for the transport layer.
impl fmt::Display for NetworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.role.as_str(), self.uuid)
    }
}

impl FromStr for NetworkIdentity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, ' ');
        let role = parts
            .next()
            .ok_or_else(|| CoreError::MalformedIdentity(s.to_string()))?;
        let uuid = parts
            .next()
            .ok_or_else(|| CoreError::MalformedIdentity(s.to_string()))?;
        let role: Role = role.parse()?;
        let uuid = Uuid::parse_str(uuid).map_err(|e| CoreError::MalformedIdentity(e.to_string()))?;
        Ok(NetworkIdentity { role, uuid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_display_parse() {
        let id = NetworkIdentity::generate(Role::Shard);
        let s = id.to_string();
        let parsed: NetworkIdentity = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_unknown_role() {
        let bad = format!("wizard {}", Uuid::new_v4());
        assert!(bad.parse::<NetworkIdentity>().is_err());
    }

    #[test]
    fn claim_key_is_display() {
        let id = NetworkIdentity::generate(Role::Coordinator);
        assert_eq!(id.claim_key(), id.to_string());
    }
}
