//! Provider IDs ↔ cloud instance IDs.
//!
//! A provider ID is the string Kubernetes uses to name a node:
//! `exoscale://` followed by the instance UUID in canonical form
//! (lowercase, hyphenated). Parsing is strict so that re-emitting a parsed
//! ID always yields the input.

use std::fmt;
use std::str::FromStr;

use exoscale_api::Instance;
use uuid::Uuid;

use crate::cache::Snapshot;
use crate::error::{Error, Result};

pub const PROVIDER_ID_SCHEME: &str = "exoscale";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderId {
    raw: String,
    instance: Uuid,
}

impl ProviderId {
    pub fn parse(input: &str) -> Result<Self> {
        let format_err = |reason: &str| Error::Format {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| format_err("missing scheme"))?;
        if scheme != PROVIDER_ID_SCHEME {
            return Err(format_err(&format!("unknown scheme {scheme:?}")));
        }
        let instance =
            Uuid::try_parse(rest).map_err(|e| format_err(&format!("invalid instance uuid: {e}")))?;
        if instance.hyphenated().to_string() != rest {
            return Err(format_err("instance uuid is not in canonical form"));
        }

        Ok(Self {
            raw: input.to_string(),
            instance,
        })
    }

    /// Build the provider ID for a cloud instance id.
    pub fn for_instance(instance_id: &str) -> Result<Self> {
        Self::parse(&format!("{PROVIDER_ID_SCHEME}://{instance_id}"))
    }

    pub fn instance_id(&self) -> String {
        self.instance.hyphenated().to_string()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for ProviderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Outcome of looking a provider ID up in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    Member(&'a Instance),
    /// The instance is not in the snapshot.
    Gone,
}

pub fn resolve<'a>(snapshot: &'a Snapshot, id: &ProviderId) -> Resolution<'a> {
    match snapshot.instance(&id.instance_id()) {
        Some(instance) => Resolution::Member(instance),
        None => Resolution::Gone,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exoscale_api::ErrorKind;

    const ID: &str = "exoscale://8a4ab3c5-2a0c-4b3b-9d7a-0f2b3c4d5e6f";

    #[test]
    fn parse_then_display_is_identity() {
        let pid = ProviderId::parse(ID).unwrap();
        assert_eq!(pid.to_string(), ID);
        assert_eq!(pid.instance_id(), "8a4ab3c5-2a0c-4b3b-9d7a-0f2b3c4d5e6f");
        assert_eq!(ProviderId::for_instance(&pid.instance_id()).unwrap(), pid);
    }

    #[test]
    fn rejects_malformed_ids() {
        for input in [
            "8a4ab3c5-2a0c-4b3b-9d7a-0f2b3c4d5e6f",
            "aws://8a4ab3c5-2a0c-4b3b-9d7a-0f2b3c4d5e6f",
            "exoscale://not-a-uuid",
            "exoscale://8A4AB3C5-2A0C-4B3B-9D7A-0F2B3C4D5E6F",
            "exoscale://8a4ab3c52a0c4b3b9d7a0f2b3c4d5e6f",
            "",
        ] {
            let err = ProviderId::parse(input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Format, "input {input:?}");
        }
    }

    #[test]
    fn from_str_matches_parse() {
        let pid: ProviderId = ID.parse().unwrap();
        assert_eq!(pid.as_str(), ID);
    }
}
