//! Which side of a link this node plays

use std::fmt;
use std::str::FromStr;

use crate::error::NetError;

/// Role of the local node when establishing a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Actively dial the remote node
    Connect,
    /// Bind and wait for remote nodes
    Listen,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Listen => "listen",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect" => Ok(Self::Connect),
            "listen" => Ok(Self::Listen),
            other => Err(NetError::InvalidRole(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roles() {
        assert_eq!("connect".parse::<Role>().unwrap(), Role::Connect);
        assert_eq!("listen".parse::<Role>().unwrap(), Role::Listen);
        assert_eq!(Role::Listen.to_string(), "listen");
    }

    #[test]
    fn test_invalid_role() {
        let err = "bind".parse::<Role>().unwrap_err();
        assert!(matches!(err, NetError::InvalidRole(ref r) if r == "bind"));
        assert!("Listen".parse::<Role>().is_err());
    }
}
