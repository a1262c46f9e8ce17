use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of an OCPP-J link an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    ChargePoint,
    CentralSystem,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ChargePoint => "charge point",
            Role::CentralSystem => "central system",
        }
    }

    /// The role at the other end of the link.
    pub fn peer(&self) -> Role {
        match self {
            Role::ChargePoint => Role::CentralSystem,
            Role::CentralSystem => Role::ChargePoint,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
