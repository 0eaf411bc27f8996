//! Role Model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::decode::DecodeError;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Driver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Driver => "driver",
        }
    }

    /// Login surface a rejected session of this role is sent back to
    pub fn login_route(&self) -> &'static str {
        match self {
            Role::Admin => "/admin/login",
            Role::Driver => "/driver/login",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" | "administrator" => Ok(Role::Admin),
            "driver" => Ok(Role::Driver),
            other => Err(DecodeError::invalid(
                "user",
                "role",
                format!("unknown role `{other}`"),
            )),
        }
    }
}
