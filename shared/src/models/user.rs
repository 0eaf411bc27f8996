//! User Model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::role::Role;
use crate::decode::{self, DecodeError};

const RECORD: &str = "user";

/// Driver profile nested under a user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverProfileRecord {
    #[serde(default)]
    pub id: Option<Value>,
}

/// User as returned by `auth/login` and `profile`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub driver_id: Option<Value>,
    #[serde(default)]
    pub driver: Option<DriverProfileRecord>,
}

/// Authenticated account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Role,
    /// Driver profile id, when the backend keeps it apart from the user id
    pub driver_id: Option<String>,
}

impl UserInfo {
    /// Identifier used for driver-scoped lookups
    pub fn driver_key(&self) -> &str {
        self.driver_id.as_deref().unwrap_or(&self.id)
    }
}

impl TryFrom<UserRecord> for UserInfo {
    type Error = DecodeError;

    fn try_from(record: UserRecord) -> Result<Self, Self::Error> {
        let id = decode::id(
            decode::required(record.id.as_ref(), RECORD, "id")?,
            RECORD,
            "id",
        )?;
        let role: Role = decode::required(decode::text(record.role), RECORD, "role")?.parse()?;
        let driver_id = match decode::optional_id(record.driver_id.as_ref(), RECORD, "driver_id")? {
            Some(id) => Some(id),
            None => match record.driver.as_ref() {
                Some(driver) => decode::optional_id(driver.id.as_ref(), RECORD, "driver.id")?,
                None => None,
            },
        };
        let email = decode::text(record.email);
        let name = decode::text(record.name)
            .or_else(|| email.clone())
            .unwrap_or_else(|| format!("{role} #{id}"));

        Ok(Self {
            id,
            name,
            email,
            phone: decode::text(record.phone),
            role,
            driver_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_driver_user() {
        let record: UserRecord = serde_json::from_value(json!({
            "id": 7,
            "name": "Budi",
            "email": "budi@example.com",
            "role": "driver",
            "driver": {"id": 3}
        }))
        .unwrap();
        let user = UserInfo::try_from(record).unwrap();
        assert_eq!(user.id, "7");
        assert_eq!(user.role, Role::Driver);
        assert_eq!(user.driver_id.as_deref(), Some("3"));
        assert_eq!(user.driver_key(), "3");
    }

    #[test]
    fn test_driver_key_falls_back_to_user_id() {
        let record: UserRecord =
            serde_json::from_value(json!({"id": "u-1", "role": "driver"})).unwrap();
        let user = UserInfo::try_from(record).unwrap();
        assert_eq!(user.driver_key(), "u-1");
        assert_eq!(user.name, "driver #u-1");
    }

    #[test]
    fn test_missing_role_is_error() {
        let record: UserRecord = serde_json::from_value(json!({"id": 1})).unwrap();
        assert_eq!(
            UserInfo::try_from(record),
            Err(DecodeError::missing("user", "role"))
        );
    }
}
