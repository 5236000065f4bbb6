//! Account information the server may return alongside a token pair

use serde::{Deserialize, Serialize};

/// Account role understood by the remote API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    #[default]
    Patient,
    Doctor,
    Pharmacist,
    LabTechnician,
    Vendor,
    Admin,
}

/// The signed-in account, kept in memory only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_type: Option<UserType>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}
