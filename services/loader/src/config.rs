use std::fmt;

/// Warehouse session settings, read once from the environment
///
/// Nothing here is validated or defaulted. An absent setting stays `None`
/// and shows up later as a connection failure.
#[derive(Clone, Default)]
pub struct WarehouseSettings {
    pub account: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
}

impl WarehouseSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (`ACCOUNT`, `USER`, ...).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            account: lookup("ACCOUNT"),
            user: lookup("USER"),
            password: lookup("PASSWORD"),
            database: lookup("DATABASE"),
            schema: lookup("SCHEMA"),
            warehouse: lookup("WAREHOUSE"),
            role: lookup("ROLE"),
        }
    }
}

impl fmt::Debug for WarehouseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseSettings")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("warehouse", &self.warehouse)
            .field("role", &self.role)
            .finish()
    }
}
