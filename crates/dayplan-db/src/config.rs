use std::env;

/// Database configuration.
///
/// Reads from the `DAYPLAN_DATABASE_URL` environment variable, falling back to
/// `postgresql://localhost:5432/dayplan` when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
}

impl DbConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/dayplan";

    /// Environment variable consulted by [`DbConfig::from_env`].
    pub const ENV_VAR: &str = "DAYPLAN_DATABASE_URL";

    pub fn from_env() -> Self {
        let database_url =
            env::var(Self::ENV_VAR).unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self { database_url }
    }

    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    /// The database name, i.e. the last path segment of the URL.
    pub fn database_name(&self) -> Option<&str> {
        self.database_url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty() && !s.contains(':'))
    }

    /// URL of the `postgres` maintenance database on the same server, used
    /// to issue `CREATE DATABASE`.
    pub fn maintenance_url(&self) -> String {
        self.with_database("postgres")
    }

    /// Same server, different database.
    pub fn with_database(&self, name: &str) -> String {
        match self.database_url.rfind('/') {
            Some(pos) => format!("{}/{name}", &self.database_url[..pos]),
            None => self.database_url.clone(),
        }
    }

    /// The URL with any password replaced by `***`, safe for log output.
    pub fn redacted_url(&self) -> String {
        let Some(scheme_end) = self.database_url.find("://") else {
            return self.database_url.clone();
        };
        let rest = &self.database_url[scheme_end + 3..];
        let Some(at) = rest.find('@') else {
            return self.database_url.clone();
        };
        let userinfo = &rest[..at];
        match userinfo.find(':') {
            Some(colon) => format!(
                "{}{}:***{}",
                &self.database_url[..scheme_end + 3],
                &userinfo[..colon],
                &rest[at..]
            ),
            None => self.database_url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url() {
        let cfg = DbConfig::new(DbConfig::DEFAULT_URL);
        assert_eq!(cfg.database_url, "postgresql://localhost:5432/dayplan");
        assert_eq!(cfg.database_name(), Some("dayplan"));
    }

    #[test]
    fn maintenance_url_replaces_db() {
        let cfg = DbConfig::new("postgresql://localhost:5432/dayplan");
        assert_eq!(cfg.maintenance_url(), "postgresql://localhost:5432/postgres");
    }

    #[test]
    fn database_name_missing() {
        let cfg = DbConfig::new("postgresql://localhost:5432/");
        assert_eq!(cfg.database_name(), None);
    }

    #[test]
    fn redacts_password() {
        let cfg = DbConfig::new("postgresql://app:s3cret@db:5432/dayplan");
        assert_eq!(cfg.redacted_url(), "postgresql://app:***@db:5432/dayplan");

        let no_password = DbConfig::new("postgresql://app@db:5432/dayplan");
        assert_eq!(no_password.redacted_url(), no_password.database_url);
    }
}
