//! Database vendor and version identification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Database server vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Mysql,
    Percona,
    Mariadb,
    Unknown,
}

impl Vendor {
    fn as_str(&self) -> &'static str {
        match self {
            Vendor::Mysql => "mysql",
            Vendor::Percona => "percona",
            Vendor::Mariadb => "mariadb",
            Vendor::Unknown => "unknown",
        }
    }
}

/// A vendor plus version triple, e.g. `mysql:8.0.36`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flavor {
    pub vendor: Vendor,
    pub version: (u32, u32, u32),
}

impl Flavor {
    pub const UNKNOWN: Flavor = Flavor {
        vendor: Vendor::Unknown,
        version: (0, 0, 0),
    };

    pub fn new(vendor: Vendor, major: u32, minor: u32, patch: u32) -> Self {
        Self {
            vendor,
            version: (major, minor, patch),
        }
    }

    /// Parse a flavor string such as `mysql:8.0`, `mariadb:10.11.6` or `percona:5.7`.
    pub fn parse(s: &str) -> Self {
        let (vendor_str, version_str) = match s.trim().split_once(':') {
            Some((v, ver)) => (v, ver),
            None => (s.trim(), ""),
        };
        let vendor = match vendor_str.to_lowercase().as_str() {
            "mysql" => Vendor::Mysql,
            "percona" | "percona/percona-server" => Vendor::Percona,
            "mariadb" => Vendor::Mariadb,
            _ => return Self::UNKNOWN,
        };
        Self {
            vendor,
            version: parse_version(version_str),
        }
    }

    /// Identify the flavor from `SELECT @@version, @@version_comment`.
    pub fn from_server_version(version: &str, comment: &str) -> Self {
        let lower_version = version.to_lowercase();
        let lower_comment = comment.to_lowercase();
        let vendor = if lower_version.contains("mariadb") || lower_comment.contains("mariadb") {
            Vendor::Mariadb
        } else if lower_comment.contains("percona") {
            Vendor::Percona
        } else if lower_comment.contains("mysql") || !version.is_empty() {
            Vendor::Mysql
        } else {
            Vendor::Unknown
        };
        Self {
            vendor,
            version: parse_version(version),
        }
    }

    pub fn is_mariadb(&self) -> bool {
        self.vendor == Vendor::Mariadb
    }

    pub fn known(&self) -> bool {
        self.vendor != Vendor::Unknown
    }

    /// True if this flavor's version is at least `major.minor`.
    pub fn min(&self, major: u32, minor: u32) -> bool {
        (self.version.0, self.version.1) >= (major, minor)
    }

    /// Docker image reference for this flavor.
    pub fn docker_image(&self) -> String {
        let repo = match self.vendor {
            Vendor::Percona => "percona/percona-server",
            other => other.as_str(),
        };
        if self.version.2 > 0 {
            format!(
                "{}:{}.{}.{}",
                repo, self.version.0, self.version.1, self.version.2
            )
        } else {
            format!("{}:{}.{}", repo, self.version.0, self.version.1)
        }
    }

    /// Deterministic container name for this flavor's image.
    pub fn container_name(&self) -> String {
        let image = self.docker_image();
        let suffix: String = image
            .chars()
            .map(|c| match c {
                ':' | '/' => '-',
                c => c,
            })
            .collect();
        format!("mysql-schema-push-{}", suffix)
    }
}

impl Default for Flavor {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}.{}.{}",
            self.vendor.as_str(),
            self.version.0,
            self.version.1,
            self.version.2
        )
    }
}

fn parse_version(s: &str) -> (u32, u32, u32) {
    // "10.11.6-MariaDB-1:10.11.6+maria~ubu2204" -> (10, 11, 6)
    let numeric = s
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .next()
        .unwrap_or("");
    let mut parts = numeric.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flavor_string() {
        let f = Flavor::parse("mysql:8.0");
        assert_eq!(f.vendor, Vendor::Mysql);
        assert_eq!(f.version, (8, 0, 0));

        let f = Flavor::parse("mariadb:10.11.6");
        assert!(f.is_mariadb());
        assert_eq!(f.version, (10, 11, 6));

        assert!(!Flavor::parse("oracle:19").known());
    }

    #[test]
    fn test_from_server_version() {
        let f = Flavor::from_server_version("10.6.16-MariaDB-1:10.6.16+maria~ubu2004", "mariadb.org binary distribution");
        assert!(f.is_mariadb());
        assert_eq!(f.version, (10, 6, 16));

        let f = Flavor::from_server_version("8.0.36", "MySQL Community Server - GPL");
        assert_eq!(f.vendor, Vendor::Mysql);
        assert!(f.min(8, 0));
        assert!(!f.min(8, 1));

        let f = Flavor::from_server_version("5.7.44-48", "Percona Server (GPL), Release 48");
        assert_eq!(f.vendor, Vendor::Percona);
        assert!(!f.is_mariadb());
    }

    #[test]
    fn test_container_name_is_deterministic() {
        let f = Flavor::parse("mysql:8.0");
        assert_eq!(f.docker_image(), "mysql:8.0");
        assert_eq!(f.container_name(), "mysql-schema-push-mysql-8.0");

        let p = Flavor::parse("percona:5.7");
        assert_eq!(p.container_name(), "mysql-schema-push-percona-percona-server-5.7");
    }
}
