use crate::RoutingError;
use shared::sql::Row;
use std::fmt;
use std::str::FromStr;

/// The role a directory row plays, encoded in its shard name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardRole {
    /// Primary backend of a shard: "shard<NNNN>"
    Master,
    /// Standby backend of a shard: "shard<NNNN>_slave"
    Slave,
    /// Query-routing proxy: "proxy<NN>"
    Proxy,
    /// Read-only standby of a proxy: "proxy<NN>_slave"
    ProxySlave,
}

impl ShardRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ShardRole::Master => "primary shard",
            ShardRole::Slave => "slave shard",
            ShardRole::Proxy => "proxy",
            ShardRole::ProxySlave => "proxy slave",
        }
    }
}

/// A parsed shard name. The raw spelling is kept because it is the key used
/// in directory mutation statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardName {
    raw: String,
    pub role: ShardRole,
    pub index: u32,
}

impl ShardName {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Name of the slave row paired with this master row.
    pub fn slave_name(&self) -> String {
        format!("{}_slave", self.raw)
    }
}

impl fmt::Display for ShardName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ShardName {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, is_slave) = match s.strip_suffix("_slave") {
            Some(base) => (base, true),
            None => (s, false),
        };

        let (digits, role) = if let Some(digits) = base.strip_prefix("shard") {
            let role = if is_slave {
                ShardRole::Slave
            } else {
                ShardRole::Master
            };
            (digits, role)
        } else if let Some(digits) = base.strip_prefix("proxy") {
            let role = if is_slave {
                ShardRole::ProxySlave
            } else {
                ShardRole::Proxy
            };
            (digits, role)
        } else {
            return Err(RoutingError::InvalidShardName(s.to_string()));
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RoutingError::InvalidShardName(s.to_string()));
        }

        let index = digits
            .parse()
            .map_err(|_| RoutingError::InvalidShardName(s.to_string()))?;

        Ok(ShardName {
            raw: s.to_string(),
            role,
            index,
        })
    }
}

/// One row of the routing directory. Created at cluster bootstrap and only
/// ever mutated, never deleted, by a cutover.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardRoute {
    pub name: ShardName,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub wrapper: String,
}

impl ShardRoute {
    pub fn from_row(row: &Row) -> Result<Self, RoutingError> {
        let get = |column: &'static str| -> Result<&str, RoutingError> {
            row.get(column).ok_or(RoutingError::MissingColumn(column))
        };

        let name: ShardName = get("name")?.parse()?;
        let port_raw = get("port")?;
        let port = port_raw.parse().map_err(|_| RoutingError::InvalidPort {
            name: name.to_string(),
            port: port_raw.to_string(),
        })?;

        Ok(ShardRoute {
            host: get("host")?.to_string(),
            username: get("user")?.to_string(),
            password: get("password")?.to_string(),
            wrapper: get("wrapper")?.to_string(),
            port,
            name,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_name_roles() {
        let name: ShardName = "shard0003".parse().unwrap();
        assert_eq!(name.role, ShardRole::Master);
        assert_eq!(name.index, 3);
        assert_eq!(name.slave_name(), "shard0003_slave");

        let name: ShardName = "shard0003_slave".parse().unwrap();
        assert_eq!(name.role, ShardRole::Slave);
        assert_eq!(name.index, 3);

        let name: ShardName = "proxy01".parse().unwrap();
        assert_eq!(name.role, ShardRole::Proxy);
        assert_eq!(name.index, 1);

        let name: ShardName = "proxy01_slave".parse().unwrap();
        assert_eq!(name.role, ShardRole::ProxySlave);
    }

    #[test]
    fn test_shard_name_rejects_malformed() {
        for bad in ["", "shard", "shardx1", "node01", "shard01_standby_slave"] {
            assert!(
                bad.parse::<ShardName>().is_err(),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_route_from_row() {
        let row = Row::new()
            .with("name", "shard0001")
            .with("host", "10.0.0.1")
            .with("port", "3306")
            .with("user", "shard_rw")
            .with("password", "secret")
            .with("wrapper", "mysql");

        let route = ShardRoute::from_row(&row).unwrap();
        assert_eq!(route.name.role, ShardRole::Master);
        assert_eq!(route.addr(), "10.0.0.1:3306");

        let missing = Row::new().with("name", "shard0001");
        assert!(matches!(
            ShardRoute::from_row(&missing),
            Err(RoutingError::MissingColumn("host"))
        ));
    }
}
