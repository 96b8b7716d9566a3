use serde::Deserialize;

/// A reference to an instance already present in the routing directory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstanceAddr {
    pub host: String,
    pub port: u16,
}

impl InstanceAddr {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A brand-new instance, not yet in the directory, with its own credentials.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Endpoint {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Promotes the existing slave of an already-provisioned pair to primary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SwitchPair {
    pub master: InstanceAddr,
    pub slave: InstanceAddr,
}

/// Relocates one shard to new physical endpoints. Replication from the
/// origin to `dest_master` must already exist; this protocol does not copy
/// data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MigratePair {
    pub origin_master: InstanceAddr,
    pub dest_master: Endpoint,
    pub dest_slave: Option<Endpoint>,
}

/// The two cutover variants share one executor; they differ only in how the
/// staging and post-activation steps are populated.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CutoverPlan {
    Switch { pairs: Vec<SwitchPair> },
    Migrate { pairs: Vec<MigratePair> },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CutoverFlags {
    #[serde(default = "default_true")]
    pub check_active_clients: bool,
    #[serde(default = "default_true")]
    pub check_slave_delay: bool,
    #[serde(default)]
    pub verify_checksum: bool,
    /// Downgrades every health-check failure to a logged warning and skips
    /// the in-freeze re-verification.
    #[serde(default)]
    pub force: bool,
}

impl Default for CutoverFlags {
    fn default() -> Self {
        CutoverFlags {
            check_active_clients: true,
            check_slave_delay: true,
            verify_checksum: false,
            force: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CutoverRequest {
    pub plan: CutoverPlan,
    #[serde(default)]
    pub flags: CutoverFlags,
}
