//! Control-plane object shapes
//!
//! Only the fields the provider reads are modelled; everything else in
//! the plane's JSON is ignored.

use serde::{Deserialize, Deserializer, Serialize};

/// Objects that list commands can be filtered on by exact name
pub trait Named {
    fn name(&self) -> &str;
}

macro_rules! named {
    ($($ty:ty),* $(,)?) => {
        $(impl Named for $ty {
            fn name(&self) -> &str {
                &self.name
            }
        })*
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub isready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cpunumber: Option<u32>,
    /// Memory in MB
    #[serde(default)]
    pub memory: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskOffering {
    pub id: String,
    pub name: String,
    /// Size in GB; 0 for custom-size offerings
    #[serde(default, deserialize_with = "lenient_u64")]
    pub disksize: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkOffering {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpcOffering {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAcl {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vpc {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cidr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub vpcid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nic {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub networkid: Option<String>,
    #[serde(default)]
    pub ipaddress: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub nic: Vec<Nic>,
    #[serde(default)]
    pub publicip: Option<String>,
}

impl VirtualMachine {
    /// Address of the first NIC, if the plane has filled it in yet
    pub fn internal_ip(&self) -> Option<&str> {
        self.nic.first().and_then(|n| n.ipaddress.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub virtualmachineid: Option<String>,
    #[serde(default)]
    pub deviceid: Option<u32>,
    /// Size in bytes
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKeyPair {
    pub name: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicIpAddress {
    pub id: String,
    pub ipaddress: String,
    #[serde(default)]
    pub issourcenat: bool,
    #[serde(default)]
    pub isstaticnat: bool,
    #[serde(default)]
    pub virtualmachineid: Option<String>,
    #[serde(default)]
    pub associatednetworkid: Option<String>,
    #[serde(default)]
    pub vpcid: Option<String>,
}

named!(
    Zone,
    Project,
    Template,
    ServiceOffering,
    DiskOffering,
    NetworkOffering,
    VpcOffering,
    NetworkAcl,
    Vpc,
    Network,
    VirtualMachine,
    Volume,
    SshKeyPair,
);

/// Some plane versions send numbers as strings
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Str(String),
    }

    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
