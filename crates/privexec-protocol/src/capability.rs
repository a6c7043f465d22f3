//! Capability descriptors advertised by the broker.

use serde::{Deserialize, Serialize};

/// Name under which brokers expose process creation. It is not part of the
/// broker's public interface and only shows up when hidden capabilities are
/// requested.
pub const NEW_PROCESS_CAPABILITY: &str = "new_process";

/// Parameter types a capability can declare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    StringArray,
    Int,
    Bool,
}

/// Return types a capability can declare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReturnType {
    Void,
    Int,
    String,
    RemoteProcess,
}

/// Parameter list plus return type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ParamType>,
    pub returns: ReturnType,
}

impl Signature {
    /// `(string[] cmd, string[] env, string dir) -> remote_process`
    pub fn new_process() -> Self {
        Self {
            params: vec![ParamType::StringArray, ParamType::StringArray, ParamType::String],
            returns: ReturnType::RemoteProcess,
        }
    }
}

/// One entry of a `capabilities` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub signature: Signature,
    /// Not part of the broker's stable interface.
    #[serde(default)]
    pub hidden: bool,
}

impl CapabilityDescriptor {
    /// True if this descriptor has exactly the given name and signature.
    pub fn matches(&self, name: &str, signature: &Signature) -> bool {
        self.name == name && &self.signature == signature
    }
}
