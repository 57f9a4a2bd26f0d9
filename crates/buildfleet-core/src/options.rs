//! Build option bag: the key/value configuration identifying one build
//! slot, carried by every build invocation.

use std::collections::BTreeMap;

use crate::doc;
use crate::error::{FleetError, Result};

/// Document tag for the options element.
const OPTIONS_TAG: &str = "Options";

/// Build configuration for one invocation.
///
/// The well-known fields drive status-path derivation; anything else the
/// pipeline wants to carry rides in `extra` and round-trips through the
/// document form untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Root of the shared result tree on network storage.
    pub result_root: String,
    pub arch: String,
    pub config: String,
    /// Hardware class the build targets (a specific sku, or `builder`).
    pub hardware: String,
    /// Shard tag; `"0"` means unsharded.
    pub shard: String,
    /// Scheduling class (`developer`, `percheckin`, `daily`).
    pub build_type: String,
    /// Additional key/value configuration.
    pub extra: BTreeMap<String, String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            result_root: "results".to_string(),
            arch: "x86_64".to_string(),
            config: "debug".to_string(),
            hardware: "builder".to_string(),
            shard: "0".to_string(),
            build_type: "developer".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

impl BuildOptions {
    /// All attributes, well-known and extra, as one sorted map.
    pub fn to_attrs(&self) -> BTreeMap<String, String> {
        let mut attrs = self.extra.clone();
        attrs.insert("result_root".to_string(), self.result_root.clone());
        attrs.insert("arch".to_string(), self.arch.clone());
        attrs.insert("config".to_string(), self.config.clone());
        attrs.insert("hardware".to_string(), self.hardware.clone());
        attrs.insert("shard".to_string(), self.shard.clone());
        attrs.insert("type".to_string(), self.build_type.clone());
        attrs
    }

    /// Render the options element, attributes sorted.
    pub fn to_xml(&self) -> String {
        doc::element(OPTIONS_TAG, self.to_attrs())
    }

    /// Parse from a document containing an `Options` element.
    pub fn from_xml_str(text: &str) -> Result<Self> {
        let parsed = roxmltree::Document::parse(text)?;
        let node = doc::find_tagged(&parsed, OPTIONS_TAG)
            .ok_or_else(|| FleetError::Document(format!("no {OPTIONS_TAG} element")))?;
        Ok(Self::from_node(&node))
    }

    pub(crate) fn from_node(node: &roxmltree::Node<'_, '_>) -> Self {
        let mut options = Self::default();
        for attr in node.attributes() {
            match attr.name() {
                "result_root" => options.result_root = attr.value().to_string(),
                "arch" => options.arch = attr.value().to_string(),
                "config" => options.config = attr.value().to_string(),
                "hardware" => options.hardware = attr.value().to_string(),
                "shard" => options.shard = attr.value().to_string(),
                "type" => options.build_type = attr.value().to_string(),
                other => {
                    options
                        .extra
                        .insert(other.to_string(), attr.value().to_string());
                }
            }
        }
        options
    }
}
