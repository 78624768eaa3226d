//! Device metadata loaded once from the controller's node listing.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::error::ListingError;

/// Path of the controller's device listing.
pub const LISTING_PATH: &str = "/rest/nodes/devices";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceMeta {
    pub name: String,
    pub parent: String,
    pub category: u32,
    #[serde(rename = "subcategory")]
    pub sub_category: u32,
}

impl DeviceMeta {
    /// The motor half of a FanLinc is always its second sub-node.
    pub fn is_fan_motor(&self, address: &str) -> bool {
        self.category == 1 && self.sub_category == 46 && address.trim_end().ends_with(" 2")
    }
}

/// Address -> metadata table. Reloads swap in a whole new map, so readers
/// see either the old table or the new one and never block.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: ArcSwap<HashMap<String, DeviceMeta>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts either the wire form (`1E 4 58 1`) or the bus form (`1E.4.58.1`).
    pub fn lookup(&self, address: &str) -> Option<DeviceMeta> {
        let devices = self.devices.load();
        devices
            .get(address)
            .or_else(|| devices.get(&address.replace('.', " ")))
            .cloned()
    }

    pub fn replace(&self, devices: HashMap<String, DeviceMeta>) -> usize {
        let count = devices.len();
        self.devices.store(Arc::new(devices));
        count
    }

    /// Parse a listing and swap it in. On error the current table is kept.
    pub fn replace_from_listing(&self, xml: &str) -> Result<usize, ListingError> {
        let devices = parse_listing(xml)?;
        Ok(self.replace(devices))
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, DeviceMeta>> {
        self.devices.load_full()
    }

    pub fn len(&self) -> usize {
        self.devices.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn parse_listing(xml: &str) -> Result<HashMap<String, DeviceMeta>, ListingError> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| ListingError::Xml(e.to_string()))?;
    let root = doc.root_element();
    if root.tag_name().name() != "nodes" {
        return Err(ListingError::UnexpectedRoot(root.tag_name().name().to_string()));
    }

    let mut devices = HashMap::new();
    for node in root.children().filter(|n| is_element_named(*n, "node")) {
        let field = |name: &str| {
            node.children()
                .find(|c| is_element_named(*c, name))
                .and_then(|c| c.text())
                .map(|t| t.trim().to_string())
                .unwrap_or_default()
        };
        let address = field("address");
        if address.is_empty() {
            continue;
        }
        let device_type = field("type");
        let mut type_parts = device_type.split('.').map(|p| p.trim().parse::<u32>().unwrap_or(0));
        let category = type_parts.next().unwrap_or(0);
        let sub_category = type_parts.next().unwrap_or(0);

        devices.insert(
            address,
            DeviceMeta { name: field("name"), parent: field("parent"), category, sub_category },
        );
    }
    Ok(devices)
}

fn is_element_named(node: roxmltree::Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}
