use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use sha2::{Digest, Sha256};

use crate::svg::Element;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(document: &Element) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(document.to_xml().as_bytes());
        Fingerprint(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

/// The shapes of a design assigned to one material, used both as nesting
/// input and as the cache key.
#[derive(Debug, Clone)]
pub struct ShapeGroup {
    document: Element,
    fingerprint: Fingerprint,
}

impl ShapeGroup {
    pub fn new(document: Element) -> Self {
        let fingerprint = Fingerprint::of(&document);
        Self {
            document,
            fingerprint,
        }
    }

    pub fn document(&self) -> &Element {
        &self.document
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

impl PartialEq for ShapeGroup {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for ShapeGroup {}

/// Materials present in both maps whose shape groups are identical.
pub fn unchanged_materials(
    previous: &BTreeMap<String, ShapeGroup>,
    current: &BTreeMap<String, ShapeGroup>,
) -> BTreeSet<String> {
    current
        .iter()
        .filter(|(material, group)| previous.get(*material) == Some(*group))
        .map(|(material, _)| material.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(shapes: &[(&str, &str)]) -> ShapeGroup {
        let mut doc = Element::new("svg").with_attr("viewBox", "0 0 100 100");
        for (w, h) in shapes {
            doc.push(Element::new("rect").with_attr("width", *w).with_attr("height", *h));
        }
        ShapeGroup::new(doc)
    }

    fn map(entries: Vec<(&str, ShapeGroup)>) -> BTreeMap<String, ShapeGroup> {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_identical_groups_are_reusable() {
        let previous = map(vec![("a", group(&[("1", "2")])), ("b", group(&[("3", "4")]))]);
        let current = map(vec![("a", group(&[("1", "2")])), ("b", group(&[("3", "5")]))]);
        let reuse = unchanged_materials(&previous, &current);
        assert_eq!(reuse.into_iter().collect::<Vec<_>>(), vec!["a".to_string()]);
    }

    #[test]
    fn test_new_and_removed_materials_are_not_reusable() {
        let previous = map(vec![("gone", group(&[("1", "1")]))]);
        let current = map(vec![("new", group(&[("1", "1")]))]);
        assert!(unchanged_materials(&previous, &current).is_empty());
    }

    #[test]
    fn test_order_matters() {
        let a = group(&[("1", "2"), ("3", "4")]);
        let b = group(&[("3", "4"), ("1", "2")]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_equivalent_geometry_with_different_text_is_changed() {
        let a = group(&[("1", "2")]);
        let b = group(&[("1.0", "2")]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_hex() {
        let hex = group(&[]).fingerprint().to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
