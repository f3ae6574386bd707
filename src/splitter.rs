use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::registry::MaterialSnapshot;
use crate::svg::{CUT_STYLE, Element, Node};

static FILL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"fill:#(?:[0-9a-fA-F]{3}){1,2}").expect("fill pattern is a valid regex")
});

/// Dissolves layer groups into the root and replicates every top-level
/// element `copies` times in total.
pub fn flatten(design: &Element, copies: u32) -> Element {
    let copies = copies.max(1);
    let mut flat = design.shallow_clone();

    let mut originals: Vec<Element> = direct_content(design).cloned().collect();
    let mut layers = Vec::new();
    collect_layers(design, &mut layers);
    for layer in layers {
        originals.extend(direct_content(layer).cloned());
    }

    for shape in &originals {
        flat.push(shape.clone());
    }
    for shape in &originals {
        for _ in 1..copies {
            flat.push(shape.clone());
        }
    }
    flat
}

fn direct_content(element: &Element) -> impl Iterator<Item = &Element> {
    element
        .elements()
        .filter(|e| e.name != "g" && e.name != "title")
}

/// Layer groups in document order, nested layers included.
fn collect_layers<'a>(element: &'a Element, out: &mut Vec<&'a Element>) {
    for g in element.elements().filter(|e| e.name == "g") {
        out.push(g);
        collect_layers(g, out);
    }
}

/// Extracts the normalized `fill:#...` declaration of a shape, looking at its
/// style first and its `fill` attribute second.
pub fn fill_of(shape: &Element) -> Option<String> {
    if let Some(m) = shape.attr("style").and_then(|s| FILL_RE.find(s)) {
        return Some(m.as_str().to_lowercase());
    }
    let declared = format!("fill:{}", shape.attr("fill")?.trim());
    FILL_RE.find(&declared).map(|m| m.as_str().to_lowercase())
}

/// Material a shape belongs to. Shapes without a recognizable fill belong to
/// no material; recognized but unmapped fills go to `default_material`.
pub fn material_for(shape: &Element, snapshot: &MaterialSnapshot, default_material: &str) -> Option<String> {
    let fill = fill_of(shape)?;
    let material = snapshot.material_for_fill(&fill).unwrap_or(default_material);
    Some(material.to_string())
}

/// Writes explicit values for position attributes that editors may omit.
fn add_missing_attrs(shape: &mut Element) {
    let (a, b) = match shape.name.as_str() {
        "rect" => ("x", "y"),
        "circle" | "ellipse" => ("cx", "cy"),
        _ => return,
    };
    for attr in [a, b] {
        if !shape.has_attr(attr) {
            shape.set_attr(attr, "0");
        }
    }
}

/// Assigns every top-level shape of an already flattened design to its
/// material's shape group.
pub fn split(flat: &Element, snapshot: &MaterialSnapshot, default_material: &str) -> BTreeMap<String, Element> {
    let mut groups: BTreeMap<String, Element> = BTreeMap::new();

    for shape in flat.elements() {
        let Some(material) = material_for(shape, snapshot, default_material) else {
            continue;
        };

        let mut part = shape.shallow_clone();
        add_missing_attrs(&mut part);
        let style = match snapshot.material_fill.get(&material) {
            Some(fill) => format!("{fill};stroke:none"),
            None => CUT_STYLE.to_string(),
        };
        part.set_attr("style", style);

        groups
            .entry(material)
            .or_insert_with(|| flat.shallow_clone())
            .push(part);
    }
    groups
}

pub fn split_design(
    design: &Element,
    copies: u32,
    snapshot: &MaterialSnapshot,
    default_material: &str,
) -> BTreeMap<String, Element> {
    let flat = flatten(design, copies);
    split(&flat, snapshot, default_material)
}

pub fn shape_count(group: &Element) -> usize {
    group.children().iter().filter(|n| !Node::is_text(n)).count()
}
