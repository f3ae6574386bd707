use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::svg::{self, Element};

/// Read-only view of the registry taken at design load time.
#[derive(Debug, Clone, Default)]
pub struct MaterialSnapshot {
    /// Stock sheets per material, in sheet-id order.
    pub sheets: BTreeMap<String, Vec<Element>>,
    /// `"fill:#rrggbb"` (lowercase) to material name.
    pub fill_to_material: BTreeMap<String, String>,
    /// Material name to the fill style its shapes are recolored with.
    pub material_fill: BTreeMap<String, String>,
}

impl MaterialSnapshot {
    pub fn stock_for(&self, material: &str) -> &[Element] {
        self.sheets.get(material).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn material_for_fill(&self, fill: &str) -> Option<&str> {
        self.fill_to_material.get(fill).map(String::as_str)
    }
}

pub trait MaterialRegistry: Send + Sync {
    fn load_snapshot(&self) -> Result<MaterialSnapshot>;

    /// Adds the shapes of a finished cut to a stock sheet as holes.
    fn record_cut(&self, material: &str, sheet: usize, cut: &Element) -> Result<()>;
}

fn unknown_sheet(material: &str, sheet: usize) -> Error {
    Error::UnknownSheet {
        material: material.to_string(),
        sheet,
    }
}

#[derive(Deserialize)]
struct MaterialDb {
    fillmappings: BTreeMap<String, String>,
    materialsheets: BTreeMap<String, Vec<String>>,
}

/// Registry backed by a material database file (fill mappings and sheet
/// documents) and a color dictionary (material to fill style).
pub struct JsonRegistry {
    material_db: PathBuf,
    color_db: PathBuf,
}

impl JsonRegistry {
    pub fn new(material_db: impl Into<PathBuf>, color_db: impl Into<PathBuf>) -> Self {
        Self {
            material_db: material_db.into(),
            color_db: color_db.into(),
        }
    }

    fn read_colors(path: &Path) -> Result<BTreeMap<String, String>> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "color dictionary missing, shapes will use the cut style");
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl MaterialRegistry for JsonRegistry {
    fn load_snapshot(&self) -> Result<MaterialSnapshot> {
        let text = std::fs::read_to_string(&self.material_db)?;
        let db: MaterialDb = serde_json::from_str(&text)?;

        let mut sheets = BTreeMap::new();
        for (material, docs) in db.materialsheets {
            let parsed = docs
                .iter()
                .map(|d| Element::parse(d))
                .collect::<Result<Vec<_>>>()?;
            sheets.insert(material, parsed);
        }

        let fill_to_material = db
            .fillmappings
            .into_iter()
            .map(|(fill, material)| (fill.to_lowercase(), material))
            .collect();

        Ok(MaterialSnapshot {
            sheets,
            fill_to_material,
            material_fill: Self::read_colors(&self.color_db)?,
        })
    }

    fn record_cut(&self, material: &str, sheet: usize, cut: &Element) -> Result<()> {
        // Edited as a JSON value so keys this registry does not read survive.
        let text = std::fs::read_to_string(&self.material_db)?;
        let mut db: serde_json::Value = serde_json::from_str(&text)?;

        let sheets = db
            .get_mut("materialsheets")
            .and_then(|m| m.get_mut(material))
            .and_then(serde_json::Value::as_array_mut)
            .ok_or_else(|| Error::UnknownMaterial(material.to_string()))?;
        let slot = sheets
            .get_mut(sheet)
            .ok_or_else(|| unknown_sheet(material, sheet))?;
        let mut document = Element::parse(slot.as_str().unwrap_or_default())?;
        svg::record_cut(&mut document, cut);
        *slot = serde_json::Value::String(document.to_xml());

        std::fs::write(&self.material_db, serde_json::to_string(&db)?)?;
        tracing::info!(material = %material, sheet, shapes = cut.elements().count(), "cut recorded as holes");
        Ok(())
    }
}

/// Registry held in memory; sheets can be swapped between loads.
#[derive(Default)]
pub struct InMemoryRegistry {
    snapshot: RwLock<MaterialSnapshot>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a material with its fill color (`#rrggbb`) and stock sheets.
    pub fn with_material(self, material: &str, color: &str, sheets: Vec<Element>) -> Self {
        self.add_material(material, color, sheets);
        self
    }

    pub fn add_material(&self, material: &str, color: &str, sheets: Vec<Element>) {
        let fill = format!("fill:{}", color.to_lowercase());
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        snapshot
            .fill_to_material
            .insert(fill.clone(), material.to_string());
        snapshot.material_fill.insert(material.to_string(), fill);
        snapshot.sheets.insert(material.to_string(), sheets);
    }

    pub fn set_sheets(&self, material: &str, sheets: Vec<Element>) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        snapshot.sheets.insert(material.to_string(), sheets);
    }
}

impl MaterialRegistry for InMemoryRegistry {
    fn load_snapshot(&self) -> Result<MaterialSnapshot> {
        let snapshot = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        Ok(snapshot.clone())
    }

    fn record_cut(&self, material: &str, sheet: usize, cut: &Element) -> Result<()> {
        let mut snapshot = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        let sheets = snapshot
            .sheets
            .get_mut(material)
            .ok_or_else(|| Error::UnknownMaterial(material.to_string()))?;
        let document = sheets
            .get_mut(sheet)
            .ok_or_else(|| unknown_sheet(material, sheet))?;
        svg::record_cut(document, cut);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_registry_reads_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("mat-data.txt");
        let colors = dir.path().join("colordict2.json");
        std::fs::write(
            &db,
            r#"{
                "fillmappings": {"fill:#FF0000": "3mm-acrylic-red"},
                "materialinfo": {"3mm-acrylic-red": {"width": "100", "height": "100"}},
                "materialsheets": {"3mm-acrylic-red": [
                    "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"100\" height=\"100\" viewBox=\"0 0 100 100\"/>",
                    "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"100\" height=\"100\" viewBox=\"0 0 100 100\"><rect x=\"0\" y=\"0\" width=\"10\" height=\"10\"/></svg>"
                ]}
            }"#,
        )
        .unwrap();
        std::fs::write(&colors, r##"{"3mm-acrylic-red": "fill:#ff0000"}"##).unwrap();

        let snapshot = JsonRegistry::new(&db, &colors).load_snapshot().unwrap();
        assert_eq!(snapshot.stock_for("3mm-acrylic-red").len(), 2);
        assert_eq!(snapshot.material_for_fill("fill:#ff0000"), Some("3mm-acrylic-red"));
        assert_eq!(
            snapshot.material_fill.get("3mm-acrylic-red").map(String::as_str),
            Some("fill:#ff0000")
        );
        assert!(snapshot.stock_for("unknown").is_empty());
    }

    #[test]
    fn test_json_registry_records_cut_as_holes() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("mat-data.txt");
        std::fs::write(
            &db,
            r#"{
                "fillmappings": {"fill:#FF0000": "felt"},
                "materialinfo": {"felt": {"width": "100"}},
                "materialsheets": {"felt": ["<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"100\" height=\"100\"/>"]}
            }"#,
        )
        .unwrap();
        let registry = JsonRegistry::new(&db, dir.path().join("colors.json"));
        let mut cut = Element::new("svg");
        cut.push(
            Element::new("rect")
                .with_attr("width", "10")
                .with_attr("height", "10")
                .with_attr("style", svg::CUT_STYLE),
        );

        registry.record_cut("felt", 0, &cut).unwrap();
        let sheet = &registry.load_snapshot().unwrap().sheets["felt"][0];
        let hole = sheet.elements().next().unwrap();
        assert_eq!(hole.attr("style"), Some(svg::HOLE_STYLE));

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&db).unwrap()).unwrap();
        assert!(raw.get("materialinfo").is_some());

        assert!(matches!(
            registry.record_cut("felt", 3, &cut),
            Err(Error::UnknownSheet { sheet: 3, .. })
        ));
        assert!(matches!(
            registry.record_cut("glass", 0, &cut),
            Err(Error::UnknownMaterial(_))
        ));
    }

    #[test]
    fn test_json_registry_missing_db_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JsonRegistry::new(dir.path().join("nope.txt"), dir.path().join("c.json"));
        assert!(registry.load_snapshot().is_err());
    }

    #[test]
    fn test_in_memory_registry() {
        let registry = InMemoryRegistry::new().with_material("felt", "#00FF00", vec![
            Element::new("svg").with_attr("width", "10"),
        ]);
        let snapshot = registry.load_snapshot().unwrap();
        assert_eq!(snapshot.material_for_fill("fill:#00ff00"), Some("felt"));

        let mut cut = Element::new("svg");
        cut.push(Element::new("rect").with_attr("style", svg::CUT_STYLE));
        registry.record_cut("felt", 0, &cut).unwrap();
        let sheet = &registry.load_snapshot().unwrap().sheets["felt"][0];
        assert_eq!(sheet.elements().count(), 1);

        registry.set_sheets("felt", vec![]);
        assert!(registry.load_snapshot().unwrap().stock_for("felt").is_empty());
    }
}
