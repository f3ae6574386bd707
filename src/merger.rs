use geo::{Area, BooleanOps, MultiPolygon, Rect as GeoRect, coord};

use crate::error::Result;
use crate::geometry::GeometryOracle;
use crate::svg::Element;
use crate::types::PlacedSheet;

/// One merged document per stock sheet. A sheet with no placement passes
/// through unchanged.
pub fn merge(stock: &[Element], placements: &[PlacedSheet]) -> Vec<Element> {
    stock
        .iter()
        .enumerate()
        .map(|(id, sheet)| {
            let mut merged = sheet.clone();
            for placed in placements.iter().filter(|p| p.sheet == id) {
                for shape in placed.shapes.elements() {
                    merged.push(shape.clone());
                }
            }
            merged
        })
        .collect()
}

/// Consumed area of one sheet, clipped to its boundary, plus the boundary
/// area.
fn sheet_consumption(
    geometry: &dyn GeometryOracle,
    sheet: &Element,
    margin: f64,
) -> Result<(f64, f64)> {
    let (height, width) = geometry.sheet_dimensions(sheet)?;
    let boundary = GeoRect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: width, y: height });
    let boundary_area = boundary.unsigned_area();

    let regions = geometry.extract_regions(sheet, margin / 2.0)?;
    if regions.is_empty() {
        return Ok((0.0, boundary_area));
    }

    let mut outers = MultiPolygon::new(Vec::new());
    let mut holes = MultiPolygon::new(Vec::new());
    for region in &regions {
        outers = outers.union(&region.outer);
        for hole in &region.holes {
            holes = holes.union(hole);
        }
    }

    let consumed = outers
        .difference(&holes)
        .intersection(&boundary.to_polygon())
        .unsigned_area();
    Ok((consumed, boundary_area))
}

/// Utilization of a material's merged sheets: the overall fraction first,
/// then one fraction per sheet. Regions are dilated by half of `margin`.
pub fn utilization(
    geometry: &dyn GeometryOracle,
    merged: &[Element],
    margin: f64,
) -> Result<Vec<f64>> {
    let mut fractions = Vec::with_capacity(merged.len() + 1);
    let mut total_consumed = 0.0;
    let mut total_area = 0.0;

    for sheet in merged {
        let (consumed, area) = sheet_consumption(geometry, sheet, margin)?;
        total_consumed += consumed;
        total_area += area;
        fractions.push(if area > 0.0 { consumed / area } else { 0.0 });
    }

    let overall = if total_area > 0.0 {
        total_consumed / total_area
    } else {
        0.0
    };
    fractions.insert(0, overall);
    Ok(fractions)
}
