use geo::{BoundingRect, Buffer, Contains, Coord, LineString, Point, Polygon, Rect as GeoRect};
use lyon::math::point;
use lyon::path::iterator::PathIterator;
use lyon::path::{Event, Path as LyonPath};
use usvg::tiny_skia_path::{PathSegment, Point as SkPoint};

use crate::error::{Error, Result};
use crate::svg::Element;

const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";
const PART_ID_PREFIX: &str = "cut-packer-part-";

/// Maximum distance between a curve and its flattened polyline, in user units.
const CURVE_TOLERANCE: f32 = 0.01;

/// An outer contour and the holes cut into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub outer: Polygon<f64>,
    pub holes: Vec<Polygon<f64>>,
}

pub trait GeometryOracle: Send + Sync {
    /// Sheet size as `(height, width)` in user units.
    fn sheet_dimensions(&self, sheet: &Element) -> Result<(f64, f64)>;

    /// All regions of a document, each dilated by `offset`.
    fn extract_regions(&self, document: &Element, offset: f64) -> Result<Vec<Region>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeoGeometry;

impl GeometryOracle for GeoGeometry {
    fn sheet_dimensions(&self, sheet: &Element) -> Result<(f64, f64)> {
        if let Some(vb) = sheet.attr("viewBox") {
            let nums = vb
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::parse::<f64>)
                .collect::<std::result::Result<Vec<_>, _>>();
            return match nums.as_deref() {
                Ok([_, _, w, h]) => Ok((*h, *w)),
                _ => Err(Error::Geometry(format!("malformed viewBox '{vb}'"))),
            };
        }
        if !sheet.has_attr("width") || !sheet.has_attr("height") {
            return Err(Error::Geometry(
                "sheet has neither viewBox nor width/height".to_string(),
            ));
        }

        // Without a viewBox one user unit is one CSS pixel.
        let mut root = sheet.shallow_clone();
        root.name = "svg".to_string();
        root.set_attr("xmlns", SVG_NAMESPACE);
        let size = parse_tree(&root.to_xml())?.size();
        Ok((f64::from(size.height()), f64::from(size.width())))
    }

    fn extract_regions(&self, document: &Element, offset: f64) -> Result<Vec<Region>> {
        let mut regions = Vec::new();
        for part in regions_by_child(document)? {
            for region in part {
                regions.extend(dilate(region, offset));
            }
        }
        Ok(regions)
    }
}

/// Regions of every element child of `document`, in child order, measured in
/// the document's user space. Children that draw nothing get an empty list.
pub fn regions_by_child(document: &Element) -> Result<Vec<Vec<Region>>> {
    let children: Vec<&Element> = document.elements().collect();
    let mut wrapper = Element::new("svg")
        .with_attr("xmlns", SVG_NAMESPACE)
        .with_attr("width", "1")
        .with_attr("height", "1");
    for (name, value) in document.attrs() {
        if name.starts_with("xmlns:") {
            wrapper.set_attr(name, value.clone());
        }
    }
    for (i, child) in children.iter().enumerate() {
        let mut holder = Element::new("g").with_attr("id", format!("{PART_ID_PREFIX}{i}"));
        holder.push((*child).clone());
        wrapper.push(holder);
    }

    let tree = parse_tree(&wrapper.to_xml())?;
    let mut parts = vec![Vec::new(); children.len()];
    for node in tree.root().children() {
        let usvg::Node::Group(group) = node else {
            continue;
        };
        let index = group
            .id()
            .strip_prefix(PART_ID_PREFIX)
            .and_then(|i| i.parse::<usize>().ok());
        if let Some(slot) = index.and_then(|i| parts.get_mut(i)) {
            collect_regions(group, slot);
        }
    }
    Ok(parts)
}

/// Regions of a single element, placed by its own `transform`.
pub fn element_regions(element: &Element) -> Result<Vec<Region>> {
    let mut holder = Element::new("svg");
    holder.push(element.clone());
    Ok(regions_by_child(&holder)?.pop().unwrap_or_default())
}

/// Bounding box over the outer contours of `regions`.
pub fn bounds(regions: &[Region]) -> Option<GeoRect<f64>> {
    regions
        .iter()
        .filter_map(|r| r.outer.bounding_rect())
        .reduce(|a, b| {
            GeoRect::new(
                Coord {
                    x: a.min().x.min(b.min().x),
                    y: a.min().y.min(b.min().y),
                },
                Coord {
                    x: a.max().x.max(b.max().x),
                    y: a.max().y.max(b.max().y),
                },
            )
        })
}

fn parse_tree(text: &str) -> Result<usvg::Tree> {
    usvg::Tree::from_str(text, &usvg::Options::default())
        .map_err(|e| Error::Geometry(format!("SVG parse error: {e}")))
}

fn collect_regions(group: &usvg::Group, out: &mut Vec<Region>) {
    for node in group.children() {
        match node {
            usvg::Node::Group(g) => collect_regions(g, out),
            usvg::Node::Path(p) => out.extend(group_rings(path_rings(p))),
            usvg::Node::Text(t) => collect_regions(t.flattened(), out),
            usvg::Node::Image(_) => {}
        }
    }
}

/// Closed rings of a path in absolute coordinates. Curves and arcs arrive
/// from usvg as Béziers and are flattened by lyon; open subpaths are closed.
fn path_rings(path: &usvg::Path) -> Vec<Vec<(f64, f64)>> {
    let ts = path.abs_transform();
    let map = |mut p: SkPoint| {
        ts.map_point(&mut p);
        point(p.x, p.y)
    };

    let mut builder = LyonPath::builder();
    let mut open = false;
    let mut last = point(0.0, 0.0);
    for segment in path.data().segments() {
        match segment {
            PathSegment::MoveTo(p) => {
                if open {
                    builder.end(false);
                }
                last = map(p);
                builder.begin(last);
                open = true;
                continue;
            }
            PathSegment::Close => {
                if open {
                    builder.end(true);
                    open = false;
                }
                continue;
            }
            _ => {}
        }
        if !open {
            builder.begin(last);
            open = true;
        }
        last = match segment {
            PathSegment::LineTo(p) => {
                let to = map(p);
                builder.line_to(to);
                to
            }
            PathSegment::QuadTo(c, p) => {
                let to = map(p);
                builder.quadratic_bezier_to(map(c), to);
                to
            }
            PathSegment::CubicTo(c1, c2, p) => {
                let to = map(p);
                builder.cubic_bezier_to(map(c1), map(c2), to);
                to
            }
            PathSegment::MoveTo(_) | PathSegment::Close => last,
        };
    }
    if open {
        builder.end(false);
    }

    let mut rings = Vec::new();
    let mut ring: Vec<(f64, f64)> = Vec::new();
    for event in builder.build().iter().flattened(CURVE_TOLERANCE) {
        match event {
            Event::Begin { at } => {
                ring.clear();
                ring.push((f64::from(at.x), f64::from(at.y)));
            }
            Event::Line { to, .. } => ring.push((f64::from(to.x), f64::from(to.y))),
            Event::End { .. } => {
                if ring.len() >= 3 {
                    rings.push(std::mem::take(&mut ring));
                }
            }
            Event::Quadratic { .. } | Event::Cubic { .. } => {}
        }
    }
    rings
}

fn dilate(region: Region, offset: f64) -> Vec<Region> {
    if offset <= 0.0 {
        return vec![region];
    }
    let interiors = region
        .holes
        .iter()
        .map(|h| h.exterior().clone())
        .collect();
    let polygon = Polygon::new(region.outer.exterior().clone(), interiors);
    polygon
        .buffer(offset)
        .into_iter()
        .map(|p| Region {
            outer: Polygon::new(p.exterior().clone(), vec![]),
            holes: p
                .interiors()
                .iter()
                .map(|ring| Polygon::new(ring.clone(), vec![]))
                .collect(),
        })
        .collect()
}

/// Assigns each ring either as a hole of an earlier region containing it or
/// as a new region.
fn group_rings(rings: Vec<Vec<(f64, f64)>>) -> Vec<Region> {
    let mut regions: Vec<Region> = Vec::new();
    for ring in rings {
        let first = Point::new(ring[0].0, ring[0].1);
        let polygon = Polygon::new(LineString::from(ring), vec![]);
        match regions.iter_mut().find(|r| r.outer.contains(&first)) {
            Some(region) => region.holes.push(polygon),
            None => regions.push(Region {
                outer: polygon,
                holes: Vec::new(),
            }),
        }
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-3
    }

    fn doc(body: &str) -> Element {
        Element::parse(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="80" viewBox="0 0 100 80">{body}</svg>"#
        ))
        .unwrap()
    }

    fn area(regions: &[Region]) -> f64 {
        regions
            .iter()
            .map(|r| {
                r.outer.unsigned_area() - r.holes.iter().map(|h| h.unsigned_area()).sum::<f64>()
            })
            .sum()
    }

    #[test]
    fn test_sheet_dimensions_prefers_viewbox() {
        let sheet = doc("");
        assert_eq!(GeoGeometry.sheet_dimensions(&sheet).unwrap(), (80.0, 100.0));

        let sized = Element::new("svg").with_attr("width", "30").with_attr("height", "20px");
        let (h, w) = GeoGeometry.sheet_dimensions(&sized).unwrap();
        assert!(close(h, 20.0) && close(w, 30.0));

        assert!(GeoGeometry.sheet_dimensions(&Element::new("svg")).is_err());
        let broken = Element::new("svg").with_attr("viewBox", "0 0 ten 10");
        assert!(GeoGeometry.sheet_dimensions(&broken).is_err());
    }

    #[test]
    fn test_sheet_dimensions_convert_physical_units() {
        let sized = Element::new("svg").with_attr("width", "25.4mm").with_attr("height", "1in");
        let (h, w) = GeoGeometry.sheet_dimensions(&sized).unwrap();
        assert!(close(h, 96.0) && close(w, 96.0));
    }

    #[test]
    fn test_rect_region() {
        let regions = GeoGeometry
            .extract_regions(&doc(r#"<rect x="10" y="10" width="20" height="5"/>"#), 0.0)
            .unwrap();
        assert_eq!(regions.len(), 1);
        assert!(close(regions[0].outer.unsigned_area(), 100.0));
    }

    #[test]
    fn test_transform_through_groups() {
        let regions = GeoGeometry
            .extract_regions(
                &doc(r#"<g transform="translate(50 0)"><rect width="10" height="10" transform="scale(2)"/></g>"#),
                0.0,
            )
            .unwrap();
        let b = bounds(&regions).unwrap();
        assert!(close(b.min().x, 50.0));
        assert!(close(b.max().x, 70.0));
        assert!(close(b.max().y, 20.0));
    }

    #[test]
    fn test_path_with_hole() {
        let regions = GeoGeometry
            .extract_regions(
                &doc(r#"<path d="M0 0 H40 V40 H0 Z M10 10 h20 v20 h-20 z"/>"#),
                0.0,
            )
            .unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].holes.len(), 1);
        assert!(close(regions[0].holes[0].unsigned_area(), 400.0));
    }

    #[test]
    fn test_disjoint_subpaths_are_separate_regions() {
        let regions = GeoGeometry
            .extract_regions(&doc(r#"<path d="M0 0 L10 0 L10 10 Z M20 20 l5 0 l0 5 z"/>"#), 0.0)
            .unwrap();
        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn test_circle_area_close_to_pi_r_squared() {
        let regions = GeoGeometry
            .extract_regions(&doc(r#"<circle cx="50" cy="40" r="10"/>"#), 0.0)
            .unwrap();
        let expected = std::f64::consts::PI * 100.0;
        assert!((area(&regions) - expected).abs() / expected < 0.01);
    }

    #[test]
    fn test_arc_drawn_disc_matches_circle() {
        let arcs = GeoGeometry
            .extract_regions(
                &doc(r#"<path d="M0 50 A50 50 0 0 1 100 50 A50 50 0 0 1 0 50 Z"/>"#),
                0.0,
            )
            .unwrap();
        let circle = GeoGeometry
            .extract_regions(&doc(r#"<circle cx="50" cy="50" r="50"/>"#), 0.0)
            .unwrap();
        let expected = std::f64::consts::PI * 2500.0;
        assert!((area(&arcs) - expected).abs() / expected < 0.01);
        assert!((area(&arcs) - area(&circle)).abs() / expected < 0.01);

        let b = bounds(&arcs).unwrap();
        assert!(b.width() > 99.0 && b.height() > 99.0);
    }

    #[test]
    fn test_smooth_quadratic_is_curved() {
        // T mirrors the previous control point, bulging below the chord.
        let regions = GeoGeometry
            .extract_regions(&doc(r#"<path d="M0 0 Q10 -20 20 0 T40 0 Z"/>"#), 0.0)
            .unwrap();
        let b = bounds(&regions).unwrap();
        assert!(b.max().y > 5.0);
        assert!(b.min().y < -5.0);
    }

    #[test]
    fn test_dilation_grows_area() {
        let body = r#"<rect x="10" y="10" width="20" height="20"/>"#;
        let plain = GeoGeometry.extract_regions(&doc(body), 0.0).unwrap();
        let grown = GeoGeometry.extract_regions(&doc(body), 2.0).unwrap();
        assert!(grown[0].outer.unsigned_area() > plain[0].outer.unsigned_area());
    }

    #[test]
    fn test_regions_by_child_keeps_child_order() {
        let parts = regions_by_child(&doc(
            r#"<rect x="0" y="0" width="10" height="10"/><text x="5" y="5">label</text><circle cx="50" cy="50" r="5"/>"#,
        ))
        .unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 1);
        assert!(parts[1].is_empty());
        assert!(close(bounds(&parts[2]).unwrap().min().x, 45.0));
    }

    #[test]
    fn test_element_regions_without_namespace() {
        let rect = Element::new("rect")
            .with_attr("width", "4")
            .with_attr("height", "3")
            .with_attr("transform", "translate(10 0)");
        let b = bounds(&element_regions(&rect).unwrap()).unwrap();
        assert!(close(b.min().x, 10.0) && close(b.max().x, 14.0));
    }

    #[test]
    fn test_unparseable_path_draws_nothing() {
        let regions = GeoGeometry.extract_regions(&doc(r#"<path d="10 10 L"/>"#), 0.0).unwrap();
        assert!(regions.is_empty());
    }
}
