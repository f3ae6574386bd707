use crate::error::{Error, Result};
use crate::geometry::{self, GeoGeometry, GeometryOracle};
use crate::guillotine::{FreeRect, GuillotineBin, ScoreStrategy, ScoredPlacement};
use crate::oracle::{NestParams, NestingOracle};
use crate::svg::Element;
use crate::types::{PackingResult, Placement, PlacedSheet, Rect};

/// Packs shapes by their bounding boxes over the stock sheets, keeping the
/// best of several scoring strategies. Holes already cut into a sheet are
/// carved out of its free space.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuillotineNester;

/// A shape to place, with the bounding box of its geometry.
#[derive(Debug, Clone, Copy)]
struct Part {
    index: usize,
    min_x: f64,
    min_y: f64,
    rect: Rect,
}

struct Layout {
    bins: Vec<GuillotineBin>,
    /// (sheet, part index, placement) in placement order
    placed: Vec<(usize, usize, Placement)>,
    unplaced: usize,
}

impl Layout {
    fn sheets_used(&self) -> usize {
        self.bins.iter().filter(|b| !b.placements.is_empty()).count()
    }
}

impl NestingOracle for GuillotineNester {
    fn pack(&self, stock: &[Element], shapes: &Element, params: &NestParams) -> Result<PackingResult> {
        let shape_list: Vec<&Element> = shapes.elements().collect();
        let (parts, unmeasured) = Self::parts(shapes)?;
        let bins = Self::bins(stock, params.spacing)?;
        let allow_rotate = params.rotations >= 2;

        let layout = Self::greedy_best(&bins, &parts, allow_rotate);
        let unplaced = layout.unplaced + unmeasured;
        if unplaced > 0 && !params.partial {
            return Err(Error::Nesting(format!(
                "{} of {} shapes do not fit on {} sheets",
                unplaced,
                shape_list.len(),
                stock.len()
            )));
        }

        let mut sheets: Vec<PlacedSheet> = Vec::new();
        for (sheet, part_idx, placement) in &layout.placed {
            let part = parts[*part_idx];
            let shape = Self::positioned(shape_list[part.index], &part, placement);
            match sheets.iter_mut().find(|s| s.sheet == *sheet) {
                Some(existing) => existing.shapes.push(shape),
                None => {
                    let mut doc = stock[*sheet].shallow_clone();
                    doc.push(shape);
                    sheets.push(PlacedSheet {
                        sheet: *sheet,
                        shapes: doc,
                    });
                }
            }
        }
        sheets.sort_by_key(|s| s.sheet);

        Ok(PackingResult {
            sheets,
            placed: layout.placed.len(),
            unplaced,
        })
    }
}

impl GuillotineNester {
    /// Measured parts, plus the number of shapes with no outline to cut.
    fn parts(shapes: &Element) -> Result<(Vec<Part>, usize)> {
        let mut parts = Vec::new();
        let mut unmeasured = 0;
        for (index, regions) in geometry::regions_by_child(shapes)?.iter().enumerate() {
            let Some(b) = geometry::bounds(regions) else {
                tracing::warn!(index, "shape has no outline, counted as unplaced");
                unmeasured += 1;
                continue;
            };
            parts.push(Part {
                index,
                min_x: b.min().x,
                min_y: b.min().y,
                rect: Rect::new(b.width(), b.height()),
            });
        }
        // Sort by area descending for better packing
        parts.sort_by(|a, b| b.rect.area().total_cmp(&a.rect.area()));
        Ok((parts, unmeasured))
    }

    fn bins(stock: &[Element], kerf: f64) -> Result<Vec<GuillotineBin>> {
        stock
            .iter()
            .map(|sheet| {
                let (h, w) = GeoGeometry.sheet_dimensions(sheet)?;
                let holes: Vec<FreeRect> = geometry::regions_by_child(sheet)?
                    .iter()
                    .filter_map(|regions| geometry::bounds(regions))
                    .map(|b| FreeRect {
                        x: b.min().x,
                        y: b.min().y,
                        rect: Rect::new(b.width(), b.height()),
                    })
                    .collect();
                Ok(GuillotineBin::with_obstacles(Rect::new(w, h), kerf, &holes))
            })
            .collect()
    }

    fn greedy_best(bins: &[GuillotineBin], parts: &[Part], allow_rotate: bool) -> Layout {
        let strategies = [
            ScoreStrategy::BestAreaFit,
            ScoreStrategy::BestShortSideFit,
            ScoreStrategy::BestLongSideFit,
        ];

        let mut best: Option<Layout> = None;
        for &strategy in &strategies {
            let layout = Self::greedy_solve(bins.to_vec(), parts, allow_rotate, strategy);
            let better = match &best {
                None => true,
                Some(b) => {
                    (layout.unplaced, layout.sheets_used()) < (b.unplaced, b.sheets_used())
                }
            };
            if better {
                best = Some(layout);
            }
        }
        best.unwrap_or(Layout {
            bins: bins.to_vec(),
            placed: Vec::new(),
            unplaced: parts.len(),
        })
    }

    fn greedy_solve(
        mut bins: Vec<GuillotineBin>,
        parts: &[Part],
        allow_rotate: bool,
        strategy: ScoreStrategy,
    ) -> Layout {
        let mut opened = vec![false; bins.len()];
        let mut placed = Vec::new();
        let mut unplaced = 0;

        for (part_idx, part) in parts.iter().enumerate() {
            // Try to fit in sheets already in use
            let mut best: Option<(usize, ScoredPlacement)> = None;
            for (bi, bin) in bins.iter().enumerate().filter(|(bi, _)| opened[*bi]) {
                if let Some(scored) = bin.find_best(part.rect, allow_rotate, strategy)
                    && best.is_none_or(|(_, s)| scored.score < s.score)
                {
                    best = Some((bi, scored));
                }
            }

            // Otherwise start the first unused sheet that can take it
            if best.is_none() {
                best = bins
                    .iter()
                    .enumerate()
                    .filter(|(bi, _)| !opened[*bi])
                    .find_map(|(bi, bin)| {
                        bin.find_best(part.rect, allow_rotate, strategy)
                            .map(|scored| (bi, scored))
                    });
            }

            match best {
                Some((bi, scored)) => {
                    opened[bi] = true;
                    let placement = bins[bi].place(scored, part.rect);
                    placed.push((bi, part_idx, placement));
                }
                None => unplaced += 1,
            }
        }

        Layout {
            bins,
            placed,
            unplaced,
        }
    }

    /// Copy of `shape` moved (and possibly turned) onto its placement.
    fn positioned(shape: &Element, part: &Part, placement: &Placement) -> Element {
        let ours = if placement.rotated {
            // rotate(90) maps (x, y) to (-y, x)
            let max_y = part.min_y + part.rect.h;
            format!(
                "translate({} {}) rotate(90)",
                placement.x + max_y,
                placement.y - part.min_x
            )
        } else {
            format!(
                "translate({} {})",
                placement.x - part.min_x,
                placement.y - part.min_y
            )
        };
        let transform = match shape.attr("transform") {
            Some(existing) => format!("{ours} {existing}"),
            None => ours,
        };
        let mut moved = shape.clone();
        moved.set_attr("transform", transform);
        moved
    }
}
