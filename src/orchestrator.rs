use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache::ShapeGroup;
use crate::error::{Error, Result};
use crate::geometry::GeometryOracle;
use crate::merger;
use crate::oracle::{NestOutcome, NestParams, NestingOracle, nest_isolated};
use crate::registry::MaterialSnapshot;
use crate::render::RenderOracle;
use crate::store::ArtifactStore;
use crate::svg::Element;
use crate::types::{Outcome, PackingResult};

/// Everything a pass produces. The previous pass's state is the input to
/// the reuse path of the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct PassState {
    pub outcomes: BTreeMap<String, Outcome>,
    pub results: BTreeMap<String, PackingResult>,
    pub percentages: BTreeMap<String, Vec<f64>>,
    pub failed_fits: BTreeMap<String, usize>,
    pub crash_reports: BTreeMap<String, String>,
    /// Materials skipped because the pass was cancelled.
    pub cancelled: BTreeSet<String>,
    pub success: bool,
}

impl Default for PassState {
    fn default() -> Self {
        Self {
            outcomes: BTreeMap::new(),
            results: BTreeMap::new(),
            percentages: BTreeMap::new(),
            failed_fits: BTreeMap::new(),
            crash_reports: BTreeMap::new(),
            cancelled: BTreeSet::new(),
            success: true,
        }
    }
}

impl PassState {
    pub fn all_crashed<'a>(materials: impl IntoIterator<Item = &'a String>, cause: &str) -> Self {
        let mut state = Self::default();
        for material in materials {
            state.record_crash(material, cause.to_string());
        }
        state
    }

    fn record_crash(&mut self, material: &str, cause: String) {
        self.outcomes.insert(material.to_string(), Outcome::Crashed);
        self.crash_reports.insert(material.to_string(), cause);
        self.success = false;
    }

    pub fn materials_with(&self, outcome: Outcome) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|(_, o)| **o == outcome)
            .map(|(m, _)| m.clone())
            .collect()
    }
}

pub struct PassInput<'a> {
    pub materials: &'a [String],
    pub shape_groups: &'a BTreeMap<String, ShapeGroup>,
    pub reuse: &'a BTreeSet<String>,
    pub previous: &'a PassState,
    pub snapshot: &'a MaterialSnapshot,
}

pub struct Orchestrator<'a> {
    pub nester: &'a dyn NestingOracle,
    pub geometry: &'a dyn GeometryOracle,
    pub renderer: &'a dyn RenderOracle,
    pub store: &'a dyn ArtifactStore,
    pub params: NestParams,
    /// Kerf margin used when measuring consumption.
    pub margin: f64,
    pub cancel: Option<&'a AtomicBool>,
}

impl Orchestrator<'_> {
    pub fn run(&self, input: &PassInput<'_>) -> PassState {
        let mut state = PassState::default();

        for material in input.materials {
            if self.cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                tracing::warn!(material = %material, "pass cancelled before material");
                state.record_crash(material, "pass cancelled".to_string());
                state.cancelled.insert(material.clone());
                continue;
            }

            let Some(group) = input.shape_groups.get(material) else {
                state.record_crash(material, format!("no shape group for material '{material}'"));
                continue;
            };
            let stock = input.snapshot.stock_for(material);

            let previous = input.previous.outcomes.get(material).copied();
            match previous.filter(|_| input.reuse.contains(material)) {
                Some(previous) => self.replay(material, previous, stock, input.previous, &mut state),
                None => self.pack_fresh(material, group.document(), stock, &mut state),
            }
        }

        tracing::info!(
            materials = input.materials.len(),
            crashed = state.materials_with(Outcome::Crashed).len(),
            insufficient = state.materials_with(Outcome::Insufficient).len(),
            "packing pass finished"
        );
        state
    }

    fn replay(
        &self,
        material: &str,
        previous: Outcome,
        stock: &[Element],
        before: &PassState,
        state: &mut PassState,
    ) {
        tracing::info!(material = %material, outcome = ?previous, "reusing previous packing");

        if previous == Outcome::Crashed {
            let cause = before
                .crash_reports
                .get(material)
                .cloned()
                .unwrap_or_else(|| "crashed in previous pass".to_string());
            state.record_crash(material, cause);
            return;
        }

        let result = before.results.get(material).cloned().unwrap_or_default();
        for placed in &result.sheets {
            if previous == Outcome::Insufficient
                && let Err(e) = self
                    .store
                    .write_artifact(material, placed.sheet, &placed.shapes.to_xml())
            {
                tracing::warn!(material = %material, sheet = placed.sheet, error = %e, "could not rewrite packed sheet");
            }
            self.preview(material, placed.sheet, stock, &placed.shapes);
        }

        state.outcomes.insert(material.to_string(), previous);
        if let Some(p) = before.percentages.get(material) {
            state.percentages.insert(material.to_string(), p.clone());
        }
        if let Some(n) = before.failed_fits.get(material) {
            state.failed_fits.insert(material.to_string(), *n);
        }
        state.results.insert(material.to_string(), result);
    }

    fn pack_fresh(&self, material: &str, shapes: &Element, stock: &[Element], state: &mut PassState) {
        tracing::info!(material = %material, sheets = stock.len(), "running nesting");

        let result = match nest_isolated(self.nester, stock, shapes, &self.params) {
            NestOutcome::Placed(result) => result,
            NestOutcome::Failed { cause } => {
                tracing::error!(material = %material, cause = %cause, "nesting failed");
                state.record_crash(material, cause);
                return;
            }
        };

        let percentages = match self.publish(material, stock, &result) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(material = %material, error = %e, "storing packed sheets failed");
                state.record_crash(material, e.to_string());
                return;
            }
        };

        let outcome = if result.unplaced > 0 {
            tracing::warn!(material = %material, unplaced = result.unplaced, "not all shapes fit");
            state.failed_fits.insert(material.to_string(), result.unplaced);
            Outcome::Insufficient
        } else {
            Outcome::Success
        };
        tracing::info!(
            material = %material,
            placed = result.placed,
            sheets = result.sheet_count(),
            "material packed"
        );

        state.outcomes.insert(material.to_string(), outcome);
        state.percentages.insert(material.to_string(), percentages);
        state.results.insert(material.to_string(), result);
    }

    /// Measures a fresh result and replaces the material's stored artifacts
    /// with it.
    fn publish(&self, material: &str, stock: &[Element], result: &PackingResult) -> Result<Vec<f64>> {
        if let Some(bad) = result.sheets.iter().find(|p| p.sheet >= stock.len()) {
            return Err(Error::Nesting(format!(
                "placement on sheet {} but only {} stock sheets exist",
                bad.sheet,
                stock.len()
            )));
        }

        let merged = merger::merge(stock, &result.sheets);
        let percentages = merger::utilization(self.geometry, &merged, self.margin)?;

        self.store.remove_material(material)?;
        for placed in &result.sheets {
            self.store
                .write_artifact(material, placed.sheet, &placed.shapes.to_xml())?;
        }
        for placed in &result.sheets {
            self.preview(material, placed.sheet, stock, &placed.shapes);
        }
        Ok(percentages)
    }

    /// Renders the stored artifact of a sheet over its stock sheet. The
    /// stored copy wins over `fallback` so hand edits show up.
    fn preview(&self, material: &str, sheet: usize, stock: &[Element], fallback: &Element) {
        if let Err(e) = self.try_preview(material, sheet, stock, fallback) {
            tracing::warn!(material = %material, sheet, error = %e, "preview failed");
        }
    }

    fn try_preview(&self, material: &str, sheet: usize, stock: &[Element], fallback: &Element) -> Result<()> {
        let stored = match self.store.read_artifact(material, sheet)? {
            Some(text) => Element::parse(&text)?,
            None => fallback.clone(),
        };
        let Some(mut composed) = stock.get(sheet).cloned() else {
            return Err(Error::Render(format!("no stock sheet {sheet}")));
        };

        let shapes: Vec<Element> = stored.elements().cloned().collect();
        if shapes.is_empty() {
            return Ok(());
        }
        for shape in shapes {
            composed.push(shape);
        }
        let png = self.renderer.render(&composed)?;
        self.store.write_preview(material, sheet, &png)
    }
}
