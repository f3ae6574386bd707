use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::cache::{ShapeGroup, unchanged_materials};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::geometry::{GeoGeometry, GeometryOracle};
use crate::merger;
use crate::nester::GuillotineNester;
use crate::oracle::{NestParams, NestingOracle};
use crate::orchestrator::{Orchestrator, PassInput, PassState};
use crate::registry::{JsonRegistry, MaterialRegistry, MaterialSnapshot};
use crate::render::{RenderOracle, ResvgRenderer};
use crate::search;
use crate::splitter;
use crate::store::{ArtifactStore, FsStore};
use crate::svg::{self, Element};
use crate::types::{Outcome, PackingResult, PlacedSheet};

#[derive(Debug, Clone, Default)]
pub struct Job {
    snapshot: MaterialSnapshot,
    materials: Vec<String>,
    shape_groups: BTreeMap<String, ShapeGroup>,
    /// Shape groups the last completed pass packed.
    packed_groups: BTreeMap<String, ShapeGroup>,
    reuse: BTreeSet<String>,
    pass: PassState,
    source: Option<(PathBuf, u32)>,
}

impl Job {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn materials(&self) -> &[String] {
        &self.materials
    }

    pub fn shape_group(&self, material: &str) -> Option<&ShapeGroup> {
        self.shape_groups.get(material)
    }

    /// Materials whose previous layout the next pass will replay.
    pub fn reuse_set(&self) -> &BTreeSet<String> {
        &self.reuse
    }

    pub fn outcome(&self, material: &str) -> Option<Outcome> {
        self.pass.outcomes.get(material).copied()
    }

    pub fn outcomes(&self) -> &BTreeMap<String, Outcome> {
        &self.pass.outcomes
    }

    pub fn insufficient_materials(&self) -> Vec<String> {
        self.pass.materials_with(Outcome::Insufficient)
    }

    pub fn crashed_materials(&self) -> Vec<String> {
        self.pass.materials_with(Outcome::Crashed)
    }

    pub fn percentages(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.pass.percentages
    }

    pub fn failed_fits(&self) -> &BTreeMap<String, usize> {
        &self.pass.failed_fits
    }

    pub fn crash_reports(&self) -> &BTreeMap<String, String> {
        &self.pass.crash_reports
    }

    pub fn packing_result(&self, material: &str) -> Option<&PackingResult> {
        self.pass.results.get(material)
    }

    pub fn success(&self) -> bool {
        self.pass.success
    }

    pub fn source(&self) -> Option<(&Path, u32)> {
        self.source.as_ref().map(|(p, c)| (p.as_path(), *c))
    }

    /// True when the last pass left every material placed in full.
    pub fn fits(&self) -> bool {
        self.pass
            .outcomes
            .values()
            .all(|o| *o == Outcome::Success)
    }

    /// Records a completed pass. Materials the pass skipped because it was
    /// cancelled are left out of the reuse baseline.
    pub(crate) fn finish_pass(&mut self, pass: PassState) {
        self.packed_groups = self
            .shape_groups
            .iter()
            .filter(|(m, _)| !pass.cancelled.contains(*m))
            .map(|(m, g)| (m.clone(), g.clone()))
            .collect();
        self.pass = pass;
        self.refresh_reuse();
    }

    /// Drops a material from the reuse baseline so its next pass nests
    /// afresh.
    fn forget(&mut self, material: &str) {
        self.packed_groups.remove(material);
        self.refresh_reuse();
    }

    fn refresh_reuse(&mut self) {
        self.reuse = unchanged_materials(&self.packed_groups, &self.shape_groups)
            .into_iter()
            .filter(|m| self.pass.outcomes.contains_key(m))
            .collect();
    }
}

#[derive(Clone)]
pub struct Engine {
    config: Config,
    registry: Arc<dyn MaterialRegistry>,
    nester: Arc<dyn NestingOracle>,
    geometry: Arc<dyn GeometryOracle>,
    renderer: Arc<dyn RenderOracle>,
    store: Arc<dyn ArtifactStore>,
}

impl Engine {
    pub fn new(
        config: Config,
        registry: Arc<dyn MaterialRegistry>,
        nester: Arc<dyn NestingOracle>,
        geometry: Arc<dyn GeometryOracle>,
        renderer: Arc<dyn RenderOracle>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            registry,
            nester,
            geometry,
            renderer,
            store,
        }
    }

    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let registry = JsonRegistry::new(&config.paths.material_db, &config.paths.color_db);
        let store = FsStore::new(&config.paths.output_dir, &config.paths.preview_dir)?;
        Ok(Self::new(
            config,
            Arc::new(registry),
            Arc::new(GuillotineNester),
            Arc::new(GeoGeometry),
            Arc::new(ResvgRenderer::default()),
            Arc::new(store),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn ArtifactStore {
        self.store.as_ref()
    }

    pub fn load_file(&self, job: &mut Job, path: &Path, copies: u32) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        let design = Element::parse(&text)?;
        self.load_design(job, &design, copies)?;
        job.source = Some((path.to_path_buf(), copies));
        Ok(())
    }

    /// Splits `design` into shape groups against a fresh registry snapshot
    /// and recomputes which materials can be replayed.
    pub fn load_design(&self, job: &mut Job, design: &Element, copies: u32) -> Result<()> {
        let snapshot = self.registry.load_snapshot()?;
        let groups = splitter::split_design(
            design,
            copies,
            &snapshot,
            &self.config.packing.default_material,
        );

        job.snapshot = snapshot;
        job.materials = groups.keys().cloned().collect();
        job.shape_groups = groups
            .into_iter()
            .map(|(m, doc)| (m, ShapeGroup::new(doc)))
            .collect();
        job.source = None;
        job.refresh_reuse();

        tracing::info!(
            copies,
            materials = job.materials.len(),
            reusable = job.reuse.len(),
            "design loaded"
        );
        Ok(())
    }

    pub fn do_packing(&self, job: &mut Job) {
        let pass = self.run_pass(job, None);
        job.finish_pass(pass);
    }

    pub(crate) fn run_pass(&self, job: &Job, cancel: Option<&AtomicBool>) -> PassState {
        let orchestrator = Orchestrator {
            nester: self.nester.as_ref(),
            geometry: self.geometry.as_ref(),
            renderer: self.renderer.as_ref(),
            store: self.store.as_ref(),
            params: NestParams::from_config(&self.config.packing),
            margin: self.config.packing.utilization_margin,
            cancel,
        };
        orchestrator.run(&PassInput {
            materials: &job.materials,
            shape_groups: &job.shape_groups,
            reuse: &job.reuse,
            previous: &job.pass,
            snapshot: &job.snapshot,
        })
    }

    pub fn can_fit(&self, job: &mut Job, design: &Element, copies: u32) -> Result<bool> {
        self.load_design(job, design, copies)?;
        self.do_packing(job);
        Ok(job.fits())
    }

    /// Largest number of copies of the design at `path` that fits the
    /// available stock. Every count tried runs a full pass, so the job is left
    /// holding the last count tried.
    pub fn compute_max_copies(&self, job: &mut Job, path: &Path) -> Result<u32> {
        let design = Element::parse(&std::fs::read_to_string(path)?)?;
        self.max_copies_of(job, &design)
    }

    pub fn max_copies_of(&self, job: &mut Job, design: &Element) -> Result<u32> {
        let limit = self.config.packing.max_copies_limit;
        let found = search::max_copies(limit, |copies| self.can_fit(job, design, copies))?;
        tracing::info!(max_copies = found, "max copies search finished");
        Ok(found)
    }

    /// Utilization of a material computed from its currently stored
    /// artifacts, hand edits included: the overall fraction, then one per
    /// stock sheet.
    pub fn supply_level(&self, job: &mut Job, material: &str) -> Result<Vec<f64>> {
        let snapshot = self.registry.load_snapshot()?;
        let stock = snapshot
            .sheets
            .get(material)
            .ok_or_else(|| Error::UnknownMaterial(material.to_string()))?;

        let mut placements = Vec::new();
        for sheet in self.store.artifact_sheets(material)? {
            if let Some(text) = self.store.read_artifact(material, sheet)? {
                placements.push(PlacedSheet {
                    sheet,
                    shapes: Element::parse(&text)?,
                });
            }
        }

        let merged = merger::merge(stock, &placements);
        let levels = merger::utilization(
            self.geometry.as_ref(),
            &merged,
            self.config.packing.utilization_margin,
        )?;
        job.pass
            .percentages
            .insert(material.to_string(), levels.clone());
        Ok(levels)
    }

    pub fn reset_cache(&self, job: &mut Job) {
        job.packed_groups.clear();
        job.reuse.clear();
        tracing::info!("reuse cache cleared");
    }

    /// Records the cut job at `path` as holes in a stock sheet. The material's
    /// stored layout no longer matches its stock, so it is nested afresh on
    /// the next pass.
    pub fn record_cut(&self, job: &mut Job, material: &str, sheet: usize, path: &Path) -> Result<()> {
        let mut cut = Element::parse(&std::fs::read_to_string(path)?)?;
        svg::prepare_for_cutting(&mut cut);
        self.registry.record_cut(material, sheet, &cut)?;
        job.forget(material);
        Ok(())
    }

    /// Draws the holes of a stock sheet into the packed document at `path`.
    pub fn add_holes_to_file(&self, path: &Path, material: &str, sheet: usize) -> Result<()> {
        let snapshot = self.registry.load_snapshot()?;
        let stock = snapshot
            .sheets
            .get(material)
            .ok_or_else(|| Error::UnknownMaterial(material.to_string()))?;
        let holes = stock.get(sheet).ok_or_else(|| Error::UnknownSheet {
            material: material.to_string(),
            sheet,
        })?;

        let mut document = Element::parse(&std::fs::read_to_string(path)?)?;
        svg::add_holes(&mut document, holes);
        std::fs::write(path, document.to_xml())?;
        Ok(())
    }

    pub fn remove_holes_from_file(&self, path: &Path) -> Result<()> {
        let mut document = Element::parse(&std::fs::read_to_string(path)?)?;
        svg::remove_holes(&mut document);
        std::fs::write(path, document.to_xml())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use crate::store::MemoryStore;

    struct Blank;

    impl RenderOracle for Blank {
        fn render(&self, _: &Element) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn sheet() -> Element {
        Element::parse(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100" viewBox="0 0 100 100"/>"#,
        )
        .unwrap()
    }

    fn engine(store: Arc<MemoryStore>) -> Engine {
        let registry = InMemoryRegistry::new()
            .with_material("felt", "#ff0000", vec![sheet()])
            .with_material("cork", "#00ff00", vec![sheet()]);
        let mut config = Config::default();
        config.packing.spacing = 0.0;
        config.packing.utilization_margin = 0.0;
        Engine::new(
            config,
            Arc::new(registry),
            Arc::new(GuillotineNester),
            Arc::new(GeoGeometry),
            Arc::new(Blank),
            store,
        )
    }

    fn design(felt_width: u32) -> Element {
        Element::parse(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="300" height="300">
                <rect x="0" y="0" width="{felt_width}" height="50" style="fill:#ff0000"/>
                <rect x="0" y="0" width="50" height="50" style="fill:#00ff00"/>
            </svg>"#
        ))
        .unwrap()
    }

    #[test]
    fn test_reuse_requires_completed_pass() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let mut job = Job::new();
        engine.load_design(&mut job, &design(50), 1).unwrap();
        engine.load_design(&mut job, &design(50), 1).unwrap();
        assert!(job.reuse_set().is_empty());

        engine.do_packing(&mut job);
        engine.load_design(&mut job, &design(50), 1).unwrap();
        assert_eq!(job.reuse_set().len(), 2);
    }

    #[test]
    fn test_change_only_invalidates_that_material() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let mut job = Job::new();
        engine.load_design(&mut job, &design(50), 1).unwrap();
        engine.do_packing(&mut job);

        engine.load_design(&mut job, &design(40), 1).unwrap();
        assert_eq!(
            job.reuse_set().iter().collect::<Vec<_>>(),
            vec![&"cork".to_string()]
        );
    }

    #[test]
    fn test_reset_cache_forces_fresh_nesting() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let mut job = Job::new();
        engine.load_design(&mut job, &design(50), 1).unwrap();
        engine.do_packing(&mut job);
        engine.reset_cache(&mut job);
        assert!(job.reuse_set().is_empty());
        engine.load_design(&mut job, &design(50), 1).unwrap();
        assert!(job.reuse_set().is_empty());
    }

    #[test]
    fn test_supply_level_reads_stored_artifacts() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let mut job = Job::new();
        engine.load_design(&mut job, &design(50), 1).unwrap();
        engine.do_packing(&mut job);
        let packed = job.percentages()["felt"].clone();
        assert_eq!(engine.supply_level(&mut job, "felt").unwrap(), packed);

        // A hand edit that doubles the placed area shows up.
        let edited = r#"<svg xmlns="http://www.w3.org/2000/svg"><rect x="0" y="0" width="100" height="50"/></svg>"#;
        store.write_artifact("felt", 0, edited).unwrap();
        let levels = engine.supply_level(&mut job, "felt").unwrap();
        assert!((levels[1] - 0.5).abs() < 1e-9);
        assert_eq!(job.percentages()["felt"], levels);
    }

    #[test]
    fn test_supply_level_unknown_material() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let mut job = Job::new();
        assert!(matches!(
            engine.supply_level(&mut job, "glass"),
            Err(Error::UnknownMaterial(_))
        ));
    }

    #[test]
    fn test_recorded_cut_is_avoided_by_the_next_pass() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(MemoryStore::new()));
        let mut job = Job::new();
        engine.load_design(&mut job, &design(50), 1).unwrap();
        engine.do_packing(&mut job);

        let cut = dir.path().join("cut.svg");
        std::fs::write(
            &cut,
            r#"<svg xmlns="http://www.w3.org/2000/svg"><rect x="0" y="0" width="100" height="50" style="fill:#ff0000"/></svg>"#,
        )
        .unwrap();
        engine.record_cut(&mut job, "felt", 0, &cut).unwrap();
        assert!(!job.reuse_set().contains("felt"));

        engine.load_design(&mut job, &design(50), 1).unwrap();
        assert_eq!(job.reuse_set().iter().collect::<Vec<_>>(), vec![&"cork".to_string()]);
        engine.do_packing(&mut job);

        let placed = &job.packing_result("felt").unwrap().sheets[0].shapes;
        let ours = placed
            .elements()
            .find(|e| e.attr("style") != Some(svg::HOLE_STYLE))
            .unwrap();
        let b = crate::geometry::bounds(&crate::geometry::element_regions(ours).unwrap()).unwrap();
        assert!(b.min().y >= 50.0 - 1e-6);

        assert!(matches!(
            engine.record_cut(&mut job, "felt", 7, &cut),
            Err(Error::UnknownSheet { .. })
        ));
    }

    #[test]
    fn test_holes_can_be_shown_and_hidden_in_a_cut_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(MemoryStore::new()));
        let mut job = Job::new();
        let cut = dir.path().join("cut.svg");
        std::fs::write(
            &cut,
            r#"<svg xmlns="http://www.w3.org/2000/svg"><rect width="10" height="10"/></svg>"#,
        )
        .unwrap();
        engine.record_cut(&mut job, "cork", 0, &cut).unwrap();

        let packed = dir.path().join("cork_0.svg");
        let original = r#"<svg xmlns="http://www.w3.org/2000/svg"><circle cx="50" cy="50" r="5"/></svg>"#;
        std::fs::write(&packed, original).unwrap();

        engine.add_holes_to_file(&packed, "cork", 0).unwrap();
        let shown = Element::parse(&std::fs::read_to_string(&packed).unwrap()).unwrap();
        assert_eq!(shown.elements().count(), 2);

        engine.remove_holes_from_file(&packed).unwrap();
        let hidden = std::fs::read_to_string(&packed).unwrap();
        assert_eq!(hidden, Element::parse(original).unwrap().to_xml());

        assert!(engine.add_holes_to_file(&packed, "glass", 0).is_err());
    }

    #[test]
    fn test_max_copies_with_builtin_nester() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let mut job = Job::new();
        // Four 50x50 squares fit each 100x100 sheet.
        assert_eq!(engine.max_copies_of(&mut job, &design(50)).unwrap(), 4);
    }

    #[test]
    fn test_load_file_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("design.svg");
        std::fs::write(&path, design(50).to_xml()).unwrap();

        let engine = engine(Arc::new(MemoryStore::new()));
        let mut job = Job::new();
        engine.load_file(&mut job, &path, 2).unwrap();
        assert_eq!(job.source(), Some((path.as_path(), 2)));
        assert_eq!(job.materials(), ["cork".to_string(), "felt".to_string()]);
    }
}
