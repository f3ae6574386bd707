use std::path::{Path, PathBuf};

use clap::Parser;
use cut_packer::config::Config;
use cut_packer::svg::{Element, prepare_for_cutting};
use cut_packer::types::artifact_name;
use cut_packer::{Engine, Job, Outcome};

#[derive(Parser)]
#[command(
    name = "cut_packer",
    about = "Packs a multi-colored design onto per-material laser cut sheets"
)]
struct Cli {
    /// Design SVG whose fill colors select the materials
    #[arg(long)]
    design: PathBuf,

    /// Number of copies of the design to pack (default: 1)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    copies: u32,

    /// Report the largest number of copies that fits instead of packing once
    #[arg(long)]
    max_copies: bool,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Material database (fill mappings and stock sheets)
    #[arg(long)]
    material_db: Option<PathBuf>,

    /// Material to fill color dictionary
    #[arg(long)]
    color_db: Option<PathBuf>,

    /// Directory for packed sheets
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Directory for sheet previews
    #[arg(long)]
    preview_dir: Option<PathBuf>,

    /// Write cut-ready copies of every packed sheet into this directory
    #[arg(long)]
    export: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> cut_packer::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let paths = &mut config.paths;
    if let Some(p) = &cli.material_db {
        paths.material_db = p.clone();
    }
    if let Some(p) = &cli.color_db {
        paths.color_db = p.clone();
    }
    if let Some(p) = &cli.output_dir {
        paths.output_dir = p.clone();
    }
    if let Some(p) = &cli.preview_dir {
        paths.preview_dir = p.clone();
    }
    Ok(config)
}

/// Copies every stored sheet of the pass into `dir` with the cut style
/// applied.
fn export(engine: &Engine, job: &Job, dir: &Path) -> cut_packer::Result<usize> {
    std::fs::create_dir_all(dir)?;
    let mut written = 0;
    for material in job.materials() {
        for sheet in engine.store().artifact_sheets(material)? {
            let Some(text) = engine.store().read_artifact(material, sheet)? else {
                continue;
            };
            let mut doc = Element::parse(&text)?;
            prepare_for_cutting(&mut doc);
            let path = dir.join(format!("{}.svg", artifact_name(material, sheet)));
            std::fs::write(path, doc.to_xml())?;
            written += 1;
        }
    }
    Ok(written)
}

fn fail(e: cut_packer::Error) -> ! {
    eprintln!("Error: {}", e);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = load_config(&cli).unwrap_or_else(|e| fail(e));
    let engine = Engine::from_config(config).unwrap_or_else(|e| fail(e));
    let mut job = Job::new();

    if cli.max_copies {
        let copies = engine
            .compute_max_copies(&mut job, &cli.design)
            .unwrap_or_else(|e| fail(e));
        println!("Max copies: {}", copies);
        return;
    }

    engine
        .load_file(&mut job, &cli.design, cli.copies)
        .unwrap_or_else(|e| fail(e));
    engine.do_packing(&mut job);

    // Output results
    for material in job.materials() {
        match job.outcome(material) {
            Some(Outcome::Success) => println!("{}: all shapes placed", material),
            Some(Outcome::Insufficient) => println!(
                "{}: {} shape{} did not fit",
                material,
                job.failed_fits().get(material).copied().unwrap_or(0),
                if job.failed_fits().get(material) == Some(&1) { "" } else { "s" },
            ),
            Some(Outcome::Crashed) => println!(
                "{}: packing failed ({})",
                material,
                job.crash_reports()
                    .get(material)
                    .map(String::as_str)
                    .unwrap_or("unknown cause")
            ),
            None => println!("{}: not packed", material),
        }
        if let Some(levels) = job.percentages().get(material) {
            for (i, level) in levels.iter().skip(1).enumerate() {
                println!("  Sheet {}: {:.1}% used", i, level * 100.0);
            }
        }
    }

    if let Some(dir) = &cli.export {
        let written = export(&engine, &job, dir).unwrap_or_else(|e| fail(e));
        println!("Exported {} sheet{} to {}", written, if written == 1 { "" } else { "s" }, dir.display());
    }

    let materials = job.materials().len();
    println!(
        "\nSummary: {} material{}, {} insufficient, {} crashed",
        materials,
        if materials == 1 { "" } else { "s" },
        job.insufficient_materials().len(),
        job.crashed_materials().len(),
    );

    if !job.success() {
        std::process::exit(1);
    }
}
