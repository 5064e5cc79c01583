//! Contact-Sheet PDF Gallery CLI
//!
//! Command-line interface for building PDF galleries from directory trees
//! of images.

use clap::Parser;
use gallery_pdf::{
    generate_gallery, generate_subfolder_galleries, GalleryOptions, PageOrientation,
};
use std::path::PathBuf;

/// Build a contact-sheet PDF from a directory tree of images
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base path to walk into and look for images
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Output PDF path (default: derived from the directory name)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Picture height in cm (default: half the page height)
    #[arg(short = 'y', long)]
    height: Option<f32>,

    /// Landscape orientation
    #[arg(short = 'L', long)]
    landscape: bool,

    /// Paper size (A4, A3, A5, Letter, Legal)
    #[arg(short = 'S', long, default_value = "A4")]
    paper_size: String,

    /// Add a filename label under each picture
    #[arg(short, long)]
    labels: bool,

    /// Page break at each new directory
    #[arg(short, long)]
    dir_break: bool,

    /// Build one PDF per immediate subfolder of the path
    #[arg(short, long)]
    subfolders: bool,

    /// Resampling resolution in dots per inch
    #[arg(long, default_value = "300")]
    dpi: f32,

    /// Spacing between pictures in cm
    #[arg(long, default_value = "0.5")]
    gutter: f32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let options = GalleryOptions {
        output: args.output,
        row_height: args.height,
        gutter: args.gutter,
        dpi: args.dpi,
        labels: args.labels,
        dir_break: args.dir_break,
        orientation: if args.landscape {
            PageOrientation::Landscape
        } else {
            PageOrientation::Portrait
        },
        paper_size: args.paper_size,
    };

    if args.subfolders {
        let reports = generate_subfolder_galleries(&args.path, &options)?;
        if reports.is_empty() {
            println!("No subfolders under {:?}", args.path);
        }
        for report in &reports {
            println!(
                "{}: {} pictures on {} pages ({} skipped)",
                report.output.display(),
                report.placed,
                report.pages,
                report.skipped
            );
        }
    } else {
        let report = generate_gallery(&args.path, &options)?;
        println!(
            "Done! Placed {} pictures on {} pages ({} skipped)",
            report.placed, report.pages, report.skipped
        );
        println!("Output saved to: {:?}", report.output);
    }

    Ok(())
}
