//! `tabletop` – run one perception request against a recorded cloud.
//!
//! ```text
//! tabletop <command> <cloud.txt> [--config <path>] [args...]
//! ```
//!
//! The cloud file is published once into the pipeline's input slot; static
//! transforms from the config relate its frame to the fixed frame.  The
//! result is printed to stdout as JSON and a status line goes to stderr.
//!
//! Exit status: `0` on success, `1` when the request failed and `2` on a usage
//! or configuration error.

mod cloud_io;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use serde::Serialize;
use tracing::debug;

use tabletop_runtime::{LatestCloud, TabletopPipeline};
use tabletop_types::{DetectedObject, PerceptionError, Pixel, PixelRect, Plane, PointCloud, Vec3};

const USAGE: &str = "\
usage: tabletop <command> <cloud.txt> [--config <path>] [args...]

commands:
  plane                          dominant plane
  planes                         every plane above the minimum size
  tabletop                       points above the table plane
  objects [--normals]            objects resting on the table
  point <col> <row>              fixed-frame position of one pixel
  bbox <x_min> <y_min> <x_max> <y_max>
                                 object inside a pixel rectangle
  contour <col,row> <col,row>... object inside a pixel polygon
  filtered                       cropped and downsampled scene
  remaining                      scene minus every segmented plane
  project                        scene projected onto the table plane";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Plane,
    Planes,
    Tabletop,
    Objects { normals: bool },
    Point { col: usize, row: usize },
    BoundingBox(PixelRect),
    Contour(Vec<Pixel>),
    Filtered,
    Remaining,
    Project,
}

#[derive(Debug, Clone, PartialEq)]
struct Invocation {
    command: Command,
    cloud: PathBuf,
    config: Option<PathBuf>,
}

impl Invocation {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut config = None;
        let mut normals = false;
        let mut positional = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    let path = iter.next().ok_or("--config needs a path")?;
                    config = Some(PathBuf::from(path));
                }
                "--normals" => normals = true,
                _ => positional.push(arg.as_str()),
            }
        }

        let [name, cloud, rest @ ..] = positional.as_slice() else {
            return Err("missing command or cloud file".to_string());
        };
        let command = match (*name, rest) {
            ("plane", []) => Command::Plane,
            ("planes", []) => Command::Planes,
            ("tabletop", []) => Command::Tabletop,
            ("objects", []) => Command::Objects { normals },
            ("point", [col, row]) => Command::Point {
                col: parse_index(col)?,
                row: parse_index(row)?,
            },
            ("bbox", [x_min, y_min, x_max, y_max]) => Command::BoundingBox(PixelRect::new(
                parse_index(x_min)?,
                parse_index(y_min)?,
                parse_index(x_max)?,
                parse_index(y_max)?,
            )),
            ("contour", vertices) if !vertices.is_empty() => Command::Contour(
                vertices
                    .iter()
                    .map(|v| parse_pixel(v))
                    .collect::<Result<_, _>>()?,
            ),
            ("filtered", []) => Command::Filtered,
            ("remaining", []) => Command::Remaining,
            ("project", []) => Command::Project,
            (name, _) => return Err(format!("unknown command or wrong arguments: {name}")),
        };
        if normals && !matches!(command, Command::Objects { .. }) {
            return Err("--normals only applies to `objects`".to_string());
        }

        Ok(Self {
            command,
            cloud: PathBuf::from(*cloud),
            config,
        })
    }
}

fn parse_index(s: &str) -> Result<usize, String> {
    s.parse().map_err(|_| format!("invalid pixel index '{s}'"))
}

fn parse_pixel(s: &str) -> Result<Pixel, String> {
    let (col, row) = s
        .split_once(',')
        .ok_or_else(|| format!("contour vertex '{s}' is not <col>,<row>"))?;
    Ok(Pixel::new(parse_index(col.trim())?, parse_index(row.trim())?))
}

/// Whatever a command produced, serialized as-is.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Report {
    Plane(Plane),
    Planes(Vec<Plane>),
    Cloud(PointCloud),
    Objects(Vec<DetectedObject>),
    Point(Vec3),
    Object(DetectedObject),
}

impl Report {
    fn summary(&self) -> String {
        match self {
            Report::Plane(p) => format!("{} plane with {} points", p.axis, p.size()),
            Report::Planes(planes) => format!("{} plane(s)", planes.len()),
            Report::Cloud(c) => format!("{} points in {}", c.len(), c.frame_id),
            Report::Objects(objects) => format!("{} object(s)", objects.len()),
            Report::Point(p) => format!("point ({:.3}, {:.3}, {:.3})", p.x, p.y, p.z),
            Report::Object(o) => format!("object with {} points", o.cloud.len()),
        }
    }
}

async fn execute(pipeline: &TabletopPipeline, command: Command) -> Result<Report, PerceptionError> {
    Ok(match command {
        Command::Plane => Report::Plane(pipeline.segment_single_plane().await?),
        Command::Planes => Report::Planes(pipeline.segment_multiple_planes().await?),
        Command::Tabletop => Report::Cloud(pipeline.extract_tabletop_region().await?),
        Command::Objects { normals } => {
            Report::Objects(pipeline.cluster_tabletop_objects(normals).await?)
        }
        Command::Point { col, row } => Report::Point(pipeline.point_at(col, row).await?),
        Command::BoundingBox(rect) => Report::Object(pipeline.object_from_bounding_box(rect).await?),
        Command::Contour(contour) => Report::Object(pipeline.object_from_contour(contour).await?),
        Command::Filtered => Report::Cloud(pipeline.filtered_cloud().await?),
        Command::Remaining => Report::Cloud(pipeline.remaining_cloud().await?),
        Command::Project => Report::Cloud(pipeline.project_onto_table().await?),
    })
}

fn usage_error(message: &str) -> ExitCode {
    eprintln!("{}: {}", "error".red().bold(), message);
    eprintln!("{USAGE}");
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let _guard = tabletop_runtime::init_tracing("tabletop");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("-h" | "--help")) {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }
    let invocation = match Invocation::parse(&args) {
        Ok(i) => i,
        Err(e) => return usage_error(&e),
    };

    let cfg = match config::load(invocation.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => return usage_error(&e),
    };
    let cloud = match cloud_io::read_cloud(&invocation.cloud) {
        Ok(cloud) => cloud,
        Err(e) => return usage_error(&e),
    };
    debug!(frame = %cloud.frame_id, points = cloud.len(), "cloud loaded");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: failed to start runtime: {}", "error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let source = LatestCloud::new();
    source.publish(cloud);
    let pipeline = TabletopPipeline::new(source, Arc::new(cfg.tf_engine()), cfg.pipeline);

    match runtime.block_on(execute(&pipeline, invocation.command)) {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{json}");
                eprintln!("{} {}", "✓".green().bold(), report.summary());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: failed to encode result: {}", "error".red().bold(), e);
                ExitCode::FAILURE
            }
        },
        Err(e) if e.is_benign() => {
            eprintln!("{} {}", "∅".yellow().bold(), e);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn parses_simple_commands() {
        let inv = Invocation::parse(&args("plane scene.txt")).unwrap();
        assert_eq!(inv.command, Command::Plane);
        assert_eq!(inv.cloud, PathBuf::from("scene.txt"));
        assert_eq!(inv.config, None);
    }

    #[test]
    fn flags_may_appear_anywhere() {
        let inv = Invocation::parse(&args("--normals objects scene.txt --config cfg.toml")).unwrap();
        assert_eq!(inv.command, Command::Objects { normals: true });
        assert_eq!(inv.config, Some(PathBuf::from("cfg.toml")));
    }

    #[test]
    fn parses_pixel_arguments() {
        let inv = Invocation::parse(&args("bbox img.txt 1 2 30 40")).unwrap();
        assert_eq!(inv.command, Command::BoundingBox(PixelRect::new(1, 2, 30, 40)));

        let inv = Invocation::parse(&args("contour img.txt 0,0 10,0 5,8")).unwrap();
        assert_eq!(
            inv.command,
            Command::Contour(vec![Pixel::new(0, 0), Pixel::new(10, 0), Pixel::new(5, 8)])
        );

        let inv = Invocation::parse(&args("point img.txt 3 4")).unwrap();
        assert_eq!(inv.command, Command::Point { col: 3, row: 4 });
    }

    #[test]
    fn rejects_bad_invocations() {
        assert!(Invocation::parse(&args("plane")).is_err());
        assert!(Invocation::parse(&args("point img.txt 3")).is_err());
        assert!(Invocation::parse(&args("point img.txt -1 4")).is_err());
        assert!(Invocation::parse(&args("contour img.txt 3;4")).is_err());
        assert!(Invocation::parse(&args("contour img.txt")).is_err());
        assert!(Invocation::parse(&args("plane scene.txt --normals")).is_err());
        assert!(Invocation::parse(&args("plane scene.txt --config")).is_err());
        assert!(Invocation::parse(&args("fly scene.txt")).is_err());
    }

    #[tokio::test]
    async fn executes_against_a_published_cloud() {
        let cloud = cloud_io::parse_cloud("# frame base_link\n# organized 2 1\n0 0 1\n0.1 0 1\n")
            .unwrap();
        let source = LatestCloud::new();
        source.publish(cloud);
        let cfg = config::CliConfig::default();
        let pipeline = TabletopPipeline::new(source, Arc::new(cfg.tf_engine()), cfg.pipeline);

        let report = execute(&pipeline, Command::Point { col: 1, row: 0 }).await.unwrap();
        assert_eq!(report.summary(), "point (0.100, 0.000, 1.000)");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["z"], 1.0);
    }
}
