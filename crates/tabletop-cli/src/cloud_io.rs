//! Plain-text point cloud files.
//!
//! One point per line, `x y z` optionally followed by `r g b` (0–255).
//! Blank lines and `#` comments are ignored, except two header directives:
//!
//! ```text
//! # frame camera_optical
//! # organized 640 480
//! 0.10 -0.02 0.85 200 180 40
//! nan nan nan
//! ```
//!
//! `nan` coordinates mark invalid returns; they are only meaningful in
//! organized files where every pixel has a line.

use std::path::Path;

use tabletop_types::{Point, PointCloud};

/// Frame used when a file has no `# frame` header.
pub const DEFAULT_FRAME: &str = "camera";

pub fn read_cloud(path: &Path) -> Result<PointCloud, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read cloud at {}: {}", path.display(), e))?;
    parse_cloud(&raw).map_err(|e| format!("{}: {}", path.display(), e))
}

pub fn parse_cloud(text: &str) -> Result<PointCloud, String> {
    let mut frame = DEFAULT_FRAME.to_string();
    let mut grid: Option<(usize, usize)> = None;
    let mut points = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            let mut words = comment.split_whitespace();
            match words.next() {
                Some("frame") => {
                    frame = words
                        .next()
                        .ok_or_else(|| format!("line {}: missing frame id", number + 1))?
                        .to_string();
                }
                Some("organized") => {
                    let w = parse_field::<usize>(words.next(), number, "width")?;
                    let h = parse_field::<usize>(words.next(), number, "height")?;
                    grid = Some((w, h));
                }
                _ => {}
            }
            continue;
        }
        points.push(parse_point(line, number)?);
    }

    match grid {
        Some((w, h)) => PointCloud::organized(frame, w, h, points).map_err(|e| e.to_string()),
        None => Ok(PointCloud::unorganized(frame, points)),
    }
}

fn parse_point(line: &str, number: usize) -> Result<Point, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match *fields.as_slice() {
        [x, y, z] => Ok(Point::new(
            parse_field(Some(x), number, "x")?,
            parse_field(Some(y), number, "y")?,
            parse_field(Some(z), number, "z")?,
        )),
        [x, y, z, r, g, b] => Ok(Point::with_rgb(
            parse_field(Some(x), number, "x")?,
            parse_field(Some(y), number, "y")?,
            parse_field(Some(z), number, "z")?,
            [
                parse_field(Some(r), number, "r")?,
                parse_field(Some(g), number, "g")?,
                parse_field(Some(b), number, "b")?,
            ],
        )),
        _ => Err(format!(
            "line {}: expected 3 or 6 fields, found {}",
            number + 1,
            fields.len()
        )),
    }
}

fn parse_field<T: std::str::FromStr>(
    field: Option<&str>,
    number: usize,
    name: &str,
) -> Result<T, String> {
    let field = field.ok_or_else(|| format!("line {}: missing {}", number + 1, name))?;
    field
        .parse()
        .map_err(|_| format!("line {}: invalid {} '{}'", number + 1, name, field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unorganized_with_colors_and_comments() {
        let cloud = parse_cloud(
            "# frame base_link\n\
             # a comment\n\
             0 0 1\n\
             \n\
             0.5 -0.5 1.5 255 0 10\n",
        )
        .unwrap();
        assert_eq!(cloud.frame_id, "base_link");
        assert!(!cloud.is_organized());
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.points()[1].rgb, Some([255, 0, 10]));
        assert_eq!(cloud.points()[0].rgb, None);
    }

    #[test]
    fn organized_grid_keeps_invalid_pixels() {
        let cloud = parse_cloud("# organized 2 2\n0 0 1\nnan nan nan\n1 0 1\n1 1 1\n").unwrap();
        assert_eq!(cloud.frame_id, DEFAULT_FRAME);
        assert_eq!((cloud.width(), cloud.height()), (2, 2));
        assert!(!cloud.points()[1].is_finite());
    }

    #[test]
    fn grid_size_mismatch_is_rejected() {
        assert!(parse_cloud("# organized 3 1\n0 0 1\n").is_err());
    }

    #[test]
    fn oversized_grid_header_is_rejected() {
        let err = parse_cloud("# organized 18446744073709551615 2\n0 0 1\n").unwrap_err();
        assert!(err.contains("does not match"), "{err}");
    }

    #[test]
    fn bad_lines_name_their_position() {
        let err = parse_cloud("0 0 1\n0 0\n").unwrap_err();
        assert!(err.starts_with("line 2"), "{err}");
        let err = parse_cloud("0 zero 1\n").unwrap_err();
        assert!(err.contains("invalid y"), "{err}");
        let err = parse_cloud("0 0 1 300 0 0\n").unwrap_err();
        assert!(err.contains("invalid r"), "{err}");
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("scene.txt");
        std::fs::write(&path, "0 0 1\n").expect("write");
        assert_eq!(read_cloud(&path).unwrap().len(), 1);
        assert!(read_cloud(&dir.path().join("missing.txt")).is_err());
    }
}
