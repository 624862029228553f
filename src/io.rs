//! Matrix Market coordinate input and solution-vector output.
//!
//! Only the subset of the format the solver can use is accepted: a square
//! `matrix coordinate` header with `real` or `integer` values and `general`
//! or `symmetric` symmetry. Everything else is a fatal format error; no
//! partially parsed matrix ever escapes.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Raw contents of a Matrix Market coordinate file: dimension, declared
/// entry count, symmetry flag, and the 1-based triplet stream.
#[derive(Clone, Debug)]
pub struct MatrixMarket {
    pub n: usize,
    pub nnz_declared: usize,
    pub symmetric: bool,
    pub triplets: Vec<(usize, usize, f64)>,
}

pub fn read_matrix_market(path: &Path) -> Result<MatrixMarket> {
    log::info!("parsing matrix from {}", path.display());
    let file = File::open(path)?;
    parse_matrix_market(BufReader::new(file))
}

pub fn parse_matrix_market<R: BufRead>(reader: R) -> Result<MatrixMarket> {
    let mut lines = reader.lines();

    let banner = lines
        .next()
        .ok_or_else(|| Error::format("empty input"))??;
    let symmetric = parse_banner(&banner)?;

    // Size line: first non-comment, non-blank line after the banner.
    let size_line = loop {
        let line = lines
            .next()
            .ok_or_else(|| Error::format("missing size line"))??;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        break line;
    };

    let dims: Vec<&str> = size_line.split_whitespace().collect();
    if dims.len() != 3 {
        return Err(Error::format(format!("malformed size line '{size_line}'")));
    }
    let rows: usize = parse_num(dims[0], "row count")?;
    let cols: usize = parse_num(dims[1], "column count")?;
    let nnz_declared: usize = parse_num(dims[2], "nonzero count")?;
    if rows != cols {
        return Err(Error::format(format!(
            "matrix must be square, got {rows}x{cols}"
        )));
    }

    let mut triplets = Vec::new();
    triplets
        .try_reserve_exact(nnz_declared)
        .map_err(|_| Error::Allocation {
            what: "triplet stream",
            bytes: nnz_declared * std::mem::size_of::<(usize, usize, f64)>(),
        })?;

    for line in lines {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(Error::format(format!("malformed entry '{trimmed}'")));
        }
        let row: usize = parse_num(fields[0], "row index")?;
        let col: usize = parse_num(fields[1], "column index")?;
        let value: f64 = fields[2]
            .parse()
            .map_err(|_| Error::format(format!("bad value '{}'", fields[2])))?;
        triplets.push((row, col, value));
        if triplets.len() == nnz_declared {
            break;
        }
    }

    if triplets.len() != nnz_declared {
        return Err(Error::format(format!(
            "file declares {nnz_declared} entries but contains {}",
            triplets.len()
        )));
    }

    log::debug!(
        "parsed {}x{} matrix, {} declared entries, symmetric={}",
        rows,
        cols,
        nnz_declared,
        symmetric
    );

    Ok(MatrixMarket {
        n: rows,
        nnz_declared,
        symmetric,
        triplets,
    })
}

/// Screen the `%%MatrixMarket object format field symmetry` banner.
/// Returns whether the file stores only one triangle of a symmetric matrix.
fn parse_banner(banner: &str) -> Result<bool> {
    let fields: Vec<String> = banner
        .split_whitespace()
        .map(|s| s.to_ascii_lowercase())
        .collect();
    if fields.len() != 5 || fields[0] != "%%matrixmarket" {
        return Err(Error::format(format!(
            "not a Matrix Market banner: '{banner}'"
        )));
    }
    if fields[1] != "matrix" {
        return Err(Error::format(format!("unsupported object '{}'", fields[1])));
    }
    if fields[2] != "coordinate" {
        return Err(Error::format(format!(
            "unsupported storage format '{}' (only coordinate)",
            fields[2]
        )));
    }
    match fields[3].as_str() {
        "real" | "integer" => {}
        other => {
            return Err(Error::format(format!(
                "unsupported value type '{other}' (only real matrices)"
            )));
        }
    }
    match fields[4].as_str() {
        "general" => Ok(false),
        "symmetric" => Ok(true),
        other => Err(Error::format(format!("unsupported symmetry '{other}'"))),
    }
}

fn parse_num(s: &str, what: &str) -> Result<usize> {
    s.parse()
        .map_err(|_| Error::format(format!("bad {what} '{s}'")))
}

/// Write the solution vector, one value per line in scientific notation.
pub fn write_solution(path: &Path, x: &[f64]) -> Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    for xi in x {
        writeln!(out, "{xi:.6e}")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(s: &str) -> Result<MatrixMarket> {
        parse_matrix_market(Cursor::new(s))
    }

    #[test]
    fn general_coordinate_file() {
        let mm = parse(
            "%%MatrixMarket matrix coordinate real general\n\
             % a comment\n\
             3 3 4\n\
             1 1 2.0\n\
             2 2 3.0\n\
             3 3 4.0\n\
             3 1 -1.5\n",
        )
        .unwrap();
        assert_eq!(mm.n, 3);
        assert_eq!(mm.nnz_declared, 4);
        assert!(!mm.symmetric);
        assert_eq!(mm.triplets[3], (3, 1, -1.5));
    }

    #[test]
    fn symmetric_flag_is_detected() {
        let mm = parse(
            "%%MatrixMarket matrix coordinate real symmetric\n\
             2 2 2\n\
             1 1 1.0\n\
             2 1 0.5\n",
        )
        .unwrap();
        assert!(mm.symmetric);
    }

    #[test]
    fn complex_matrices_are_rejected() {
        let err = parse(
            "%%MatrixMarket matrix coordinate complex general\n\
             1 1 1\n\
             1 1 1.0 0.0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("complex"));
    }

    #[test]
    fn pattern_matrices_are_rejected() {
        assert!(parse("%%MatrixMarket matrix coordinate pattern general\n1 1 1\n1 1\n").is_err());
    }

    #[test]
    fn non_square_is_rejected() {
        let err = parse("%%MatrixMarket matrix coordinate real general\n2 3 1\n1 1 1.0\n")
            .unwrap_err();
        assert!(err.to_string().contains("square"));
    }

    #[test]
    fn short_stream_is_rejected() {
        assert!(parse("%%MatrixMarket matrix coordinate real general\n2 2 3\n1 1 1.0\n").is_err());
    }

    #[test]
    fn bad_banner_is_rejected() {
        assert!(parse("3 3 1\n1 1 1.0\n").is_err());
        assert!(parse("%%MatrixMarket matrix array real general\n2 2\n1.0\n").is_err());
    }
}
