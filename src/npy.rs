// Minimal NumPy .npy (format version 1.0) reader/writer for real-valued
// 1-D and 2-D arrays. Connectivity matrices come out of the upstream
// segmentation pipeline in this format.

use crate::{MetricsError, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::{Array2, ShapeBuilder};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 6] = b"\x93NUMPY";

fn format_err(path: &Path, reason: impl Into<String>) -> MetricsError {
    MetricsError::MatrixFormat {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// reads a .npy file holding a little-endian f8 or f4 array with 1 or 2
/// dimensions. A 1-D array of length n is returned as a single-row (1, n)
/// matrix.
pub fn read_npy(path: impl AsRef<Path>) -> Result<Array2<f64>> {
    let path = path.as_ref();
    let mut f = File::open(path)?;

    let mut magic = [0u8; 6];
    f.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(format_err(path, "bad magic string, not a .npy file"));
    }
    let major = f.read_u8()?;
    let _minor = f.read_u8()?;
    let header_len = match major {
        1 => f.read_u16::<LittleEndian>()? as usize,
        2 | 3 => f.read_u32::<LittleEndian>()? as usize,
        v => return Err(format_err(path, format!("unsupported npy version {}", v))),
    };

    let mut header = vec![0u8; header_len];
    f.read_exact(&mut header)?;
    let header = String::from_utf8(header)
        .map_err(|_| format_err(path, "header is not valid ascii"))?;

    let descr = dict_value(&header, "descr")
        .ok_or_else(|| format_err(path, "missing 'descr' in header"))?;
    let descr = descr.trim_matches(|c| c == '\'' || c == '"');
    let elem_size = match descr {
        "<f8" => 8,
        "<f4" => 4,
        other => {
            return Err(format_err(
                path,
                format!("unsupported dtype '{}', expected <f8 or <f4", other),
            ));
        }
    };

    let fortran_order = dict_value(&header, "fortran_order")
        .ok_or_else(|| format_err(path, "missing 'fortran_order' in header"))?
        .starts_with("True");

    let shape_str = dict_value(&header, "shape")
        .ok_or_else(|| format_err(path, "missing 'shape' in header"))?;
    let dims = parse_shape(&shape_str)
        .ok_or_else(|| format_err(path, format!("unparsable shape '{}'", shape_str)))?;
    let (rows, cols) = match dims.len() {
        1 => (1, dims[0]),
        2 => (dims[0], dims[1]),
        n => return Err(format_err(path, format!("expected 1-D or 2-D data, got {}-D", n))),
    };

    let mut byte_buffer = Vec::with_capacity(rows * cols * elem_size);
    f.read_to_end(&mut byte_buffer)?;
    if byte_buffer.len() < rows * cols * elem_size {
        return Err(format_err(path, "file truncated: fewer elements than the header claims"));
    }
    let byte_buffer = &byte_buffer[..rows * cols * elem_size];

    let mut values = vec![0f64; rows * cols];
    if elem_size == 8 {
        LittleEndian::read_f64_into(byte_buffer, &mut values);
    } else {
        let mut single = vec![0f32; rows * cols];
        LittleEndian::read_f32_into(byte_buffer, &mut single);
        values.iter_mut().zip(&single).for_each(|(d, &s)| *d = s as f64);
    }

    let arr = if fortran_order {
        Array2::from_shape_vec((rows, cols).f(), values)
    } else {
        Array2::from_shape_vec((rows, cols), values)
    };
    arr.map_err(|e| format_err(path, e.to_string()))
}

/// writes a matrix as a version 1.0 .npy file with dtype <f8 in C order
pub fn write_npy(path: impl AsRef<Path>, matrix: &Array2<f64>) -> Result<()> {
    let path = path.as_ref();
    let (rows, cols) = matrix.dim();

    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, {}), }}",
        rows, cols
    );
    // pad so that the data section starts on a 64-byte boundary
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    let pad = (64 - unpadded % 64) % 64;
    header.extend(std::iter::repeat(' ').take(pad));
    header.push('\n');

    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(MAGIC)?;
    w.write_u8(1)?;
    w.write_u8(0)?;
    w.write_u16::<LittleEndian>(header.len() as u16)?;
    w.write_all(header.as_bytes())?;
    for &v in matrix.iter() {
        w.write_f64::<LittleEndian>(v)?;
    }
    w.flush()?;
    Ok(())
}

/// extracts the raw value string following a quoted key in a python dict
/// literal, up to the next top-level comma or closing brace
fn dict_value(header: &str, key: &str) -> Option<String> {
    let pat = format!("'{}':", key);
    let start = header.find(&pat)? + pat.len();
    let rest = header[start..].trim_start();
    let mut depth = 0usize;
    let mut end = rest.len();
    for (i, c) in rest.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' | '}' if depth == 0 => {
                end = i;
                break;
            }
            _ => {}
        }
    }
    Some(rest[..end].trim().to_string())
}

fn parse_shape(s: &str) -> Option<Vec<usize>> {
    let inner = s.trim().trim_start_matches('(').trim_end_matches(')');
    let dims = inner
        .split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<usize>().ok())
        .collect::<Option<Vec<_>>>()?;
    if dims.is_empty() { None } else { Some(dims) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Write;

    fn temp_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("connectome_pca_npy_{}_{}", std::process::id(), name))
    }

    #[test]
    fn round_trip() {
        let m = array![[1.0, 0.0, 2.5], [-3.0, 4.0, 0.0]];
        let p = temp_file("round_trip.npy");
        write_npy(&p, &m).unwrap();
        let back = read_npy(&p).unwrap();
        assert_eq!(back, m);
        std::fs::remove_file(p).unwrap();
    }

    #[test]
    fn rejects_bad_magic() {
        let p = temp_file("bad_magic.npy");
        let mut f = File::create(&p).unwrap();
        f.write_all(b"not an npy file").unwrap();
        drop(f);
        assert!(matches!(read_npy(&p), Err(MetricsError::MatrixFormat { .. })));
        std::fs::remove_file(p).unwrap();
    }

    #[test]
    fn reads_fortran_order_f4() {
        // 2 x 2 matrix [[1, 2], [3, 4]] stored column-major as f4
        let header = "{'descr': '<f4', 'fortran_order': True, 'shape': (2, 2), }\n";
        let p = temp_file("fortran_f4.npy");
        let mut f = File::create(&p).unwrap();
        f.write_all(MAGIC).unwrap();
        f.write_u8(1).unwrap();
        f.write_u8(0).unwrap();
        f.write_u16::<LittleEndian>(header.len() as u16).unwrap();
        f.write_all(header.as_bytes()).unwrap();
        for v in [1f32, 3., 2., 4.] {
            f.write_f32::<LittleEndian>(v).unwrap();
        }
        drop(f);
        let m = read_npy(&p).unwrap();
        assert_eq!(m, array![[1.0, 2.0], [3.0, 4.0]]);
        std::fs::remove_file(p).unwrap();
    }

    #[test]
    fn one_dimensional_becomes_single_row() {
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (3,), }\n";
        let p = temp_file("one_dim.npy");
        let mut f = File::create(&p).unwrap();
        f.write_all(MAGIC).unwrap();
        f.write_u8(1).unwrap();
        f.write_u8(0).unwrap();
        f.write_u16::<LittleEndian>(header.len() as u16).unwrap();
        f.write_all(header.as_bytes()).unwrap();
        for v in [5f64, 6., 7.] {
            f.write_f64::<LittleEndian>(v).unwrap();
        }
        drop(f);
        let m = read_npy(&p).unwrap();
        assert_eq!(m.dim(), (1, 3));
        assert_eq!(m[[0, 2]], 7.0);
        std::fs::remove_file(p).unwrap();
    }
}
