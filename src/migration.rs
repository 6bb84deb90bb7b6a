use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

const BOM: char = '\u{feff}';

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("could not determine the encoding of {0:?}")]
    UnknownEncoding(PathBuf),
    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

fn decode_with(bytes: &[u8], order: ByteOrder) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units = bytes.chunks_exact(2).map(|pair| match order {
        ByteOrder::Little => u16::from_le_bytes([pair[0], pair[1]]),
        ByteOrder::Big => u16::from_be_bytes([pair[0], pair[1]]),
    });
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

/// Decode UTF-16 text. A byte-order mark picks the order, otherwise little
/// endian is tried before big endian. A leading BOM is not part of the result.
pub fn decode_utf16(bytes: &[u8]) -> Option<String> {
    let text = match bytes {
        [0xff, 0xfe, ..] => decode_with(bytes, ByteOrder::Little),
        [0xfe, 0xff, ..] => decode_with(bytes, ByteOrder::Big),
        _ => decode_with(bytes, ByteOrder::Little).or_else(|| decode_with(bytes, ByteOrder::Big)),
    }?;
    Some(match text.strip_prefix(BOM) {
        Some(rest) => rest.to_string(),
        None => text,
    })
}

pub fn backup_path(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".backup");
    PathBuf::from(name)
}

fn io_error(path: &Path, source: std::io::Error) -> MigrationError {
    MigrationError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Rewrites a UTF-16 migration file as UTF-8, in place unless `output` is
/// given. The first run leaves a `.backup` copy that later runs never touch.
pub fn fix_encoding(input: &Path, output: Option<&Path>) -> Result<PathBuf, MigrationError> {
    let output = output.unwrap_or(input).to_path_buf();
    let backup = backup_path(input);
    if !backup.exists() {
        fs::copy(input, &backup).map_err(|e| io_error(&backup, e))?;
        info!("Created backup: {}", backup.display());
    }

    let raw = fs::read(input).map_err(|e| io_error(input, e))?;
    let text = decode_utf16(&raw).ok_or_else(|| MigrationError::UnknownEncoding(input.to_path_buf()))?;
    fs::write(&output, text).map_err(|e| io_error(&output, e))?;
    info!("Converted to UTF-8: {}", output.display());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(text: &str, bom: bool) -> Vec<u8> {
        let mut bytes = if bom { vec![0xff, 0xfe] } else { vec![] };
        bytes.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
        bytes
    }

    #[test]
    fn decodes_by_byte_order_mark() {
        assert_eq!(decode_utf16(&utf16le("create table t;", true)).unwrap(), "create table t;");

        let mut be = vec![0xfe, 0xff];
        be.extend("Привет".encode_utf16().flat_map(u16::to_be_bytes));
        assert_eq!(decode_utf16(&be).unwrap(), "Привет");
    }

    #[test]
    fn falls_back_to_little_endian_without_bom() {
        assert_eq!(decode_utf16(&utf16le("select 1;", false)).unwrap(), "select 1;");
    }

    #[test]
    fn odd_length_input_is_undecodable() {
        assert_eq!(decode_utf16(&[0x41, 0x00, 0x42]), None);
    }

    #[test]
    fn unpaired_surrogates_fall_through_to_failure() {
        // 0xD8D8 is a lone high surrogate in either order.
        assert_eq!(decode_utf16(&[0xd8, 0xd8]), None);
    }

    #[test]
    fn rewrites_in_place_and_keeps_first_backup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("schema.sql");
        let original = utf16le("-- schema\ncreate table portfolio();\n", true);
        fs::write(&file, &original).unwrap();

        fix_encoding(&file, None).unwrap();
        assert_eq!(
            fs::read_to_string(&file).unwrap(),
            "-- schema\ncreate table portfolio();\n"
        );
        assert_eq!(fs::read(backup_path(&file)).unwrap(), original);

        fs::write(&file, utf16le("-- second", false)).unwrap();
        fix_encoding(&file, None).unwrap();
        assert_eq!(fs::read(backup_path(&file)).unwrap(), original);
    }

    #[test]
    fn writes_to_separate_output_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("schema.sql");
        let out = dir.path().join("schema.utf8.sql");
        fs::write(&file, utf16le("x", true)).unwrap();
        assert_eq!(fix_encoding(&file, Some(&out)).unwrap(), out);
        assert_eq!(fs::read_to_string(&out).unwrap(), "x");
        assert_eq!(fs::read(&file).unwrap(), utf16le("x", true));
    }

    #[test]
    fn undecodable_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.sql");
        fs::write(&file, [0x41, 0x00, 0x42]).unwrap();
        assert!(matches!(
            fix_encoding(&file, None),
            Err(MigrationError::UnknownEncoding(_))
        ));
    }
}
