//! ISF file parser for plain JSON and `.json.xz` compressed files.

use crate::error::{IsfError, IsfResult};
use crate::types::{IsfFile, IsfSymbols};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use xz2::read::XzDecoder;

/// Parse an ISF file from a filesystem path.
///
/// Automatically detects compression:
/// - `.json.xz` or `.xz` → LZMA decompression then JSON parse
/// - `.json` or anything else → direct JSON parse
pub fn parse_isf_file(path: impl AsRef<Path>) -> IsfResult<IsfSymbols> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(IsfError::FileNotFound(path.display().to_string()));
    }

    let path_str = path.to_string_lossy().to_lowercase();
    let json_bytes = if path_str.ends_with(".xz") {
        // Decompress XZ/LZMA first
        let file = File::open(path)
            .map_err(|e| IsfError::Io(format!("opening {}: {}", path.display(), e)))?;
        let reader = BufReader::new(file);
        let mut decoder = XzDecoder::new(reader);
        let mut buf = Vec::new();
        decoder
            .read_to_end(&mut buf)
            .map_err(|e| IsfError::Decompression(format!("{}: {}", path.display(), e)))?;
        buf
    } else {
        // Plain JSON
        let file = File::open(path)
            .map_err(|e| IsfError::Io(format!("opening {}: {}", path.display(), e)))?;
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .map_err(|e| IsfError::Io(format!("reading {}: {}", path.display(), e)))?;
        buf
    };

    parse_isf_bytes(&json_bytes)
}

/// Parse ISF from raw JSON bytes (already decompressed).
pub fn parse_isf_bytes(json_bytes: &[u8]) -> IsfResult<IsfSymbols> {
    let isf_file: IsfFile = serde_json::from_slice(json_bytes)
        .map_err(|e| IsfError::JsonParse(format!("{}", e)))?;

    convert_to_symbols(isf_file)
}

/// Parse ISF from a JSON string.
pub fn parse_isf_str(json_str: &str) -> IsfResult<IsfSymbols> {
    let isf_file: IsfFile = serde_json::from_str(json_str)
        .map_err(|e| IsfError::JsonParse(format!("{}", e)))?;

    convert_to_symbols(isf_file)
}

/// Format majors this loader understands.
pub const SUPPORTED_MAJOR_VERSIONS: std::ops::RangeInclusive<u32> = 1..=6;

/// Convert a parsed IsfFile into a resolved IsfSymbols.
fn convert_to_symbols(isf_file: IsfFile) -> IsfResult<IsfSymbols> {
    let (major, _, _) = isf_file.metadata.version()?;
    if !SUPPORTED_MAJOR_VERSIONS.contains(&major) {
        return Err(IsfError::UnsupportedVersion(isf_file.metadata.format));
    }

    // Determine pointer size from base_types
    let pointer_size = isf_file
        .base_types
        .get("pointer")
        .map(|bt| bt.size)
        .unwrap_or(8); // default to 64-bit

    Ok(IsfSymbols {
        base_types: isf_file.base_types,
        user_types: isf_file.user_types,
        symbols: isf_file.symbols,
        enums: isf_file.enums,
        metadata: isf_file.metadata,
        pointer_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_ISF: &str = r#"{
        "metadata": { "format": "6.2.0" },
        "base_types": {
            "pointer": { "size": 8, "signed": false, "kind": "int", "endian": "little" },
            "unsigned long": { "size": 4, "signed": false, "kind": "int", "endian": "little" },
            "unsigned long long": { "size": 8, "signed": false, "kind": "int", "endian": "little" },
            "unsigned short": { "size": 2, "signed": false, "kind": "int", "endian": "little" }
        },
        "user_types": {
            "_LIST_ENTRY": {
                "size": 16,
                "fields": {
                    "Flink": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "_LIST_ENTRY" } } },
                    "Blink": { "offset": 8, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "_LIST_ENTRY" } } }
                }
            },
            "_EPROCESS": {
                "size": 2096,
                "fields": {
                    "UniqueProcessId": { "offset": 440, "type": { "kind": "pointer" } },
                    "ActiveProcessLinks": { "offset": 448, "type": { "kind": "struct", "name": "_LIST_ENTRY" } },
                    "ImageFileName": { "offset": 736, "type": { "kind": "array", "count": 15, "subtype": { "kind": "base", "name": "unsigned char" } } }
                }
            }
        },
        "symbols": {
            "PsActiveProcessHead": { "address": 11501904 },
            "KiInitialProcess": { "address": 11530400 }
        },
        "enums": {}
    }"#;

    #[test]
    fn test_parse_minimal_isf() {
        let symbols = parse_isf_str(MINIMAL_ISF).unwrap();

        assert_eq!(symbols.pointer_size, 8);
        assert_eq!(symbols.metadata.format, "6.2.0");

        // Check _EPROCESS
        let eprocess = symbols.get_type("_EPROCESS").unwrap();
        assert_eq!(eprocess.size, 2096);

        let pid_field = eprocess.fields.get("UniqueProcessId").unwrap();
        assert_eq!(pid_field.offset, 440);
        assert_eq!(pid_field.type_info.kind, "pointer");

        let links_field = eprocess.fields.get("ActiveProcessLinks").unwrap();
        assert_eq!(links_field.offset, 448);
        assert_eq!(links_field.type_info.kind, "struct");
        assert_eq!(links_field.type_info.name.as_deref(), Some("_LIST_ENTRY"));

        // Check symbols
        assert_eq!(symbols.get_symbol("PsActiveProcessHead"), Some(11501904));
        assert_eq!(symbols.get_symbol("KiInitialProcess"), Some(11530400));
        assert_eq!(symbols.get_symbol("NonExistent"), None);

        // Check field_offset helper
        assert_eq!(symbols.field_offset("_EPROCESS", "UniqueProcessId"), Some(440));
        assert_eq!(symbols.field_offset("_EPROCESS", "ActiveProcessLinks"), Some(448));
        assert_eq!(symbols.field_offset("_EPROCESS", "NonExistent"), None);

        // Check type_size
        assert_eq!(symbols.type_size("_EPROCESS"), Some(2096));
        assert_eq!(symbols.type_size("_LIST_ENTRY"), Some(16));
        assert_eq!(symbols.type_size("unsigned long"), Some(4));
    }

    #[test]
    fn test_parse_with_enums() {
        let json = r#"{
            "metadata": { "format": "6.2.0" },
            "base_types": {
                "pointer": { "size": 4, "signed": false, "kind": "int" }
            },
            "user_types": {},
            "symbols": {},
            "enums": {
                "_POOL_TYPE": {
                    "size": 4,
                    "base": "unsigned int",
                    "constants": {
                        "NonPagedPool": 0,
                        "PagedPool": 1,
                        "NonPagedPoolMustSucceed": 2
                    }
                }
            }
        }"#;

        let symbols = parse_isf_str(json).unwrap();
        assert_eq!(symbols.pointer_size, 4); // 32-bit
        assert_eq!(symbols.enum_value("_POOL_TYPE", "NonPagedPool"), Some(0));
        assert_eq!(symbols.enum_value("_POOL_TYPE", "PagedPool"), Some(1));
    }

    #[test]
    fn test_version_validation() {
        let json = |format: &str| {
            format!(r#"{{ "metadata": {{ "format": "{}" }}, "base_types": {{}}, "user_types": {{}}, "symbols": {{}}, "enums": {{}} }}"#, format)
        };
        assert!(parse_isf_str(&json("1.0.0")).is_ok());
        assert!(matches!(parse_isf_str(&json("7.0.0")), Err(IsfError::UnsupportedVersion(_))));
        assert!(matches!(parse_isf_str(&json("6.2")), Err(IsfError::UnsupportedVersion(_))));
        assert!(matches!(parse_isf_str(&json("x.y.z")), Err(IsfError::UnsupportedVersion(_))));
    }

    #[test]
    fn test_format1_length_alias_and_unions() {
        let json = r#"{
            "metadata": { "format": "1.0.0" },
            "base_types": { "int": { "length": 4, "signed": true, "kind": "int" } },
            "user_types": {
                "_U": { "length": 8, "kind": "union", "fields": {
                    "a": { "offset": 0, "type": { "kind": "base", "name": "int" } }
                } }
            },
            "symbols": {},
            "enums": {}
        }"#;
        let symbols = parse_isf_str(json).unwrap();
        assert_eq!(symbols.type_size("_U"), Some(8));
        assert_eq!(symbols.type_size("int"), Some(4));
        assert!(symbols.get_type("_U").unwrap().is_union());
    }

    #[test]
    fn test_constant_data_and_bitfields() {
        let json = r#"{
            "metadata": { "format": "6.0.0" },
            "base_types": {},
            "user_types": {
                "_F": { "size": 4, "fields": {
                    "Bits": { "offset": 0, "type": { "kind": "bitfield", "bit_position": 3, "bit_length": 2,
                              "type": { "kind": "base", "name": "unsigned long" } } }
                } }
            },
            "symbols": {
                "Banner": { "address": 16, "constant_data": "TGludXg=" },
                "Broken": { "address": 0, "constant_data": "!!" },
                "Plain": { "address": 32 }
            },
            "enums": {}
        }"#;
        let symbols = parse_isf_str(json).unwrap();
        let banner = &symbols.symbols["Banner"];
        assert_eq!(banner.decoded_constant_data().unwrap(), Some(b"Linux".to_vec()));
        assert!(symbols.symbols["Broken"].decoded_constant_data().is_err());
        assert_eq!(symbols.symbols["Plain"].decoded_constant_data().unwrap(), None);

        let bits = &symbols.get_type("_F").unwrap().fields["Bits"].type_info;
        assert_eq!(bits.bit_position, Some(3));
        assert_eq!(bits.element_type.as_ref().and_then(|t| t.name.as_deref()), Some("unsigned long"));
    }

    #[test]
    fn test_parse_xz_file() {
        use std::io::Write;
        use xz2::write::XzEncoder;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.json.xz");
        let mut encoder = XzEncoder::new(Vec::new(), 6);
        encoder.write_all(MINIMAL_ISF.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let symbols = parse_isf_file(&path).unwrap();
        assert_eq!(symbols.get_symbol("PsActiveProcessHead"), Some(11501904));
    }

    #[test]
    fn test_parse_file_not_found() {
        let result = parse_isf_file("/nonexistent/path.json");
        assert!(result.is_err());
        match result.unwrap_err() {
            IsfError::FileNotFound(path) => assert!(path.contains("nonexistent")),
            other => panic!("Expected FileNotFound, got: {:?}", other),
        }
    }
}
