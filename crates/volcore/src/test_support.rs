//! Fixtures shared by the unit tests: inline symbol tables and hand-built images.

use crate::context::Context;
use crate::memory::layers::BufferLayer;
use crate::registry::RegistryHive;
use crate::symbols::{ExtensionRegistry, IsfTable};
use std::sync::Arc;

pub fn put_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn put_utf16(data: &mut [u8], offset: usize, text: &str) -> usize {
    let mut written = 0;
    for unit in text.encode_utf16() {
        put_u16(data, offset + written, unit);
        written += 2;
    }
    written
}

/// A small 64-bit table covering every template kind.
pub const SAMPLE_ISF: &str = r#"{
    "metadata": { "format": "6.2.0" },
    "base_types": {
        "char": { "size": 1, "signed": true, "kind": "char", "endian": "little" },
        "unsigned char": { "size": 1, "signed": false, "kind": "char", "endian": "little" },
        "unsigned short": { "size": 2, "signed": false, "kind": "int", "endian": "little" },
        "int": { "size": 4, "signed": true, "kind": "int", "endian": "little" },
        "unsigned int": { "size": 4, "signed": false, "kind": "int", "endian": "little" },
        "unsigned long long": { "size": 8, "signed": false, "kind": "int", "endian": "little" },
        "pointer": { "size": 8, "signed": false, "kind": "int", "endian": "little" }
    },
    "user_types": {
        "_NODE": {
            "kind": "struct",
            "size": 16,
            "fields": {
                "Next": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "_NODE" } } },
                "Value": { "offset": 8, "type": { "kind": "base", "name": "int" } },
                "Flags": { "offset": 12, "type": { "kind": "bitfield", "bit_position": 4, "bit_length": 4,
                    "type": { "kind": "base", "name": "unsigned int" } } }
            }
        },
        "_HOLDER": {
            "kind": "struct",
            "size": 24,
            "fields": {
                "Tag": { "offset": 0, "type": { "kind": "base", "name": "unsigned long long" } },
                "Node": { "offset": 8, "type": { "kind": "struct", "name": "_NODE" } }
            }
        },
        "_LOOP_A": {
            "kind": "struct",
            "size": 8,
            "fields": { "B": { "offset": 0, "type": { "kind": "struct", "name": "_LOOP_B" } } }
        },
        "_LOOP_B": {
            "kind": "struct",
            "size": 8,
            "fields": { "A": { "offset": 0, "type": { "kind": "struct", "name": "_LOOP_A" } } }
        },
        "_DANGLING": {
            "kind": "struct",
            "size": 8,
            "fields": { "Missing": { "offset": 0, "type": { "kind": "struct", "name": "_NOPE" } } }
        },
        "_VALUE": {
            "kind": "union",
            "size": 4,
            "fields": {
                "AsInt": { "offset": 0, "type": { "kind": "base", "name": "int" } },
                "AsBytes": { "offset": 0, "type": { "kind": "array", "count": 4,
                    "subtype": { "kind": "base", "name": "unsigned char" } } }
            }
        },
        "_LIST_ENTRY": {
            "kind": "struct",
            "size": 16,
            "fields": {
                "Flink": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "_LIST_ENTRY" } } },
                "Blink": { "offset": 8, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "_LIST_ENTRY" } } }
            }
        },
        "_ITEM": {
            "kind": "struct",
            "size": 24,
            "fields": {
                "Id": { "offset": 0, "type": { "kind": "base", "name": "unsigned long long" } },
                "Links": { "offset": 8, "type": { "kind": "struct", "name": "_LIST_ENTRY" } }
            }
        },
        "_EX_FAST_REF": {
            "kind": "struct",
            "size": 8,
            "fields": {
                "Object": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "base", "name": "void" } } }
            }
        },
        "_UNICODE_STRING": {
            "kind": "struct",
            "size": 16,
            "fields": {
                "Length": { "offset": 0, "type": { "kind": "base", "name": "unsigned short" } },
                "MaximumLength": { "offset": 2, "type": { "kind": "base", "name": "unsigned short" } },
                "Buffer": { "offset": 8, "type": { "kind": "pointer", "subtype": { "kind": "base", "name": "unsigned short" } } }
            }
        }
    },
    "enums": {
        "_STATE": {
            "size": 4,
            "base": "unsigned int",
            "constants": { "Idle": 0, "Running": 2, "Stopped": 3 }
        }
    },
    "symbols": {
        "NodeHead": { "address": 256, "type": { "kind": "struct", "name": "_NODE" } },
        "Version": { "address": 512, "constant_data": "MTAuMA==" }
    }
}"#;

/// `sample` loaded with the Windows extensions.
pub fn sample_context() -> Context {
    let mut context = Context::new();
    let table = IsfTable::from_json("sample", SAMPLE_ISF, &ExtensionRegistry::windows())
        .expect("sample table parses");
    context.symbol_space_mut().append(Arc::new(table));
    context
}

/// The kernel and hive structures a registry walk touches.
pub const HIVE_ISF: &str = r#"{
    "metadata": { "format": "6.2.0" },
    "base_types": {
        "unsigned char": { "size": 1, "signed": false, "kind": "char", "endian": "little" },
        "unsigned short": { "size": 2, "signed": false, "kind": "int", "endian": "little" },
        "wchar": { "size": 2, "signed": false, "kind": "int", "endian": "little" },
        "unsigned long": { "size": 4, "signed": false, "kind": "int", "endian": "little" },
        "unsigned int": { "size": 4, "signed": false, "kind": "int", "endian": "little" },
        "unsigned long long": { "size": 8, "signed": false, "kind": "int", "endian": "little" },
        "pointer": { "size": 8, "signed": false, "kind": "int", "endian": "little" }
    },
    "user_types": {
        "_UNICODE_STRING": {
            "kind": "struct",
            "size": 16,
            "fields": {
                "Length": { "offset": 0, "type": { "kind": "base", "name": "unsigned short" } },
                "MaximumLength": { "offset": 2, "type": { "kind": "base", "name": "unsigned short" } },
                "Buffer": { "offset": 8, "type": { "kind": "pointer", "subtype": { "kind": "base", "name": "wchar" } } }
            }
        },
        "_DUAL": {
            "kind": "struct",
            "size": 16,
            "fields": {
                "Length": { "offset": 0, "type": { "kind": "base", "name": "unsigned long" } },
                "Map": { "offset": 8, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "_HMAP_DIRECTORY" } } }
            }
        },
        "_HBASE_BLOCK": {
            "kind": "struct",
            "size": 48,
            "fields": {
                "Signature": { "offset": 0, "type": { "kind": "base", "name": "unsigned long" } },
                "RootCell": { "offset": 36, "type": { "kind": "base", "name": "unsigned long" } }
            }
        },
        "_HHIVE": {
            "kind": "struct",
            "size": 56,
            "fields": {
                "Signature": { "offset": 0, "type": { "kind": "base", "name": "unsigned long" } },
                "BaseBlock": { "offset": 8, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "_HBASE_BLOCK" } } },
                "Version": { "offset": 16, "type": { "kind": "base", "name": "unsigned long" } },
                "Storage": { "offset": 24, "type": { "kind": "array", "count": 2,
                    "subtype": { "kind": "struct", "name": "_DUAL" } } }
            }
        },
        "_CMHIVE": {
            "kind": "struct",
            "size": 112,
            "fields": {
                "Hive": { "offset": 0, "type": { "kind": "struct", "name": "_HHIVE" } },
                "FileFullPath": { "offset": 64, "type": { "kind": "struct", "name": "_UNICODE_STRING" } },
                "FileUserName": { "offset": 80, "type": { "kind": "struct", "name": "_UNICODE_STRING" } },
                "HiveRootPath": { "offset": 96, "type": { "kind": "struct", "name": "_UNICODE_STRING" } }
            }
        },
        "_HMAP_DIRECTORY": {
            "kind": "struct",
            "size": 8192,
            "fields": {
                "Directory": { "offset": 0, "type": { "kind": "array", "count": 1024,
                    "subtype": { "kind": "pointer", "subtype": { "kind": "struct", "name": "_HMAP_TABLE" } } } }
            }
        },
        "_HMAP_TABLE": {
            "kind": "struct",
            "size": 16384,
            "fields": {
                "Table": { "offset": 0, "type": { "kind": "array", "count": 512,
                    "subtype": { "kind": "struct", "name": "_HMAP_ENTRY" } } }
            }
        },
        "_HMAP_ENTRY": {
            "kind": "struct",
            "size": 32,
            "fields": {
                "BlockAddress": { "offset": 0, "type": { "kind": "base", "name": "unsigned long long" } },
                "BinAddress": { "offset": 8, "type": { "kind": "base", "name": "unsigned long long" } },
                "CmView": { "offset": 16, "type": { "kind": "pointer", "subtype": { "kind": "base", "name": "void" } } },
                "MemAlloc": { "offset": 24, "type": { "kind": "base", "name": "unsigned long" } }
            }
        },
        "_CELL_DATA": {
            "kind": "struct",
            "size": 80,
            "fields": { "u": { "offset": 0, "type": { "kind": "union", "name": "_u" } } }
        },
        "_u": {
            "kind": "union",
            "size": 80,
            "fields": {
                "KeyNode": { "offset": 0, "type": { "kind": "struct", "name": "_CM_KEY_NODE" } },
                "KeyValue": { "offset": 0, "type": { "kind": "struct", "name": "_CM_KEY_VALUE" } },
                "KeySecurity": { "offset": 0, "type": { "kind": "struct", "name": "_CM_KEY_SECURITY" } },
                "KeyIndex": { "offset": 0, "type": { "kind": "struct", "name": "_CM_KEY_INDEX" } },
                "ValueData": { "offset": 0, "type": { "kind": "struct", "name": "_CM_BIG_DATA" } },
                "KeyList": { "offset": 0, "type": { "kind": "array", "count": 1,
                    "subtype": { "kind": "base", "name": "unsigned long" } } },
                "KeyString": { "offset": 0, "type": { "kind": "array", "count": 1,
                    "subtype": { "kind": "base", "name": "wchar" } } }
            }
        },
        "_CHILD_LIST": {
            "kind": "struct",
            "size": 8,
            "fields": {
                "Count": { "offset": 0, "type": { "kind": "base", "name": "unsigned long" } },
                "List": { "offset": 4, "type": { "kind": "base", "name": "unsigned long" } }
            }
        },
        "_CM_KEY_NODE": {
            "kind": "struct",
            "size": 80,
            "fields": {
                "Signature": { "offset": 0, "type": { "kind": "base", "name": "unsigned short" } },
                "Flags": { "offset": 2, "type": { "kind": "base", "name": "unsigned short" } },
                "LastWriteTime": { "offset": 4, "type": { "kind": "base", "name": "unsigned long long" } },
                "Parent": { "offset": 16, "type": { "kind": "base", "name": "unsigned long" } },
                "SubKeyCounts": { "offset": 20, "type": { "kind": "array", "count": 2,
                    "subtype": { "kind": "base", "name": "unsigned long" } } },
                "SubKeyLists": { "offset": 28, "type": { "kind": "array", "count": 2,
                    "subtype": { "kind": "base", "name": "unsigned long" } } },
                "ValueList": { "offset": 36, "type": { "kind": "struct", "name": "_CHILD_LIST" } },
                "NameLength": { "offset": 72, "type": { "kind": "base", "name": "unsigned short" } },
                "ClassLength": { "offset": 74, "type": { "kind": "base", "name": "unsigned short" } },
                "Name": { "offset": 76, "type": { "kind": "array", "count": 1,
                    "subtype": { "kind": "base", "name": "wchar" } } }
            }
        },
        "_CM_KEY_VALUE": {
            "kind": "struct",
            "size": 24,
            "fields": {
                "Signature": { "offset": 0, "type": { "kind": "base", "name": "unsigned short" } },
                "NameLength": { "offset": 2, "type": { "kind": "base", "name": "unsigned short" } },
                "DataLength": { "offset": 4, "type": { "kind": "base", "name": "unsigned long" } },
                "Data": { "offset": 8, "type": { "kind": "base", "name": "unsigned long" } },
                "Type": { "offset": 12, "type": { "kind": "base", "name": "unsigned long" } },
                "Flags": { "offset": 16, "type": { "kind": "base", "name": "unsigned short" } },
                "Spare": { "offset": 18, "type": { "kind": "base", "name": "unsigned short" } },
                "Name": { "offset": 20, "type": { "kind": "array", "count": 1,
                    "subtype": { "kind": "base", "name": "wchar" } } }
            }
        },
        "_CM_KEY_SECURITY": {
            "kind": "struct",
            "size": 24,
            "fields": {
                "Signature": { "offset": 0, "type": { "kind": "base", "name": "unsigned short" } },
                "Reserved": { "offset": 2, "type": { "kind": "base", "name": "unsigned short" } },
                "Flink": { "offset": 4, "type": { "kind": "base", "name": "unsigned long" } },
                "Blink": { "offset": 8, "type": { "kind": "base", "name": "unsigned long" } },
                "ReferenceCount": { "offset": 12, "type": { "kind": "base", "name": "unsigned long" } },
                "DescriptorLength": { "offset": 16, "type": { "kind": "base", "name": "unsigned long" } }
            }
        },
        "_CM_KEY_INDEX": {
            "kind": "struct",
            "size": 8,
            "fields": {
                "Signature": { "offset": 0, "type": { "kind": "base", "name": "unsigned short" } },
                "Count": { "offset": 2, "type": { "kind": "base", "name": "unsigned short" } },
                "List": { "offset": 4, "type": { "kind": "array", "count": 1,
                    "subtype": { "kind": "base", "name": "unsigned long" } } }
            }
        },
        "_CM_BIG_DATA": {
            "kind": "struct",
            "size": 8,
            "fields": {
                "Signature": { "offset": 0, "type": { "kind": "base", "name": "unsigned short" } },
                "Count": { "offset": 2, "type": { "kind": "base", "name": "unsigned short" } },
                "List": { "offset": 4, "type": { "kind": "base", "name": "unsigned long" } }
            }
        }
    }
}"#;

/// Name of the hive layer built by [`hive_context`].
pub const HIVE_LAYER: &str = "hive";

const KEY_COMP_NAME: u16 = 0x20;
const VALUE_COMP_NAME: u16 = 0x1;

/// Physical address of a cell, given the block map built below.
fn cell_address(cell: u32) -> usize {
    let block = match (cell & 0x8000_0000 != 0, (cell >> 12) & 0x1ff) {
        (true, _) => 0x9000,
        (false, 0) => 0x1000,
        (false, _) => 0x3000,
    };
    block + (cell as usize & 0xfff)
}

fn put_key(data: &mut [u8], cell: u32, name: &str, parent: u32, subkeys: [(u32, u32); 2], values: (u32, u32)) {
    let node = cell_address(cell) + 4;
    data[node..node + 2].copy_from_slice(b"nk");
    put_u16(data, node + 2, KEY_COMP_NAME);
    put_u32(data, node + 0x10, parent);
    for (i, (count, list)) in subkeys.into_iter().enumerate() {
        put_u32(data, node + 0x14 + i * 4, count);
        put_u32(data, node + 0x1c + i * 4, list);
    }
    put_u32(data, node + 0x24, values.0);
    put_u32(data, node + 0x28, values.1);
    put_u16(data, node + 0x48, name.len() as u16);
    data[node + 0x4c..node + 0x4c + name.len()].copy_from_slice(name.as_bytes());
}

fn put_index(data: &mut [u8], cell: u32, signature: &[u8; 2], entries: &[u32]) {
    let node = cell_address(cell) + 4;
    data[node..node + 2].copy_from_slice(signature);
    let count = if signature == b"lf" || signature == b"lh" {
        entries.len() / 2
    } else {
        entries.len()
    };
    put_u16(data, node + 2, count as u16);
    for (i, entry) in entries.iter().enumerate() {
        put_u32(data, node + 4 + i * 4, *entry);
    }
}

fn put_value(data: &mut [u8], cell: u32, name: &str, length: u32, value: u32, value_type: u32) {
    let node = cell_address(cell) + 4;
    data[node..node + 2].copy_from_slice(b"vk");
    put_u16(data, node + 2, name.len() as u16);
    put_u32(data, node + 4, length);
    put_u32(data, node + 8, value);
    put_u32(data, node + 0xc, value_type);
    put_u16(data, node + 0x10, VALUE_COMP_NAME);
    data[node + 0x14..node + 0x14 + name.len()].copy_from_slice(name.as_bytes());
}

/// A `SOFTWARE` hive whose `_CMHIVE` sits at 0x100 of the `memory` layer.
///
/// Stable storage spans blocks at 0x1000 and 0x3000, volatile storage one
/// block at 0x9000. The key tree is:
///
/// ```text
/// ROOT
/// ├── Software          (values: Version, Count, Paths, Blob)
/// │   └── Microsoft     (reached through ri -> li)
/// ├── System
/// └── HARDWARE          (volatile)
/// ```
pub fn hive_image() -> Vec<u8> {
    let mut data = vec![0u8; 0x10000];

    // _CMHIVE and its storage maps
    put_u32(&mut data, 0x100, 0xbee0_bee0);
    put_u64(&mut data, 0x108, 0x400);
    put_u32(&mut data, 0x110, 5);
    put_u32(&mut data, 0x118, 0x2000);
    put_u64(&mut data, 0x120, 0x600);
    put_u32(&mut data, 0x128, 0x1000);
    put_u64(&mut data, 0x130, 0x700);
    let path_length = put_utf16(&mut data, 0x180, "\\REGISTRY\\MACHINE\\SOFTWARE");
    put_u16(&mut data, 0x140, path_length as u16);
    put_u16(&mut data, 0x142, path_length as u16 + 2);
    put_u64(&mut data, 0x148, 0x180);

    data[0x400..0x404].copy_from_slice(b"regf");
    put_u32(&mut data, 0x424, 0x20);

    put_u64(&mut data, 0x600, 0x800);
    put_u64(&mut data, 0x700, 0x900);
    put_u64(&mut data, 0x800, 0x1000);
    put_u64(&mut data, 0x820, 0x3000);
    put_u64(&mut data, 0x900, 0x9000);

    // keys
    put_key(&mut data, 0x20, "ROOT", 0, [(2, 0x100), (1, 0x8000_0020)], (0, 0));
    put_index(&mut data, 0x100, b"lf", &[0x200, 0, 0x1020, 0]);
    put_index(&mut data, 0x8000_0020, b"lf", &[0x8000_0100, 0]);
    put_key(&mut data, 0x200, "Software", 0x20, [(1, 0x300), (0, 0)], (5, 0x500));
    put_index(&mut data, 0x300, b"ri", &[0x340]);
    put_index(&mut data, 0x340, b"li", &[0x1100, 0x1f000]);
    put_key(&mut data, 0x1020, "System", 0x20, [(0, 0), (0, 0)], (0, 0));
    put_key(&mut data, 0x1100, "Microsoft", 0x200, [(0, 0), (0, 0)], (0, 0));
    put_key(&mut data, 0x8000_0100, "HARDWARE", 0x20, [(0, 0), (0, 0)], (0, 0));

    // values of Software
    let list = cell_address(0x500) + 4;
    for (i, cell) in [0x540u32, 0, 0x580, 0x5c0, 0x640].into_iter().enumerate() {
        put_u32(&mut data, list + i * 4, cell);
    }
    let version_length = put_utf16(&mut data, cell_address(0x600) + 4, "10.0\0");
    put_value(&mut data, 0x540, "Version", version_length as u32, 0x600, 1);
    put_value(&mut data, 0x580, "Count", 0x8000_0004, 7, 4);
    let paths_length = put_utf16(&mut data, cell_address(0x680) + 4, "C:\\a\0D:\\b\0\0");
    put_value(&mut data, 0x5c0, "Paths", paths_length as u32, 0x680, 7);
    put_value(&mut data, 0x640, "Blob", 0x4001, 0x700, 3);

    // big data: a db cell listing two chunks
    let db = cell_address(0x700) + 4;
    data[db..db + 2].copy_from_slice(b"db");
    put_u16(&mut data, db + 2, 2);
    put_u32(&mut data, db + 4, 0x740);
    put_u32(&mut data, cell_address(0x740) + 4, 0x1800);
    put_u32(&mut data, cell_address(0x740) + 8, 0x800);
    let first = cell_address(0x1800) + 4;
    data[first..first + 0x3fd8].fill(0xAA);
    let second = cell_address(0x800) + 4;
    data[second..second + 0x29].fill(0xBB);

    data
}

/// `nt` symbols, a `memory` layer holding [`hive_image`] and a hive layer over it.
pub fn hive_context() -> Context {
    let mut context = Context::new();
    let table = IsfTable::from_json("nt", HIVE_ISF, &ExtensionRegistry::windows()).expect("hive table parses");
    context.symbol_space_mut().append(Arc::new(table));
    context
        .add_layer(Arc::new(BufferLayer::new("memory", hive_image())))
        .expect("memory layer");
    let hive = RegistryHive::new(&context, HIVE_LAYER, "memory", 0x100, "nt").expect("hive layer");
    context.add_layer(Arc::new(hive)).expect("hive registered");
    context
}
