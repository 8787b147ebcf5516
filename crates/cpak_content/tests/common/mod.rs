#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use cpak_content::{
    error::Result, write::PackWriterOptions, BuildMode, PackWriter, StringTable,
    BYTE_ARRAY_LOADER_ID, STRING_TABLE_LOADER_ID, TEXT_LOADER_ID,
};

pub const TIMESTAMP: u32 = 1000;

pub fn release_options() -> PackWriterOptions {
    PackWriterOptions::builder().timestamp(TIMESTAMP).build()
}

pub fn debug_options() -> PackWriterOptions {
    PackWriterOptions::builder()
        .timestamp(TIMESTAMP)
        .build_mode(BuildMode::Debug)
        .build()
}

/// `a.bin` holds ten raw digits, `b.bin` twenty zero bytes that compress
pub fn write_scenario(directory: &Path, options: PackWriterOptions) -> Result<PathBuf> {
    let mut writer = PackWriter::new(directory, "content", options)?;
    writer.declare_loader("ByteArray", BYTE_ARRAY_LOADER_ID)?;

    writer.start_item("a.bin", BYTE_ARRAY_LOADER_ID)?;
    writer.write_all(b"0123456789")?;

    writer.start_item("b.bin", BYTE_ARRAY_LOADER_ID)?;
    writer.write_all(&[0u8; 20])?;

    writer.finish()
}

/// Text, localized text and a string table
pub fn write_text_pack(directory: &Path, options: PackWriterOptions) -> Result<PathBuf> {
    let mut writer = PackWriter::new(directory, "text", options)?;
    writer.declare_loader("Text", TEXT_LOADER_ID)?;
    writer.declare_loader("StringTable", STRING_TABLE_LOADER_ID)?;

    for (name, text) in [
        ("greeting", "hello"),
        ("greeting.fr", "bonjour"),
        ("greeting.fr-CA", "allo"),
        ("broken.txt", ""),
    ] {
        writer.start_item(name, TEXT_LOADER_ID)?;
        writer.write_all(text.as_bytes())?;
    }
    writer.write_all(&[0xFF, 0xFE])?;

    writer.start_item("strings/menu", STRING_TABLE_LOADER_ID)?;
    let table: StringTable = [
        ("play".to_string(), "Play".to_string()),
        ("quit".to_string(), "Quit".to_string()),
    ]
    .into_iter()
    .collect();
    table.write_to(&mut writer)?;

    writer.finish()
}
