//! Utilities for input/output.

use anyhow::{Context, Result};
use std::{
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::Path,
};

/// Creates any directories missing in order for the given file path to be
/// valid.
pub fn create_parent_directories_if_missing(file_path: impl AsRef<Path>) -> io::Result<()> {
    match file_path.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Creates the file at the given path, as well as any missing parent
/// directories.
pub fn create_file_and_required_directories(file_path: impl AsRef<Path>) -> io::Result<File> {
    create_parent_directories_if_missing(&file_path)?;
    File::create(file_path)
}

/// Reads and returns the content of the specified text file.
pub fn read_text_file(file_path: impl AsRef<Path>) -> io::Result<String> {
    let file = File::open(file_path)?;
    let mut text = String::new();
    let _ = BufReader::new(file).read_to_string(&mut text)?;
    Ok(text)
}

/// Writes the given string as a text file with the specified path, regardless
/// of whether the file already exists.
pub fn write_text_file(text: &str, output_file_path: impl AsRef<Path>) -> io::Result<()> {
    let mut file = create_file_and_required_directories(output_file_path)?;
    write!(&mut file, "{}", text)
}

/// Reads and returns the full content of the specified binary file.
pub fn read_binary_file(file_path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let file_path = file_path.as_ref();
    fs::read(file_path).with_context(|| format!("Could not read {}", file_path.display()))
}

/// Saves the given byte buffer directly as a binary file at the given path.
pub fn save_data_as_binary(output_file_path: impl AsRef<Path>, byte_buffer: &[u8]) -> Result<()> {
    let output_file_path = output_file_path.as_ref();
    let mut file = create_file_and_required_directories(output_file_path)
        .with_context(|| format!("Could not create {}", output_file_path.display()))?;
    file.write_all(byte_buffer)
        .with_context(|| format!("Could not write {}", output_file_path.display()))
}

/// Reads the RON (Rusty Object Notation) file at the given path and
/// deserializes the contents into an object of type `T`.
pub fn parse_ron_file<T>(file_path: impl AsRef<Path>) -> Result<T>
where
    T: for<'de> serde::de::Deserialize<'de>,
{
    let file_path = file_path.as_ref();

    let text = read_text_file(file_path)
        .map_err(anyhow::Error::from)
        .with_context(|| format!("Could not open {}", file_path.display()))?;

    ron::from_str::<T>(&text)
        .map_err(anyhow::Error::from)
        .with_context(|| format!("Invalid syntax in {}", file_path.display()))
}

/// Serializes the given value of type `T` to RON (Rusty Object Notation)
/// and writes it to the given path.
pub fn write_ron_file<T>(value: &T, output_file_path: impl AsRef<Path>) -> Result<()>
where
    T: serde::ser::Serialize,
{
    let text = ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default())?;
    write_text_file(&text, output_file_path).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_create_missing_directories_when_saving_binary() {
        let dir = std::env::temp_dir().join(format!("cubemesh_io_test_{}", std::process::id()));
        let path = dir.join("nested").join("data.bin");
        save_data_as_binary(&path, &[1, 2, 3]).unwrap();
        assert_eq!(read_binary_file(&path).unwrap(), vec![1, 2, 3]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn should_report_path_when_binary_file_is_missing() {
        let error = read_binary_file("/nonexistent/cubemesh/file.bin").unwrap_err();
        assert!(format!("{error:#}").contains("/nonexistent/cubemesh/file.bin"));
    }
}
