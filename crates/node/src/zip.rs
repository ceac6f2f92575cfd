// SPDX-License-Identifier: MIT

//! Zipping a task's result directory for a remote node to pull, gated on
//! the `zip_results` config flag. Structural port of
//! `cuckoo.common.importing.TaskResultZipper.make_zip`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Recursively zip every file under `task_dir` (skipping `zipped_results.zip`
/// itself, should a retry run into a half-written one) into `dest`, with
/// archive paths relative to `task_dir`.
pub fn zip_task_results(task_dir: &Path, dest: &Path) -> io::Result<()> {
    let file = File::create(dest)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut buf = Vec::new();
    add_dir(&mut writer, task_dir, task_dir, dest, &options, &mut buf)?;
    writer.finish()?;
    Ok(())
}

fn add_dir(
    writer: &mut ZipWriter<File>,
    base: &Path,
    dir: &Path,
    dest: &Path,
    options: &SimpleFileOptions,
    buf: &mut Vec<u8>,
) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path == dest {
            continue;
        }
        if path.is_dir() {
            add_dir(writer, base, &path, dest, options, buf)?;
            continue;
        }
        let rel = path
            .strip_prefix(base)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        writer.start_file(rel, *options)?;
        buf.clear();
        File::open(&path)?.read_to_end(buf)?;
        writer.write_all(buf)?;
    }
    Ok(())
}
