//! The list and extract flows over a [`Registry`].
//!
//! Both share one driver: resolve the image, filter layers by their
//! `created_by` line, then walk each layer's files through the pattern
//! matcher, stopping early in fast-read mode once every pattern has matched.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::error::{ImageError, Result};
use crate::image::FilesystemLayer;
use crate::matcher::PatternMatcher;
use crate::reference::Reference;
use crate::registry::Registry;

/// Lists or extracts files from image layers, like tar does for tarballs.
pub struct Car<R, W> {
    registry: R,
    out: W,
    created_by_pattern: Option<Regex>,
    /// Filename operands, just like `tar image:tag foo/* bar.txt`.
    patterns: Vec<String>,
    fast_read: bool,
    verbose: bool,
    very_verbose: bool,
}

enum Action {
    List,
    Extract(Extractor),
}

impl<R: Registry, W: Write + Send> Car<R, W> {
    /// Creates a driver over `registry`, writing output to `out`.
    pub fn new(
        registry: R,
        out: W,
        created_by_pattern: Option<Regex>,
        patterns: Vec<String>,
        fast_read: bool,
        verbose: bool,
        very_verbose: bool,
    ) -> Self {
        Self {
            registry,
            out,
            created_by_pattern,
            patterns,
            fast_read,
            verbose: verbose || very_verbose,
            very_verbose,
        }
    }

    /// Prints any files not filtered out of the image's layers.
    ///
    /// # Errors
    ///
    /// Returns an error if the image can't be resolved or read, or if some
    /// filename operand never matched.
    pub async fn list(&mut self, reference: &Reference, platform: &str) -> Result<()> {
        self.run(reference, platform, Action::List).await
    }

    /// Extracts matching files under `directory`, stripping
    /// `strip_components` leading path segments from each name.
    ///
    /// # Errors
    ///
    /// Returns an error if the image can't be resolved or read, if a file
    /// can't be written, or if some filename operand never matched.
    pub async fn extract(
        &mut self,
        reference: &Reference,
        platform: &str,
        directory: &Path,
        strip_components: usize,
    ) -> Result<()> {
        let action = Action::Extract(Extractor::new(directory, strip_components));
        self.run(reference, platform, action).await
    }

    async fn run(&mut self, reference: &Reference, platform: &str, mut action: Action) -> Result<()> {
        let image = self.registry.get_image(reference, platform).await?;
        if self.very_verbose {
            writeln!(self.out, "{image}")?;
        }

        let layers: Vec<&FilesystemLayer> = image
            .layers
            .iter()
            .filter(|layer| {
                self.created_by_pattern
                    .as_ref()
                    .is_none_or(|pattern| pattern.is_match(&layer.created_by))
            })
            .collect();
        debug!(total = image.layers.len(), kept = layers.len(), "filtered layers");

        let mut matcher = PatternMatcher::new(&self.patterns, self.fast_read)?;
        for layer in layers {
            if self.very_verbose {
                writeln!(self.out, "{layer}")?;
            }

            let verbose = self.verbose;
            let very_verbose = self.very_verbose;
            let out = &mut self.out;
            let pm = &mut matcher;
            let act = &mut action;
            let mut read_file = move |name: &str,
                                      size: u64,
                                      mode: u32,
                                      mod_time: DateTime<Utc>,
                                      reader: &mut dyn Read|
                  -> Result<()> {
                // Paketo-built images mix absolute and relative names.
                let name = name.strip_prefix('/').unwrap_or(name);
                if !pm.matches(name) {
                    return Ok(());
                }
                match act {
                    Action::List => {
                        if verbose {
                            writeln!(out, "{}", ls_line(mode, size, mod_time, name))?;
                        } else {
                            writeln!(out, "{name}")?;
                        }
                    }
                    Action::Extract(extractor) => {
                        // Like tar, names are reported archive-side, not
                        // destination-side.
                        if very_verbose {
                            writeln!(out, "{}", ls_line(mode, size, mod_time, name))?;
                        } else if verbose {
                            writeln!(out, "{name}")?;
                        }
                        extractor.extract(name, size, mode, reader)?;
                    }
                }
                Ok(())
            };

            self.registry
                .read_filesystem_layer(layer, &mut read_file)
                .await?;

            if !matcher.still_matching() {
                break;
            }
        }

        let unmatched = matcher.unmatched();
        if !unmatched.is_empty() {
            return Err(ImageError::PatternsNotFound(unmatched.join(", ")));
        }
        Ok(())
    }
}

/// One `ls -l`-style line: mode, size, `Jan _2 15:04:05` timestamp, name.
fn ls_line(mode: u32, size: u64, mod_time: DateTime<Utc>, name: &str) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        mode_string(mode),
        size,
        mod_time.format("%b %e %H:%M:%S"),
        name
    )
}

/// Renders permission bits the way `ls -l` does, e.g. `-rwxr-xr-x`.
fn mode_string(mode: u32) -> String {
    let mut rendered = String::with_capacity(10);
    rendered.push('-');
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        rendered.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        rendered.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        rendered.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    rendered
}

/// Writes matched entries under a destination directory.
struct Extractor {
    directory: PathBuf,
    strip_components: usize,
    created_parents: HashSet<PathBuf>,
}

impl Extractor {
    fn new(directory: &Path, strip_components: usize) -> Self {
        Self {
            directory: directory.to_path_buf(),
            strip_components,
            created_parents: HashSet::new(),
        }
    }

    /// Copies exactly `size` bytes to the stripped destination path,
    /// creating each distinct parent directory once. Entries with fewer
    /// path segments than `strip_components` are skipped.
    fn extract(&mut self, name: &str, size: u64, mode: u32, reader: &mut dyn Read) -> Result<()> {
        let Some(relative) = strip_path_components(name, self.strip_components) else {
            return Ok(());
        };
        let destination = self.directory.join(relative);

        if let Some(parent) = destination.parent() {
            if !self.created_parents.contains(parent) {
                fs::create_dir_all(parent)?;
                self.created_parents.insert(parent.to_path_buf());
            }
        }

        let mut file = File::create(&destination)?;
        io::copy(&mut reader.take(size), &mut file)?;
        fs::set_permissions(&destination, fs::Permissions::from_mode(mode))?;
        Ok(())
    }
}

/// Drops `count` leading path segments, or `None` when too few remain.
fn strip_path_components(name: &str, count: usize) -> Option<&str> {
    let mut rest = name;
    for _ in 0..count {
        let (_, tail) = rest.split_once('/')?;
        rest = tail;
    }
    (!rest.is_empty()).then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_strings() {
        assert_eq!(mode_string(0o755), "-rwxr-xr-x");
        assert_eq!(mode_string(0o644), "-rw-r--r--");
        assert_eq!(mode_string(0o640), "-rw-r-----");
        assert_eq!(mode_string(0o000), "----------");
    }

    #[test]
    fn ls_lines_use_stamp_format() {
        let mod_time = DateTime::parse_from_rfc3339("2020-06-07T06:28:15Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            ls_line(0o640, 10, mod_time, "bin/apple.txt"),
            "-rw-r-----\t10\tJun  7 06:28:15\tbin/apple.txt"
        );
    }

    #[test]
    fn strips_leading_components() {
        assert_eq!(strip_path_components("usr/local/bin/car", 0), Some("usr/local/bin/car"));
        assert_eq!(strip_path_components("usr/local/bin/car", 3), Some("car"));
        assert_eq!(strip_path_components("usr/local/bin/car", 4), None);
        assert_eq!(strip_path_components("car", 1), None);
    }
}
