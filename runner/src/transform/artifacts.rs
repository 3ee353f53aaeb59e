use super::TransformError;
use crate::config::ArtifactRule;
use globset::{GlobBuilder, GlobMatcher};
use std::{ffi::OsString, fs, path::Path};
use tracing::warn;

/// Compiled artifact rules, checked against a unit directory after the transformation
#[derive(Debug, Clone)]
pub struct ArtifactCheck {
    rules: Vec<(ArtifactRule, GlobMatcher)>,
}

impl ArtifactCheck {
    /// compile all rules, collecting every invalid glob
    pub fn compile(rules: &[ArtifactRule]) -> Result<Self, Vec<(String, globset::Error)>> {
        let mut errors = Vec::new();
        let mut compiled = Vec::new();

        for rule in rules {
            match GlobBuilder::new(&rule.glob)
                .literal_separator(true)
                .build()
                .map(|glob| glob.compile_matcher())
            {
                Ok(matcher) => compiled.push((rule.clone(), matcher)),
                Err(error) => errors.push((rule.glob.clone(), error)),
            }
        }

        if errors.is_empty() {
            Ok(Self { rules: compiled })
        } else {
            Err(errors)
        }
    }

    /// fail on the first rule that isn't satisfied by the files directly in `dir`
    pub fn verify(&self, dir: &Path) -> Result<(), TransformError> {
        if self.rules.is_empty() {
            return Ok(());
        }

        let mut names: Vec<OsString> = Vec::new();

        for entry in fs::read_dir(dir).map_err(TransformError::Inspect)? {
            let entry = entry.map_err(TransformError::Inspect)?;

            if entry.file_type().map_err(TransformError::Inspect)?.is_file() {
                names.push(entry.file_name());
            }
        }

        for (rule, matcher) in self.rules.iter() {
            let found = names.iter().filter(|name| matcher.is_match(name)).count();
            let satisfied = match rule.count {
                Some(count) => found == count,
                None => found > 0,
            };

            if !satisfied {
                warn!(dir = ?dir, glob = %rule.glob, found, "Expected artifact missing");

                return Err(TransformError::MissingArtifact {
                    glob: rule.glob.clone(),
                    found,
                });
            }
        }

        Ok(())
    }
}
