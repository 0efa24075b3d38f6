//! Include/exclude glob matching over content paths.
//!
//! A [`PathGlob`] pairs an include set with an exclude set. A path matches
//! when at least one include pattern matches and no exclude pattern does.
//!
//! Patterns use `/` as the only separator. `*` and `?` never cross a
//! separator; `**` spans any number of segments:
//!
//! ```text
//! /posts/*.md       /posts/a.md          yes
//!                   /posts/2024/a.md     no
//! /posts/**/*.md    /posts/2024/a.md     yes
//! ```
//!
//! Two flavours exist. [`PathGlob::rooted`] is for site-wide registrations
//! (front-matter schemas, page selections) and insists every pattern starts
//! with `/`. [`PathGlob::relative`] is for layout fragments, which are
//! matched against the part of a path below the layout's own directory.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum GlobError {
    #[error("glob pattern '{0}' must be rooted (start with '/')")]
    NotRooted(String),
    #[error("glob pattern '{0}' must be relative (no leading '/')")]
    NotRelative(String),
    #[error("glob pattern '{pattern}' contains a backslash")]
    Backslash { pattern: String },
    #[error("invalid glob pattern '{pattern}': {message}")]
    Invalid { pattern: String, message: String },
}

#[derive(Debug, Clone)]
pub struct PathGlob {
    include: GlobSet,
    exclude: GlobSet,
    patterns: Vec<String>,
}

impl PathGlob {
    /// Build a matcher whose patterns are all rooted content paths.
    pub fn rooted<I, E, S1, S2>(include: I, exclude: E) -> Result<Self, GlobError>
    where
        I: IntoIterator<Item = S1>,
        E: IntoIterator<Item = S2>,
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        Self::build(include, exclude, true)
    }

    /// Build a matcher whose patterns are relative to some directory.
    pub fn relative<I, S>(include: I) -> Result<Self, GlobError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::build(include, std::iter::empty::<&str>(), false)
    }

    fn build<I, E, S1, S2>(include: I, exclude: E, must_be_rooted: bool) -> Result<Self, GlobError>
    where
        I: IntoIterator<Item = S1>,
        E: IntoIterator<Item = S2>,
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        let mut patterns = Vec::new();
        let include = build_set(include, must_be_rooted, &mut patterns)?;
        let exclude = build_set(exclude, must_be_rooted, &mut Vec::new())?;
        Ok(Self {
            include,
            exclude,
            patterns,
        })
    }

    /// Test a path. Rooted matchers expect a rooted path, relative matchers
    /// a relative one; a leading `/` is ignored either way.
    pub fn is_match(&self, path: &str) -> bool {
        let candidate = path.strip_prefix('/').unwrap_or(path);
        self.include.is_match(candidate) && !self.exclude.is_match(candidate)
    }

    /// The include patterns as written, for diagnostics.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

fn build_set<I, S>(
    patterns: I,
    must_be_rooted: bool,
    seen: &mut Vec<String>,
) -> Result<GlobSet, GlobError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        if pattern.contains('\\') {
            return Err(GlobError::Backslash {
                pattern: pattern.to_string(),
            });
        }
        let body = match (must_be_rooted, pattern.strip_prefix('/')) {
            (true, Some(rest)) => rest,
            (true, None) => return Err(GlobError::NotRooted(pattern.to_string())),
            (false, Some(_)) => return Err(GlobError::NotRelative(pattern.to_string())),
            (false, None) => pattern,
        };
        let glob = GlobBuilder::new(body)
            .literal_separator(true)
            .build()
            .map_err(|e| GlobError::Invalid {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
        builder.add(glob);
        seen.push(pattern.to_string());
    }
    builder.build().map_err(|e| GlobError::Invalid {
        pattern: seen.join(", "),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rooted(include: &[&str], exclude: &[&str]) -> PathGlob {
        PathGlob::rooted(include, exclude).unwrap()
    }

    #[test]
    fn single_star_stays_within_a_segment() {
        let glob = rooted(&["/posts/*.md"], &[]);
        assert!(glob.is_match("/posts/a.md"));
        assert!(!glob.is_match("/posts/2024/a.md"));
        assert!(!glob.is_match("/pages/a.md"));
    }

    #[test]
    fn double_star_spans_segments() {
        let glob = rooted(&["/posts/**/*.md"], &[]);
        assert!(glob.is_match("/posts/a.md"));
        assert!(glob.is_match("/posts/2024/03/a.md"));
        assert!(!glob.is_match("/posts/a.html"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let glob = rooted(&["/posts/**"], &["/posts/drafts/**"]);
        assert!(glob.is_match("/posts/a.md"));
        assert!(!glob.is_match("/posts/drafts/b.md"));
    }

    #[test]
    fn empty_include_matches_nothing() {
        let glob = rooted(&[], &[]);
        assert!(!glob.is_match("/a.md"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let glob = rooted(&["/Posts/*.md"], &[]);
        assert!(!glob.is_match("/posts/a.md"));
    }

    #[test]
    fn rooted_rejects_relative_patterns() {
        assert!(matches!(
            PathGlob::rooted(["posts/*.md"], std::iter::empty::<&str>()),
            Err(GlobError::NotRooted(_))
        ));
        assert!(matches!(
            PathGlob::rooted(["/posts\\*.md"], std::iter::empty::<&str>()),
            Err(GlobError::Backslash { .. })
        ));
    }

    #[test]
    fn relative_matches_paths_below_a_directory() {
        let glob = PathGlob::relative(["*.md"]).unwrap();
        assert!(glob.is_match("a.md"));
        assert!(!glob.is_match("sub/a.md"));
        assert!(matches!(
            PathGlob::relative(["/a.md"]),
            Err(GlobError::NotRelative(_))
        ));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = PathGlob::rooted(["/posts/[*.md"], std::iter::empty::<&str>()).unwrap_err();
        assert!(matches!(err, GlobError::Invalid { .. }));
        assert!(err.to_string().contains("/posts/[*.md"));
    }
}
